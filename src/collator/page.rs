//! Page and referring-page context parsed from the request address

use super::{insert_with_lowercase, ParamsCollator};
use crate::types::{RequestDetails, TargetDeliveryRequest};
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

pub const URL: &str = "url";
pub const DOMAIN: &str = "domain";
pub const SUBDOMAIN: &str = "subdomain";
pub const TOP_LEVEL_DOMAIN: &str = "topLevelDomain";
pub const PATH: &str = "path";
pub const QUERY: &str = "query";
pub const FRAGMENT: &str = "fragment";

/// Collates `page.*` from `address.url` or `referring.*` from `address.referringUrl`.
/// An item-level address overrides the context address.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageParamsCollator {
    referring: bool,
}

impl PageParamsCollator {
    pub fn page() -> Self {
        Self { referring: false }
    }

    pub fn referring() -> Self {
        Self { referring: true }
    }
}

impl ParamsCollator for PageParamsCollator {
    fn collate(&self, request: &TargetDeliveryRequest, details: &RequestDetails<'_>) -> Map<String, Value> {
        let Some(context) = request.request.context.as_ref() else {
            return Map::new();
        };
        let Some(address) = details.address().or(context.address.as_ref()) else {
            return Map::new();
        };
        let raw = if self.referring {
            address.referring_url.as_deref()
        } else {
            address.url.as_deref()
        };
        match raw.filter(|u| !u.is_empty()) {
            Some(raw) => page_params(raw),
            None => Map::new(),
        }
    }
}

fn page_params(raw: &str) -> Map<String, Value> {
    let mut page = Map::new();
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            warn!(url = raw, error = %e, "URL in context address malformed, skipping");
            return page;
        }
    };

    let host = url.host_str().unwrap_or_default();
    insert_with_lowercase(&mut page, URL, url.as_str());
    insert_with_lowercase(&mut page, DOMAIN, host);
    insert_with_lowercase(&mut page, SUBDOMAIN, subdomain(host));
    insert_with_lowercase(&mut page, TOP_LEVEL_DOMAIN, top_level_domain(host));
    insert_with_lowercase(&mut page, PATH, url.path());
    insert_with_lowercase(&mut page, QUERY, url.query().unwrap_or_default());
    insert_with_lowercase(&mut page, FRAGMENT, url.fragment().unwrap_or_default());
    page
}

/// First label of hosts with three or more labels, ignoring a leading `www.`
fn subdomain(host: &str) -> &str {
    let host = if host.get(..4).map_or(false, |p| p.eq_ignore_ascii_case("www.")) {
        &host[4..]
    } else {
        host
    };
    let mut parts = host.split('.');
    match (parts.next(), parts.clone().count()) {
        (Some(first), rest) if rest >= 2 => first,
        _ => "",
    }
}

fn top_level_domain(host: &str) -> &str {
    match host.rfind('.') {
        Some(idx) => &host[idx + 1..],
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Context, DeliveryRequest, MboxRequest, PageLoadRequest};

    fn request_with(address: Address) -> TargetDeliveryRequest {
        TargetDeliveryRequest::new(DeliveryRequest {
            context: Some(Context {
                address: Some(address),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_page_params() {
        let request = request_with(Address::url("https://Shop.Example.co.uk/Cart/View?Item=1#Top"));
        let page_load = PageLoadRequest::default();
        let page = PageParamsCollator::page().collate(&request, &RequestDetails::PageLoad(&page_load));

        assert_eq!(page[DOMAIN], "shop.example.co.uk");
        assert_eq!(page[SUBDOMAIN], "shop");
        assert_eq!(page[TOP_LEVEL_DOMAIN], "uk");
        assert_eq!(page[PATH], "/Cart/View");
        assert_eq!(page["path_lc"], "/cart/view");
        assert_eq!(page[QUERY], "Item=1");
        assert_eq!(page["query_lc"], "item=1");
        assert_eq!(page[FRAGMENT], "Top");
    }

    #[test]
    fn test_subdomain_rules() {
        assert_eq!(subdomain("www.example.com"), "");
        assert_eq!(subdomain("WWW.news.example.com"), "news");
        assert_eq!(subdomain("example.com"), "");
        assert_eq!(top_level_domain("localhost"), "localhost");
    }

    #[test]
    fn test_details_address_overrides_context() {
        let request = request_with(Address::url("https://context.example.com/"));
        let mut mbox = MboxRequest::new(0, "hero");
        mbox.address = Some(Address::url("https://item.example.com/"));

        let page = PageParamsCollator::page().collate(&request, &RequestDetails::Mbox(&mbox));
        assert_eq!(page[DOMAIN], "item.example.com");
    }

    #[test]
    fn test_referring_url() {
        let request = request_with(Address {
            url: Some("https://example.com/".to_string()),
            referring_url: Some("https://search.engine.com/q".to_string()),
        });
        let page_load = PageLoadRequest::default();
        let referring =
            PageParamsCollator::referring().collate(&request, &RequestDetails::PageLoad(&page_load));
        assert_eq!(referring[DOMAIN], "search.engine.com");
        assert_eq!(referring[PATH], "/q");
    }

    #[test]
    fn test_malformed_url_yields_empty_map() {
        let request = request_with(Address::url("not a url"));
        let page_load = PageLoadRequest::default();
        let page = PageParamsCollator::page().collate(&request, &RequestDetails::PageLoad(&page_load));
        assert!(page.is_empty());
    }
}

//! IP geo lookup
//!
//! When the artifact enables geo targeting and a request only carries an
//! IP address, the service resolves the address before decisioning. The
//! edge answers a GET with the location in response headers.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::Geo;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;

pub const GEO_PATH: &str = "/v1/geo";
pub const GEO_IP_HEADER: &str = "x-forwarded-for";

pub const GEO_HEADER_CITY: &str = "x-geo-city";
pub const GEO_HEADER_REGION: &str = "x-geo-region-code";
pub const GEO_HEADER_COUNTRY: &str = "x-geo-country-code";
pub const GEO_HEADER_LATITUDE: &str = "x-geo-latitude";
pub const GEO_HEADER_LONGITUDE: &str = "x-geo-longitude";

/// Resolves an IP address to a location
#[async_trait]
pub trait GeoClient: Send + Sync {
    async fn lookup_geo(&self, ip_address: &str) -> Result<Geo>;
}

pub struct HttpGeoClient {
    client: reqwest::Client,
    url: String,
}

impl HttpGeoClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: format!("https://{}{}", config.geo_hostname, GEO_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GeoClient for HttpGeoClient {
    async fn lookup_geo(&self, ip_address: &str) -> Result<Geo> {
        let response = self
            .client
            .get(&self.url)
            .header(GEO_IP_HEADER, ip_address)
            .send()
            .await?;
        debug!(status = %response.status(), "Geo lookup answered");

        let mut geo = headers_to_geo(response.headers());
        geo.ip_address = Some(ip_address.to_string());
        Ok(geo)
    }
}

/// Location fields from geo response headers; unparseable coordinates are dropped
pub fn headers_to_geo(headers: &HeaderMap) -> Geo {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let coordinate = |name: &str| text(name).and_then(|v| v.trim().parse::<f64>().ok());

    Geo {
        ip_address: None,
        city: text(GEO_HEADER_CITY),
        state_code: text(GEO_HEADER_REGION),
        country_code: text(GEO_HEADER_COUNTRY),
        latitude: coordinate(GEO_HEADER_LATITUDE),
        longitude: coordinate(GEO_HEADER_LONGITUDE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_headers_to_geo() {
        let mut headers = HeaderMap::new();
        headers.insert(GEO_HEADER_CITY, HeaderValue::from_static("SAN FRANCISCO"));
        headers.insert(GEO_HEADER_REGION, HeaderValue::from_static("CA"));
        headers.insert(GEO_HEADER_COUNTRY, HeaderValue::from_static("US"));
        headers.insert(GEO_HEADER_LATITUDE, HeaderValue::from_static("37.75"));
        headers.insert(GEO_HEADER_LONGITUDE, HeaderValue::from_static("not-a-number"));

        let geo = headers_to_geo(&headers);
        assert_eq!(geo.city.as_deref(), Some("SAN FRANCISCO"));
        assert_eq!(geo.state_code.as_deref(), Some("CA"));
        assert_eq!(geo.country_code.as_deref(), Some("US"));
        assert_eq!(geo.latitude, Some(37.75));
        assert!(geo.longitude.is_none());
    }

    #[test]
    fn test_empty_headers() {
        let geo = headers_to_geo(&HeaderMap::new());
        assert_eq!(geo, Geo::default());
    }

    #[test]
    fn test_url() {
        let mut config = ClientConfig::new("acme");
        config.geo_hostname = "geo.example.com".to_string();
        let client = HttpGeoClient::new(&config).unwrap();
        assert_eq!(client.url(), "https://geo.example.com/v1/geo");
    }
}

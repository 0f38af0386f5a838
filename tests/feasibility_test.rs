//! Partial local coverage: decide what we can, report the rest

mod common;

use common::*;
use ondevice_core::types::{DeliveryRequest, MboxRequest, PrefetchRequest, ViewRequest, VisitorId};
use ondevice_core::TargetDeliveryRequest;
use serde_json::json;
use std::sync::Arc;

fn hero_artifact() -> String {
    artifact_json(json!("1.0.0"), json!({"hero": [rule(3, json!(true), json!({"hero": true}))]}))
}

fn request(mboxes: &[&str], views: Vec<ViewRequest>) -> TargetDeliveryRequest {
    TargetDeliveryRequest::new(DeliveryRequest {
        id: Some(VisitorId::with_tnt_id("visitor-9")),
        prefetch: Some(PrefetchRequest {
            mboxes: mboxes
                .iter()
                .enumerate()
                .map(|(i, name)| MboxRequest::new(i as i32, *name))
                .collect(),
            views,
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_remote_mbox_yields_partial_content() {
    let service = start_service(config_with_artifact(hero_artifact()), Arc::new(RecordingTransport::default()));

    let response = service
        .execute_request(&request(&["hero", "remote-only"], Vec::new()))
        .unwrap();
    assert_eq!(response.status, 206);
    assert_eq!(response.remote_mboxes, vec!["remote-only".to_string()]);
    assert!(response.remote_views.is_empty());
    assert_eq!(response.message, "remote activities in: mboxes [remote-only]");

    // the local mbox is still decided
    let mboxes = response.response.prefetch.unwrap().mboxes;
    let hero = mboxes.iter().find(|m| m.name == "hero").unwrap();
    assert_eq!(hero.options[0].content, Some(json!({"hero": true})));

    service.stop().await;
}

#[tokio::test]
async fn test_remote_view_reported() {
    let service = start_service(config_with_artifact(hero_artifact()), Arc::new(RecordingTransport::default()));

    let response = service
        .execute_request(&request(&["hero"], vec![ViewRequest::named("checkout")]))
        .unwrap();
    assert_eq!(response.status, 206);
    assert!(response.remote_mboxes.is_empty());
    assert_eq!(response.remote_views, vec!["checkout".to_string()]);
    assert_eq!(response.message, "remote activities in: views [checkout]");

    let verdict = service.evaluate_feasibility(&request(&["hero"], Vec::new()));
    assert!(verdict.all_local);
    assert!(verdict.reason.is_none());

    service.stop().await;
}

//! End-to-end decisioning through `OnDeviceDecisioningService`

mod common;

use common::*;
use ondevice_core::types::{
    DeliveryRequest, ExecuteRequest, MboxRequest, PageLoadRequest, PrefetchRequest, Trace, VisitorId,
};
use ondevice_core::{allocate, TargetDeliveryRequest};
use serde_json::json;
use std::sync::Arc;

fn experiment_artifact() -> String {
    let condition = json!({"and": [
        {"<": [{"var": "allocation"}, 50]},
        {"==": [{"var": "mbox.foo"}, "bar"]}
    ]});
    artifact_json(
        json!("1.0.0"),
        json!({"hero": [rule(1001, condition, json!({"experience": "a"}))]}),
    )
}

fn prefetch_request(foo: &str) -> TargetDeliveryRequest {
    TargetDeliveryRequest::new(DeliveryRequest {
        id: Some(VisitorId::with_tnt_id("visitor-2")),
        prefetch: Some(PrefetchRequest {
            mboxes: vec![MboxRequest::new(0, "hero").with_parameter("foo", foo)],
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_matching_visitor_gets_experience() {
    assert!(allocate(CLIENT, "1001", "visitor-2") < 50.0);
    let service = start_service(
        config_with_artifact(experiment_artifact()),
        Arc::new(RecordingTransport::default()),
    );

    let response = service.execute_request(&prefetch_request("bar")).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.message, "Local-decisioning response");

    let prefetch = response.response.prefetch.unwrap();
    assert_eq!(prefetch.mboxes.len(), 1);
    let option = &prefetch.mboxes[0].options[0];
    assert_eq!(option.content, Some(json!({"experience": "a"})));
    // prefetched options keep their event token for later notification
    assert_eq!(option.event_token.as_deref(), Some("token-1001"));
    assert_eq!(option.response_tokens["activity.executionType"], "client-side");
    assert_eq!(option.response_tokens["activity.name"], "Activity 1001");

    service.stop().await;
}

#[tokio::test]
async fn test_non_matching_parameters_yield_placeholder() {
    let service = start_service(
        config_with_artifact(experiment_artifact()),
        Arc::new(RecordingTransport::default()),
    );

    let response = service.execute_request(&prefetch_request("baz")).unwrap();
    assert_eq!(response.status, 200);

    let prefetch = response.response.prefetch.unwrap();
    assert_eq!(prefetch.mboxes.len(), 1);
    assert_eq!(prefetch.mboxes[0].name, "hero");
    assert!(prefetch.mboxes[0].options.is_empty());
    assert!(prefetch.mboxes[0].trace.is_none());

    service.stop().await;
}

#[tokio::test]
async fn test_three_slots_one_match() {
    let artifact = artifact_json(
        json!("1.0.0"),
        json!({
            "slot-a": [rule(1, json!(true), json!({"slot": "a"}))],
            "slot-b": [rule(2, json!(false), json!({"slot": "b"}))],
            "slot-c": []
        }),
    );
    let service = start_service(config_with_artifact(artifact), Arc::new(RecordingTransport::default()));

    let request = TargetDeliveryRequest::new(DeliveryRequest {
        id: Some(VisitorId::with_tnt_id("visitor-1")),
        prefetch: Some(PrefetchRequest {
            mboxes: vec![
                MboxRequest::new(0, "slot-a"),
                MboxRequest::new(1, "slot-b"),
                MboxRequest::new(2, "slot-c"),
            ],
            ..Default::default()
        }),
        ..Default::default()
    });
    let response = service.execute_request(&request).unwrap();
    let mboxes = response.response.prefetch.unwrap().mboxes;

    assert_eq!(mboxes.len(), 3);
    let unmatched: Vec<_> = mboxes.iter().filter(|m| m.options.is_empty()).collect();
    assert_eq!(unmatched.len(), 2);
    assert_eq!(mboxes[0].name, "slot-a");
    assert_eq!(mboxes[0].options.len(), 1);

    service.stop().await;
}

#[tokio::test]
async fn test_first_match_wins_unless_all_matching() {
    let artifact = artifact_json(
        json!("1.0.0"),
        json!({"hero": [
            rule(1, json!(true), json!({"rule": 1})),
            rule(2, json!(true), json!({"rule": 2}))
        ]}),
    );
    let request = prefetch_request("bar");

    let service = start_service(
        config_with_artifact(artifact.clone()),
        Arc::new(RecordingTransport::default()),
    );
    let mboxes = service.execute_request(&request).unwrap().response.prefetch.unwrap().mboxes;
    assert_eq!(mboxes.len(), 1);
    assert_eq!(mboxes[0].options[0].content, Some(json!({"rule": 1})));
    service.stop().await;

    let mut config = config_with_artifact(artifact);
    config.all_matching_rules_mboxes = vec!["hero".to_string()];
    let service = start_service(config, Arc::new(RecordingTransport::default()));
    let mboxes = service.execute_request(&request).unwrap().response.prefetch.unwrap().mboxes;
    assert_eq!(mboxes.len(), 2);
    assert_eq!(mboxes[1].options[0].content, Some(json!({"rule": 2})));
    service.stop().await;
}

#[tokio::test]
async fn test_execute_sends_display_notification() {
    let transport = Arc::new(RecordingTransport::default());
    let service = start_service(config_with_artifact(experiment_artifact()), transport.clone());

    let request = TargetDeliveryRequest {
        request: DeliveryRequest {
            id: Some(VisitorId::with_tnt_id("visitor-2")),
            execute: Some(ExecuteRequest {
                mboxes: vec![MboxRequest::new(0, "hero").with_parameter("foo", "bar")],
                ..Default::default()
            }),
            ..Default::default()
        },
        session_id: Some("session-42".to_string()),
        location_hint: Some("35".to_string()),
        ..Default::default()
    };
    let response = service.execute_request(&request).unwrap();

    let execute = response.response.execute.unwrap();
    assert_eq!(execute.mboxes.len(), 1);
    assert!(execute.mboxes[0].options[0].event_token.is_none());

    wait_until(|| transport.recorded().len() == 1).await;
    let batch = &transport.recorded()[0];
    assert_eq!(batch.session_id.as_deref(), Some("session-42"));
    assert_eq!(batch.location_hint.as_deref(), Some("35"));
    assert_eq!(
        batch.request.id.as_ref().and_then(|id| id.tnt_id.as_deref()),
        Some("visitor-2")
    );
    assert!(batch.request.request_id.is_some());
    assert_eq!(batch.request.notifications.len(), 1);

    let notification = &batch.request.notifications[0];
    assert_eq!(notification.tokens, vec!["token-1001".to_string()]);
    assert_eq!(notification.mbox.as_ref().map(|m| m.name.as_str()), Some("hero"));
    assert!(notification.timestamp > 0);

    service.stop().await;
}

#[tokio::test]
async fn test_prefetch_only_sends_nothing() {
    let transport = Arc::new(RecordingTransport::default());
    let service = start_service(config_with_artifact(experiment_artifact()), transport.clone());

    service.execute_request(&prefetch_request("bar")).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(transport.recorded().is_empty());

    service.stop().await;
}

#[tokio::test]
async fn test_generated_visitor_id_is_echoed() {
    let service = start_service(
        config_with_artifact(experiment_artifact()),
        Arc::new(RecordingTransport::default()),
    );
    let request = TargetDeliveryRequest::new(DeliveryRequest {
        prefetch: Some(PrefetchRequest {
            page_load: Some(PageLoadRequest::default()),
            ..Default::default()
        }),
        ..Default::default()
    });

    let response = service.execute_request(&request).unwrap();
    let tnt_id = response.response.id.and_then(|id| id.tnt_id);
    assert!(tnt_id.is_some_and(|id| !id.is_empty()));
    // the global mbox has no rules, so the page load is a placeholder
    assert!(response.response.prefetch.unwrap().page_load.is_some());

    service.stop().await;
}

#[tokio::test]
async fn test_trace_attached_when_requested() {
    let service = start_service(
        config_with_artifact(experiment_artifact()),
        Arc::new(RecordingTransport::default()),
    );
    let mut request = prefetch_request("baz");
    request.request.trace = Some(Trace::default());

    let response = service.execute_request(&request).unwrap();
    let mboxes = response.response.prefetch.unwrap().mboxes;
    let trace = mboxes[0].trace.as_ref().expect("trace requested");

    assert_eq!(trace["clientCode"], CLIENT);
    assert_eq!(trace["artifact"]["artifactVersion"], "1.0.0");
    assert_eq!(trace["request"]["mbox"]["name"], "hero");
    assert_eq!(trace["request"]["mbox"]["type"], "prefetch");
    let targets = trace["evaluatedCampaignTargets"].as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["unmatchedSegmentIds"], json!([10010]));
    assert!(trace["campaigns"].as_array().unwrap().is_empty());

    service.stop().await;
}

#[tokio::test]
async fn test_trace_accumulates_across_items() {
    let artifact = artifact_json(
        json!("1.0.0"),
        json!({
            "slot-a": [rule(1, json!(true), json!({"slot": "a"}))],
            "slot-b": [rule(2, json!(true), json!({"slot": "b"}))]
        }),
    );
    let service = start_service(config_with_artifact(artifact), Arc::new(RecordingTransport::default()));

    let mut request = TargetDeliveryRequest::new(DeliveryRequest {
        id: Some(VisitorId::with_tnt_id("visitor-1")),
        prefetch: Some(PrefetchRequest {
            mboxes: vec![MboxRequest::new(0, "slot-a"), MboxRequest::new(1, "slot-b")],
            ..Default::default()
        }),
        ..Default::default()
    });
    request.request.trace = Some(Trace::default());

    let response = service.execute_request(&request).unwrap();
    let mboxes = response.response.prefetch.unwrap().mboxes;
    assert_eq!(mboxes.len(), 2);

    let first = mboxes[0].trace.as_ref().unwrap();
    assert_eq!(first["campaigns"].as_array().unwrap().len(), 1);
    assert_eq!(first["request"]["mbox"]["name"], "slot-a");

    let second = mboxes[1].trace.as_ref().unwrap();
    let ids: Vec<_> = second["campaigns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(2)]);
    assert_eq!(second["evaluatedCampaignTargets"].as_array().unwrap().len(), 2);
    assert_eq!(second["request"]["mbox"]["name"], "slot-b");

    service.stop().await;
}

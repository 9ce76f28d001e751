//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Event listing and lookup return the live store
//! - Query filters are applied and malformed ones rejected
//! - Ack and clear record the authenticated user
//! - A malformed ack body is rejected without acknowledging
//! - Authentication is enforced on event routes
//! - Unknown ids map to 404
//! - Planned maintenance can be scheduled, listed and cancelled

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::StatusCode;
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use zino::{
    api::{ApiConfig, ApiState, EventsResponse, Secrets, spawn_api_server},
    daemon::DaemonState,
    events::{Event, EventStatus},
    maintenance::{PlannedMaintenance, PmState},
    monitors::{EntityKey, PollOutcome},
};

use crate::helpers::{at, daemon_state, interface, success};

const TOKEN: &str = "test-token";

async fn spawn_test_api(state: Arc<DaemonState>) -> SocketAddr {
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
    };
    let secrets = Secrets::parse(&format!("alice {TOKEN}\n")).unwrap();

    spawn_api_server(config, ApiState::new(state), secrets)
        .await
        .unwrap()
}

/// gw1 unreachable (open event), gw2 with a down interface (open event)
fn state_with_events() -> Arc<DaemonState> {
    let state = daemon_state();
    for minute in 0..4 {
        state.apply_poll("gw1", PollOutcome::Failure, at(minute));
    }
    state.apply_poll("gw2", success(vec![interface(2, "ge-0/0/2", true)]), at(0));
    state.apply_poll("gw2", success(vec![interface(2, "ge-0/0/2", false)]), at(10));
    state
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn test_health_endpoint_needs_no_auth() {
    let addr = spawn_test_api(state_with_events()).await;

    let response = client()
        .get(format!("http://{addr}/api/v1/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["open_events"], 2);
}

#[tokio::test]
async fn test_list_events_requires_token() {
    let addr = spawn_test_api(state_with_events()).await;

    let response = client()
        .get(format!("http://{addr}/api/v1/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client()
        .get(format!("http://{addr}/api/v1/events"))
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_list_and_filter_events() {
    let addr = spawn_test_api(state_with_events()).await;

    let all: EventsResponse = client()
        .get(format!("http://{addr}/api/v1/events"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.count, 2);

    let interfaces: EventsResponse = client()
        .get(format!("http://{addr}/api/v1/events?kind=interface&status=open"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(interfaces.count, 1);
    assert_eq!(interfaces.events[0].entity.device, "gw2");

    let gw1: EventsResponse = client()
        .get(format!("http://{addr}/api/v1/events?device=gw1"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(gw1.count, 1);

    let response = client()
        .get(format!("http://{addr}/api/v1/events?kind=toaster"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_event_by_id() {
    let state = state_with_events();
    let id = state.events.snapshot()[0].id;
    let addr = spawn_test_api(state).await;

    let event: Event = client()
        .get(format!("http://{addr}/api/v1/events/{id}"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(event.id, id);

    let response = client()
        .get(format!("http://{addr}/api/v1/events/9999"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("9999"));

    let response = client()
        .get(format!("http://{addr}/api/v1/events/abc"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ack_and_clear_record_user() {
    let state = state_with_events();
    let id = state.events.snapshot()[0].id;
    let addr = spawn_test_api(state.clone()).await;

    let acked: Event = client()
        .post(format!("http://{addr}/api/v1/events/{id}/ack"))
        .bearer_auth(TOKEN)
        .json(&json!({ "note": "on it" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ack = acked.ack.unwrap();
    assert_eq!(ack.user, "alice");
    assert_eq!(ack.note, "on it");
    assert_eq!(acked.status, EventStatus::Open);

    let cleared: Event = client()
        .post(format!("http://{addr}/api/v1/events/{id}/clear"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared.status, EventStatus::Closed);
    let last = cleared.log.last().unwrap();
    assert_eq!(last.user.as_deref(), Some("alice"));

    // the store itself saw the change
    assert!(!state.events.get_by_id(id).unwrap().is_open());
}

#[tokio::test]
async fn test_ack_body_must_be_empty_or_valid() {
    let state = state_with_events();
    let id = state.events.snapshot()[0].id;
    let addr = spawn_test_api(state.clone()).await;

    let response = client()
        .post(format!("http://{addr}/api/v1/events/{id}/ack"))
        .bearer_auth(TOKEN)
        .header("content-type", "application/json")
        .body("{\"note\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.events.get_by_id(id).unwrap().ack.is_none());

    let acked: Event = client()
        .post(format!("http://{addr}/api/v1/events/{id}/ack"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(acked.ack.unwrap().note, "");
}

#[tokio::test]
async fn test_commands_on_unknown_event_are_not_found() {
    let state = state_with_events();
    let before = state.events.snapshot();
    let addr = spawn_test_api(state.clone()).await;

    for command in ["ack", "clear"] {
        let response = client()
            .post(format!("http://{addr}/api/v1/events/4242/{command}"))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{command}");
    }

    assert_eq!(state.events.snapshot(), before);
}

#[tokio::test]
async fn test_commands_require_token() {
    let state = state_with_events();
    let id = state.events.snapshot()[0].id;
    let addr = spawn_test_api(state.clone()).await;

    let response = client()
        .post(format!("http://{addr}/api/v1/events/{id}/clear"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(state.events.get_by_id(id).unwrap().is_open());
}

#[tokio::test]
async fn test_maintenance_lifecycle() {
    let state = state_with_events();
    let addr = spawn_test_api(state.clone()).await;
    let now = Utc::now();

    let response = client()
        .post(format!("http://{addr}/api/v1/pm"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "start": now - TimeDelta::hours(1),
            "end": now + TimeDelta::hours(1),
            "device_pattern": "^gw1$",
            "description": "chassis replacement",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let pm: PlannedMaintenance = response.json().await.unwrap();
    assert_eq!(pm.state, PmState::Active);
    assert_eq!(pm.created_by.as_deref(), Some("alice"));

    let gw1 = state.events.open_event_for(&EntityKey::reachability("gw1")).unwrap();
    assert_eq!(gw1.maintenance, vec![pm.id]);

    let listed: Value = client()
        .get(format!("http://{addr}/api/v1/pm"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);

    let response = client()
        .delete(format!("http://{addr}/api/v1/pm/{}", pm.id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.maintenance.is_empty());

    let response = client()
        .delete(format!("http://{addr}/api/v1/pm/{}", pm.id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_maintenance_rejected() {
    let state = state_with_events();
    let addr = spawn_test_api(state.clone()).await;
    let now = Utc::now();

    let bodies = [
        json!({"start": now, "end": now - TimeDelta::hours(1), "device_pattern": "gw1"}),
        json!({"start": now, "end": now + TimeDelta::hours(1), "device_pattern": "gw("}),
        json!({"start": "yesterday", "end": now, "device_pattern": "gw1"}),
    ];
    for body in bodies {
        let response = client()
            .post(format!("http://{addr}/api/v1/pm"))
            .bearer_auth(TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }

    let response = client()
        .get(format!("http://{addr}/api/v1/pm"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(state.maintenance.is_empty());
}

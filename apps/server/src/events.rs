//! OneBot v11 event receiver.
//!
//! The OneBot implementation POSTs every event to `/`. Group messages are
//! handed to the command handler in the background; the HTTP reply is always
//! an empty 204 so the bot never waits on a balance lookup.

use crate::state::SharedState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use meterbot_alerts::GroupMessage;
use meterbot_core::{GroupId, UserId};
use serde_json::Value;
use tracing::{debug, error, info};

/// OneBot ids arrive as numbers or strings depending on the implementation.
fn id_field(event: &Value, key: &str) -> Option<String> {
    match event.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Extract a group message from a raw event, or `None` for any other event.
pub fn parse_group_message(event: &Value) -> Option<GroupMessage> {
    if event.get("post_type")?.as_str()? != "message" {
        return None;
    }
    if event.get("message_type")?.as_str()? != "group" {
        return None;
    }

    let text = event
        .get("raw_message")
        .and_then(Value::as_str)
        .or_else(|| event.get("message").and_then(Value::as_str))?;

    Some(GroupMessage {
        group_id: GroupId::new(id_field(event, "group_id")?),
        user_id: UserId::new(id_field(event, "user_id")?),
        message_id: id_field(event, "message_id").unwrap_or_default(),
        text: text.trim().to_string(),
    })
}

async fn receive_event(State(state): State<SharedState>, Json(event): Json<Value>) -> StatusCode {
    let Some(message) = parse_group_message(&event) else {
        debug!(
            post_type = event.get("post_type").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "Ignoring event"
        );
        return StatusCode::NO_CONTENT;
    };

    tokio::spawn(async move {
        match state.commands.handle(&message).await {
            Ok(true) => debug!(group = %message.group_id, user = %message.user_id, "Command handled"),
            Ok(false) => {}
            Err(e) => error!(
                group = %message.group_id,
                user = %message.user_id,
                error = %e,
                "Command failed"
            ),
        }
    });
    StatusCode::NO_CONTENT
}

pub fn create_event_router(state: SharedState) -> Router {
    Router::new()
        .route("/", post(receive_event))
        .with_state(state)
}

/// Bind the event receiver and serve it in the background.
pub async fn start_event_server(
    state: SharedState,
    addr: &str,
) -> Result<tokio::task::JoinHandle<()>, Box<dyn std::error::Error + Send + Sync>> {
    let app = create_event_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("OneBot event receiver listening on http://{}", listener.local_addr()?);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Event receiver error: {}", e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use async_trait::async_trait;
    use meterbot_alerts::{Notifier, NotifyError};
    use meterbot_billing::{BalanceSource, QueryError};
    use meterbot_core::{AccountBalance, AccountId};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct NoBilling;

    #[async_trait]
    impl BalanceSource for NoBilling {
        async fn fetch(&self, _account: &AccountId) -> Result<AccountBalance, QueryError> {
            Err(QueryError::NotFound)
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Outbox {
        async fn send_group_message(&self, _group: &GroupId, text: &str) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_parse_group_message() {
        let event = json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": 1001,
            "user_id": "2002",
            "message_id": -12345,
            "raw_message": "  查询 ",
            "message": [{"type": "text", "data": {"text": "查询"}}]
        });
        assert_eq!(
            parse_group_message(&event),
            Some(GroupMessage {
                group_id: GroupId::from("1001"),
                user_id: UserId::from("2002"),
                message_id: "-12345".into(),
                text: "查询".into(),
            })
        );
    }

    #[test]
    fn test_string_message_fallback() {
        let event = json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": "1001",
            "user_id": 2002,
            "message": "qfnueqmenu"
        });
        let message = parse_group_message(&event).unwrap();
        assert_eq!(message.text, "qfnueqmenu");
        assert_eq!(message.message_id, "");
    }

    #[test]
    fn test_other_events_ignored() {
        for event in [
            json!({"post_type": "meta_event", "meta_event_type": "heartbeat"}),
            json!({"post_type": "message", "message_type": "private", "user_id": 1, "raw_message": "查询"}),
            json!({"post_type": "notice", "group_id": 1001}),
            json!({"post_type": "message", "message_type": "group", "user_id": 1, "raw_message": "查询"}),
            json!({"status": "ok", "retcode": 0}),
        ] {
            assert_eq!(parse_group_message(&event), None);
        }
    }

    #[tokio::test]
    async fn test_receiver_dispatches_group_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.data_dir = dir.path().join("groups");
        config.switch_file = dir.path().join("switch.json");
        let outbox = Arc::new(Outbox::default());
        let state = Arc::new(
            AppState::new(config, Arc::new(NoBilling), outbox.clone())
                .await
                .unwrap(),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_event_router(state)).await.unwrap();
        });

        let client = reqwest::Client::new();
        for event in [
            json!({"post_type": "meta_event", "meta_event_type": "heartbeat"}),
            json!({
                "post_type": "message",
                "message_type": "group",
                "group_id": 1001,
                "user_id": 2002,
                "message_id": 5,
                "raw_message": "qfnueqmenu"
            }),
        ] {
            let response = client
                .post(format!("http://{addr}/"))
                .json(&event)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        }

        for _ in 0..100 {
            if !outbox.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = outbox.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("[CQ:reply,id=5]"));
    }
}

//! OneBot v11 HTTP API notifier.

use crate::notifier::{Notifier, NotifyError};
use async_trait::async_trait;
use meterbot_core::GroupId;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Where the OneBot implementation's HTTP API listens.
#[derive(Clone)]
pub struct OneBotConfig {
    /// Base URL, e.g. `http://127.0.0.1:5700`.
    pub api_url: String,
    /// Sent as a bearer token when set.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for OneBotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneBotConfig")
            .field("api_url", &self.api_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5700".to_string(),
            access_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: Option<String>,
    #[serde(default)]
    retcode: i64,
    message: Option<String>,
    wording: Option<String>,
}

impl ApiResponse {
    fn reason(&self) -> String {
        [&self.wording, &self.message]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
            .cloned()
            .unwrap_or_default()
    }
}

pub struct OneBotNotifier {
    http: reqwest::Client,
    config: OneBotConfig,
}

impl OneBotNotifier {
    pub fn new(config: OneBotConfig) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), action)
    }
}

/// Numeric group ids go out as numbers, which every OneBot implementation accepts.
fn group_id_value(group: &GroupId) -> serde_json::Value {
    match group.as_str().parse::<i64>() {
        Ok(id) => serde_json::Value::from(id),
        Err(_) => serde_json::Value::from(group.as_str()),
    }
}

#[async_trait]
impl Notifier for OneBotNotifier {
    async fn send_group_message(&self, group: &GroupId, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "group_id": group_id_value(group),
            "message": text,
        });

        let mut request = self.http.post(self.endpoint("send_group_msg")).json(&body);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let reply: ApiResponse = response.json().await?;

        match reply.status.as_deref() {
            Some("ok") | Some("async") => {
                debug!(group = %group, "Group message sent");
                Ok(())
            }
            _ => {
                warn!(group = %group, retcode = reply.retcode, "OneBot rejected group message");
                Err(NotifyError::Rejected {
                    message: reply.reason(),
                    status: reply.status.unwrap_or_default(),
                    retcode: reply.retcode,
                })
            }
        }
    }
}

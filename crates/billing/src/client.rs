//! HTTP balance lookup.
//!
//! One GET per lookup, `openId=<account>` in the query string, bounded by a
//! client-wide timeout. No retries: a failed lookup is simply tried again on the
//! next sweep.

use crate::error::QueryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meterbot_core::{AccountBalance, AccountId};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Anything that can turn an account id into a balance.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn fetch(&self, account: &AccountId) -> Result<AccountBalance, QueryError>;
}

/// Configuration for the billing client.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Lookup endpoint, without query string.
    pub endpoint: String,
    /// Upper bound for one lookup, connect through body.
    pub timeout: Duration,
}

impl BillingConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "http://wechat.sdkdch.cn/wx/api/user/get";
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Billing API client.
#[derive(Clone)]
pub struct BillingClient {
    http: reqwest::Client,
    config: BillingConfig,
}

impl BillingClient {
    pub fn new(config: BillingConfig) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    async fn lookup(&self, account: &AccountId) -> Result<AccountBalance, QueryError> {
        if account.is_empty() {
            return Err(QueryError::EmptyAccount);
        }

        let response = self
            .http
            .get(&self.config.endpoint)
            .query(&[("openId", account.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(account = %account, status = %status, "Billing lookup HTTP failure");
            return Err(QueryError::Upstream {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {} {}", status, body.trim()),
            });
        }

        let body = response.text().await?;
        let parsed: LookupResponse = serde_json::from_str(&body)?;
        parsed.into_balance(account, Utc::now())
    }
}

#[async_trait]
impl BalanceSource for BillingClient {
    async fn fetch(&self, account: &AccountId) -> Result<AccountBalance, QueryError> {
        self.lookup(account).await
    }
}

/// Body returned by the lookup endpoint.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    code: Option<i64>,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    rows: Vec<AccountRow>,
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRow {
    user_number: Option<serde_json::Value>,
    user_name: Option<serde_json::Value>,
    balance: Option<serde_json::Value>,
    address: Option<serde_json::Value>,
    customer_name: Option<serde_json::Value>,
}

impl LookupResponse {
    fn into_balance(
        self,
        account: &AccountId,
        fetched_at: DateTime<Utc>,
    ) -> Result<AccountBalance, QueryError> {
        match self.code {
            Some(200) => {}
            Some(code) => {
                return Err(QueryError::Upstream {
                    code,
                    message: self.msg.unwrap_or_default(),
                })
            }
            None => return Err(QueryError::Malformed("missing `code` field".to_string())),
        }

        if self.total <= 0 {
            return Err(QueryError::NotFound);
        }
        let row = self.rows.into_iter().next().ok_or(QueryError::NotFound)?;

        let balance = row
            .balance
            .as_ref()
            .and_then(parse_decimal)
            .ok_or_else(|| QueryError::Malformed(format!("invalid balance: {:?}", row.balance)))?;

        Ok(AccountBalance {
            account_id: account.clone(),
            balance,
            user_number: row.user_number.as_ref().and_then(text),
            user_name: row.user_name.as_ref().and_then(text),
            address: row.address.as_ref().and_then(text),
            customer_name: row.customer_name.as_ref().and_then(text),
            fetched_at,
        })
    }
}

/// Balances arrive either as JSON numbers or as numeric strings.
fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
    let raw = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

fn text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

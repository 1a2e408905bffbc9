//! Outbound group messages.

use async_trait::async_trait;
use meterbot_core::{format_amount, GroupId, UserId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Message rejected (status {status}, retcode {retcode}): {message}")]
    Rejected {
        status: String,
        retcode: i64,
        message: String,
    },
}

/// Sends text to a chat group.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_group_message(&self, group: &GroupId, text: &str) -> Result<(), NotifyError>;
}

/// Low-balance alert mentioning the affected member.
pub fn format_low_balance_message(user: &UserId, balance: Decimal, threshold: Decimal) -> String {
    format!(
        "[CQ:at,qq={}] ⚠️ 电费余额提醒\n当前余额: {} 元，已低于 {} 元，请及时充值。",
        user,
        format_amount(balance),
        threshold.normalize()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_low_balance_message() {
        let text = format_low_balance_message(&UserId::from("2002"), dec!(15.5), dec!(30));
        assert!(text.starts_with("[CQ:at,qq=2002]"));
        assert!(text.contains("15.50"));
        assert!(text.contains("低于 30 元"));
    }

    #[test]
    fn test_threshold_keeps_meaningful_decimals() {
        let text = format_low_balance_message(&UserId::from("2002"), dec!(1), dec!(12.50));
        assert!(text.contains("低于 12.5 元"));
    }
}

//! Group chat commands.
//!
//! Menu and toggle are always answered. Everything else is ignored unless the
//! group's switch is on.

use crate::notifier::{Notifier, NotifyError};
use crate::store::{GroupStore, StoreError};
use crate::switch::SwitchStore;
use meterbot_billing::{extract_account_id, BalanceSource};
use meterbot_core::{AccountBalance, GroupId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const MENU: &str = "--- QFNU 电费查询助手 ---\n\
qfnueq - 开启/关闭本群电费查询功能 (管理员权限)\n\
qfnueqmenu - 显示此帮助菜单\n\
电费绑定 <链接> - 绑定你的微信openID链接\n\
查询 / 查电费 - 查询已绑定账号的电费余额\n\
电费解绑 - 解除当前账号的绑定\n\
微信openID链接获取方法：1.搜索微信公众号“Qsd学生公寓” 2.点击下方菜单栏 3.进入页面之后 4.点击右上角，点击复制链接\n\
--------------------------";

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Reply failed: {0}")]
    Notify(#[from] NotifyError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Menu,
    Toggle,
    /// Bind the sender to the account in this link.
    Bind(String),
    Query,
    Unbind,
}

impl Command {
    /// Parse a raw group message; `None` for anything that is not a command.
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.eq_ignore_ascii_case("qfnueqmenu") {
            return Some(Command::Menu);
        }
        if text.eq_ignore_ascii_case("qfnueq") {
            return Some(Command::Toggle);
        }
        match text {
            "查询" | "查电费" | "query" => return Some(Command::Query),
            "电费解绑" => return Some(Command::Unbind),
            _ => {}
        }

        let rest = text.strip_prefix("电费绑定")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let link = rest.trim_start();
        let lower = link.to_ascii_lowercase();
        let is_http = lower.starts_with("http://") || lower.starts_with("https://");
        if !is_http || link.contains(char::is_whitespace) {
            return None;
        }
        Some(Command::Bind(link.to_string()))
    }
}

/// A group message event, reduced to what commands need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub message_id: String,
    pub text: String,
}

/// Lookup result as shown to the member who asked.
pub fn format_account_report(account: &AccountBalance) -> String {
    let field = |value: &Option<String>| match value.as_deref() {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => "无".to_string(),
    };
    format!(
        "查询成功！\n用户编号: {}\n用户名: {}\n余额: {}\n地址: {}\n客户名称: {}",
        field(&account.user_number),
        field(&account.user_name),
        account.display_balance(),
        field(&account.address),
        field(&account.customer_name),
    )
}

pub struct CommandHandler {
    store: Arc<GroupStore>,
    switches: Arc<SwitchStore>,
    source: Arc<dyn BalanceSource>,
    notifier: Arc<dyn Notifier>,
    owners: HashSet<UserId>,
}

impl CommandHandler {
    pub fn new(
        store: Arc<GroupStore>,
        switches: Arc<SwitchStore>,
        source: Arc<dyn BalanceSource>,
        notifier: Arc<dyn Notifier>,
        owners: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            store,
            switches,
            source,
            notifier,
            owners: owners.into_iter().collect(),
        }
    }

    /// Handle one group message. Returns whether it was a command we acted on.
    pub async fn handle(&self, msg: &GroupMessage) -> Result<bool, CommandError> {
        let Some(command) = Command::parse(&msg.text) else {
            return Ok(false);
        };

        let always_on = matches!(command, Command::Menu | Command::Toggle);
        if !always_on && !self.switches.is_enabled(&msg.group_id).await {
            return Ok(false);
        }

        match command {
            Command::Menu => self.reply(msg, MENU).await?,
            Command::Toggle => self.toggle(msg).await?,
            Command::Bind(link) => self.bind(msg, &link).await?,
            Command::Query => self.query(msg).await?,
            Command::Unbind => self.unbind(msg).await?,
        }
        Ok(true)
    }

    async fn reply(&self, msg: &GroupMessage, text: &str) -> Result<(), NotifyError> {
        let text = format!("[CQ:reply,id={}]{}", msg.message_id, text);
        self.notifier.send_group_message(&msg.group_id, &text).await
    }

    async fn toggle(&self, msg: &GroupMessage) -> Result<(), CommandError> {
        if !self.owners.contains(&msg.user_id) {
            warn!(group = %msg.group_id, user = %msg.user_id, "Unauthorized toggle attempt");
            self.reply(msg, "❌❌❌你没有权限对电费查询功能进行操作,请联系管理员。")
                .await?;
            return Ok(());
        }

        let text = if self.switches.toggle(&msg.group_id).await? {
            "✅✅✅电费查询功能已开启"
        } else {
            "🚫🚫🚫电费查询功能已关闭"
        };
        self.reply(msg, text).await?;
        Ok(())
    }

    async fn bind(&self, msg: &GroupMessage, link: &str) -> Result<(), CommandError> {
        let Some(account) = extract_account_id(link) else {
            self.reply(msg, "❌ 无法从链接中提取openID，请检查链接格式。")
                .await?;
            return Ok(());
        };

        match self.store.bind(&msg.group_id, &msg.user_id, &account).await {
            Ok(()) => {
                info!(group = %msg.group_id, user = %msg.user_id, "Account bound");
                self.reply(msg, "✅ 绑定成功！").await?;
                Ok(())
            }
            Err(e) => {
                self.reply(msg, "❌ 绑定失败，请稍后再试。").await?;
                Err(e.into())
            }
        }
    }

    async fn query(&self, msg: &GroupMessage) -> Result<(), CommandError> {
        let Some(account) = self.store.binding(&msg.group_id, &msg.user_id).await else {
            self.reply(
                msg,
                "🤔 你还没有绑定openID，请使用【电费绑定 <链接>】命令进行绑定。",
            )
            .await?;
            return Ok(());
        };

        self.reply(msg, "🔍 正在查询电费信息...").await?;
        let text = match self.source.fetch(&account).await {
            Ok(balance) => format_account_report(&balance),
            Err(e) => {
                warn!(group = %msg.group_id, user = %msg.user_id, error = %e, "Interactive lookup failed");
                e.user_message()
            }
        };
        self.reply(msg, &text).await?;
        Ok(())
    }

    async fn unbind(&self, msg: &GroupMessage) -> Result<(), CommandError> {
        let text = if self.store.unbind(&msg.group_id, &msg.user_id).await? {
            info!(group = %msg.group_id, user = %msg.user_id, "Account unbound");
            "✅ 解绑成功！"
        } else {
            "🤔 你尚未绑定openID，无需解绑。"
        };
        self.reply(msg, text).await?;
        Ok(())
    }
}

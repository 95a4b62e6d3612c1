//! Notification collaborator
//!
//! The core only calls [`Notifier`]; transports live outside this crate.
//! [`LogNotifier`] writes every notification as a structured tracing event.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::trading::TradeSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
    Trade,
    Profit,
    Loss,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
            NotificationKind::Trade => "trade",
            NotificationKind::Profit => "profit",
            NotificationKind::Loss => "loss",
        }
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, message: &str, kind: NotificationKind, data: Value);

    async fn notify_trade_execution(
        &self,
        side: TradeSide,
        mint: &str,
        amount: f64,
        price: f64,
        signature: &str,
    ) {
        let message = format!("{} executed for {}", side.as_str().to_uppercase(), mint);
        let data = json!({
            "tradeType": side.as_str(),
            "tokenMint": mint,
            "amount": amount,
            "price": price,
            "txHash": signature,
            "timestamp": timestamp(),
        });
        self.send_notification(&message, NotificationKind::Trade, data).await;
    }

    async fn notify_profit_target(&self, mint: &str, profit_ratio: f64, amount: f64) {
        let message = format!("Profit target reached for {}: {:.2}x", mint, profit_ratio);
        let data = json!({
            "tokenMint": mint,
            "profitRatio": profit_ratio,
            "amount": amount,
            "timestamp": timestamp(),
        });
        self.send_notification(&message, NotificationKind::Profit, data).await;
    }

    async fn notify_stop_loss(&self, mint: &str, loss_ratio: f64, amount: f64) {
        let message = format!("Stop loss triggered for {}: {:.2}x", mint, loss_ratio);
        let data = json!({
            "tokenMint": mint,
            "lossRatio": loss_ratio,
            "amount": amount,
            "timestamp": timestamp(),
        });
        self.send_notification(&message, NotificationKind::Loss, data).await;
    }

    async fn notify_position_update(&self, action: &str, mint: &str, details: Value) {
        let message = format!("Position {}: {}", action, mint);
        let data = json!({
            "action": action,
            "mint": mint,
            "details": details,
            "timestamp": timestamp(),
        });
        self.send_notification(&message, NotificationKind::Info, data).await;
    }

    async fn notify_error(&self, error: &str, context: &str) {
        let message = format!("Error in {}: {}", context, error);
        let data = json!({
            "error": error,
            "context": context,
            "timestamp": timestamp(),
        });
        self.send_notification(&message, NotificationKind::Error, data).await;
    }

    async fn notify_bot_status(&self, status: &str, details: Value) {
        let message = format!("Bot Status: {}", status);
        let data = json!({
            "status": status,
            "details": details,
            "timestamp": timestamp(),
        });
        self.send_notification(&message, NotificationKind::Info, data).await;
    }
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_notification(&self, message: &str, kind: NotificationKind, data: Value) {
        match kind {
            NotificationKind::Error => {
                error!(kind = kind.as_str(), data = %data, "{}", message)
            }
            NotificationKind::Warning | NotificationKind::Loss => {
                warn!(kind = kind.as_str(), data = %data, "{}", message)
            }
            _ => info!(kind = kind.as_str(), data = %data, "{}", message),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captures notifications for assertions
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, NotificationKind, Value)>>,
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(m, _, _)| m.clone()).collect()
        }

        pub fn count_kind(&self, kind: NotificationKind) -> usize {
            self.sent.lock().unwrap().iter().filter(|(_, k, _)| *k == kind).count()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_notification(&self, message: &str, kind: NotificationKind, data: Value) {
            self.sent
                .lock()
                .unwrap()
                .push((message.to_string(), kind, data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;

    #[tokio::test]
    async fn test_helpers_format_messages() {
        let notifier = RecordingNotifier::default();

        notifier
            .notify_trade_execution(TradeSide::Buy, "MintA", 0.1, 0.000002, "sig")
            .await;
        notifier.notify_profit_target("MintA", 2.456, 0.25).await;
        notifier.notify_stop_loss("MintB", 0.4, 0.04).await;
        notifier.notify_position_update("closed", "MintA", json!({})).await;
        notifier.notify_error("boom", "buy").await;
        notifier.notify_bot_status("started", json!({})).await;

        assert_eq!(
            notifier.messages(),
            vec![
                "BUY executed for MintA",
                "Profit target reached for MintA: 2.46x",
                "Stop loss triggered for MintB: 0.40x",
                "Position closed: MintA",
                "Error in buy: boom",
                "Bot Status: started",
            ]
        );
        assert_eq!(notifier.count_kind(NotificationKind::Trade), 1);
        assert_eq!(notifier.count_kind(NotificationKind::Info), 2);
    }

    #[tokio::test]
    async fn test_log_notifier_does_not_panic() {
        LogNotifier
            .send_notification("hello", NotificationKind::Warning, json!({"k": 1}))
            .await;
    }
}

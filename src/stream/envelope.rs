//! Transaction envelopes delivered by the stream
//!
//! Only the fields the detector reads are modelled; everything else in the
//! notification is ignored.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Token amount as reported by the RPC node
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    /// Null for zero balances on some nodes
    #[serde(default)]
    pub ui_amount: Option<f64>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub amount: Option<String>,
}

/// One entry of `preTokenBalances` / `postTokenBalances`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    #[serde(default)]
    pub account_index: Option<u32>,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub ui_token_amount: UiTokenAmount,
}

impl TokenBalance {
    pub fn ui_amount(&self) -> f64 {
        self.ui_token_amount.ui_amount.unwrap_or(0.0)
    }

    pub fn owned_by(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }
}

/// Transaction status metadata
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
}

/// A streamed transaction reduced to what detection needs
#[derive(Debug, Clone)]
pub struct TransactionEnvelope {
    pub signature: String,
    pub slot: u64,
    pub meta: TransactionMeta,
}

impl TransactionEnvelope {
    /// All three lists the detector reads are present
    pub fn is_complete(&self) -> bool {
        self.meta.log_messages.is_some()
            && self.meta.pre_token_balances.is_some()
            && self.meta.post_token_balances.is_some()
    }

    pub fn log_messages(&self) -> &[String] {
        self.meta.log_messages.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Deserialize)]
struct Notification {
    method: Option<String>,
    params: Option<NotificationParams>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: NotificationResult,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    slot: u64,
    transaction: NotifiedTransaction,
}

#[derive(Debug, Deserialize)]
struct NotifiedTransaction {
    #[serde(default)]
    meta: Option<TransactionMeta>,
}

/// Decode one text frame from a `transactionSubscribe` stream
///
/// Returns `Ok(None)` for frames that carry no transaction (subscription
/// acks, unrelated methods).
pub fn decode_notification(text: &str) -> Result<Option<TransactionEnvelope>> {
    let frame: Notification = serde_json::from_str(text)
        .map_err(|e| Error::MalformedEvent(format!("invalid frame: {}", e)))?;

    if let Some(err) = frame.error {
        return Err(Error::StreamConnection(format!("subscription rejected: {}", err)));
    }

    if frame.method.as_deref() != Some("transactionNotification") {
        return Ok(None);
    }

    let params = frame
        .params
        .ok_or_else(|| Error::MalformedEvent("notification without params".into()))?;

    let result = params.result;
    Ok(Some(TransactionEnvelope {
        signature: result.signature,
        slot: result.slot,
        meta: result.transaction.meta.unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFICATION: &str = r#"{
        "jsonrpc": "2.0",
        "method": "transactionNotification",
        "params": {
            "subscription": 4743323479349712,
            "result": {
                "transaction": {
                    "transaction": {"signatures": ["5h3k"]},
                    "meta": {
                        "err": null,
                        "logMessages": ["Program log: Instruction: MintTo"],
                        "preTokenBalances": [
                            {"accountIndex": 3, "mint": "So11111111111111111111111111111111111111112",
                             "owner": "WLHv2UAZm6z4KyaaELi5pjdbJh6RESMva1Rnn8pJVVh",
                             "uiTokenAmount": {"uiAmount": 5.0, "decimals": 9, "amount": "5000000000"}}
                        ],
                        "postTokenBalances": [
                            {"accountIndex": 3, "mint": "So11111111111111111111111111111111111111112",
                             "owner": "WLHv2UAZm6z4KyaaELi5pjdbJh6RESMva1Rnn8pJVVh",
                             "uiTokenAmount": {"uiAmount": 5.2, "decimals": 9, "amount": "5200000000"}}
                        ]
                    }
                },
                "signature": "5h3k",
                "slot": 301234567
            }
        }
    }"#;

    #[test]
    fn test_decode_notification() {
        let envelope = decode_notification(NOTIFICATION).unwrap().unwrap();
        assert_eq!(envelope.signature, "5h3k");
        assert_eq!(envelope.slot, 301234567);
        assert!(envelope.is_complete());
        assert_eq!(envelope.log_messages().len(), 1);

        let post = envelope.meta.post_token_balances.unwrap();
        assert_eq!(post[0].ui_amount(), 5.2);
        assert!(post[0].owned_by("WLHv2UAZm6z4KyaaELi5pjdbJh6RESMva1Rnn8pJVVh"));
    }

    #[test]
    fn test_subscription_ack_is_skipped() {
        let ack = r#"{"jsonrpc":"2.0","result":4743323479349712,"id":1}"#;
        assert!(decode_notification(ack).unwrap().is_none());
    }

    #[test]
    fn test_missing_meta_is_incomplete_not_error() {
        let frame = r#"{"jsonrpc":"2.0","method":"transactionNotification",
            "params":{"result":{"signature":"x","slot":1,"transaction":{}}}}"#;
        let envelope = decode_notification(frame).unwrap().unwrap();
        assert!(!envelope.is_complete());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = decode_notification("not json").unwrap_err();
        assert!(matches!(err, Error::MalformedEvent(_)));
    }

    #[test]
    fn test_rpc_error_frame() {
        let frame = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":1}"#;
        let err = decode_notification(frame).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_null_ui_amount_reads_as_zero() {
        let balance: TokenBalance = serde_json::from_str(
            r#"{"mint":"m","owner":"o","uiTokenAmount":{"uiAmount":null,"decimals":6,"amount":"0"}}"#,
        )
        .unwrap();
        assert_eq!(balance.ui_amount(), 0.0);
    }
}

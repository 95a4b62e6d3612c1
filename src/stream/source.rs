//! Transaction stream transports
//!
//! The ingestor only sees [`TransactionSource`]; the WebSocket implementation
//! speaks the `transactionSubscribe` JSON-RPC method.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::stream::envelope::{decode_notification, TransactionEnvelope};

/// Stream of decoded envelopes. An `Err` item that is not
/// `Error::MalformedEvent` ends the subscription.
pub type EnvelopeStream = BoxStream<'static, Result<TransactionEnvelope>>;

/// Server-side filter for one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub account_include: Vec<String>,
    pub commitment: String,
}

impl SubscribeRequest {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            account_include: config.account_include.clone(),
            commitment: config.commitment.clone(),
        }
    }

    /// JSON-RPC `transactionSubscribe` body
    pub fn to_json_rpc(&self, id: u64) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "transactionSubscribe",
            "params": [
                {
                    "accountInclude": self.account_include,
                    "vote": false,
                    "failed": false
                },
                {
                    "commitment": self.commitment,
                    "encoding": "jsonParsed",
                    "transactionDetails": "full",
                    "showRewards": false,
                    "maxSupportedTransactionVersion": 0
                }
            ]
        })
    }
}

/// A filtered transaction feed
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Open one subscription. Dropping the returned stream closes it.
    async fn subscribe(&self, request: &SubscribeRequest) -> Result<EnvelopeStream>;
}

/// `transactionSubscribe` over a WebSocket
pub struct WebSocketSource {
    ws_url: String,
    ping_interval: Duration,
}

impl WebSocketSource {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
        }
    }
}

#[async_trait]
impl TransactionSource for WebSocketSource {
    async fn subscribe(&self, request: &SubscribeRequest) -> Result<EnvelopeStream> {
        let url = url::Url::parse(&self.ws_url)
            .map_err(|e| Error::Config(format!("Invalid WebSocket URL: {}", e)))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::StreamConnection(format!("WebSocket connect failed: {}", e)))?;

        let (mut write, read) = ws_stream.split();

        let body = serde_json::to_string(&request.to_json_rpc(1))?;
        write
            .send(Message::Text(body))
            .await
            .map_err(|e| Error::StreamConnection(format!("Failed to subscribe: {}", e)))?;

        info!(
            accounts = ?request.account_include,
            commitment = %request.commitment,
            "Subscribed to transaction stream"
        );

        let mut ping_timer = tokio::time::interval(self.ping_interval);
        ping_timer.tick().await;

        let state = (write, read, ping_timer, false);
        let stream = stream::unfold(state, |(mut write, mut read, mut ping_timer, done)| async move {
            if done {
                return None;
            }

            loop {
                tokio::select! {
                    _ = ping_timer.tick() => {
                        if let Err(e) = write.send(Message::Ping(vec![])).await {
                            let err = Error::StreamConnection(format!("ping failed: {}", e));
                            return Some((Err(err), (write, read, ping_timer, true)));
                        }
                        debug!("Sent ping");
                    }

                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match decode_notification(&text) {
                                Ok(Some(envelope)) => {
                                    return Some((Ok(envelope), (write, read, ping_timer, false)));
                                }
                                Ok(None) => continue,
                                Err(e) => {
                                    let fatal = !matches!(e, Error::MalformedEvent(_));
                                    return Some((Err(e), (write, read, ping_timer, fatal)));
                                }
                            },
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = write.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("WebSocket closed by server");
                                return Some((Err(Error::StreamDisconnected), (write, read, ping_timer, true)));
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!("WebSocket error: {}", e);
                                let err = Error::StreamConnection(e.to_string());
                                return Some((Err(err), (write, read, ping_timer, true)));
                            }
                            None => {
                                info!("WebSocket stream ended");
                                return None;
                            }
                        }
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

//! Quote/swap routing service client
//!
//! Jupiter-compatible HTTP API:
//! - `GET {base}/quote?inputMint&outputMint&amount&slippageBps`
//! - `POST {base}/swap` returning a base64 `swapTransaction`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Base units of the input asset
    pub amount: u64,
    pub slippage_bps: u32,
}

/// Quote object; `raw` is passed back to the swap call untouched
#[derive(Debug, Clone)]
pub struct QuoteResponse {
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub raw: Value,
}

impl QuoteResponse {
    pub fn from_value(raw: Value) -> Result<Self> {
        let in_amount = amount_field(&raw, "inAmount")?;
        let out_amount = amount_field(&raw, "outAmount")?;
        let price_impact_pct = raw
            .get("priceImpactPct")
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                other => other.as_f64(),
            })
            .unwrap_or(0.0);

        Ok(Self {
            in_amount,
            out_amount,
            price_impact_pct,
            raw,
        })
    }
}

fn amount_field(raw: &Value, name: &str) -> Result<u64> {
    match raw.get(name) {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| Error::Quote(format!("invalid {}: {}", name, s))),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| Error::Quote(format!("invalid {}: {}", name, n))),
        _ => Err(Error::Quote(format!("quote missing {}", name))),
    }
}

/// How the routing service should price inclusion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrioritizationFee {
    /// Flat priority fee in lamports
    Lamports(u64),
    /// Tip forwarded by the service to the block engine
    JitoTip {
        #[serde(rename = "jitoTipLamports")]
        jito_tip_lamports: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub user_public_key: String,
    pub quote_response: Value,
    pub wrap_and_unwrap_sol: bool,
    pub dynamic_compute_unit_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prioritization_fee_lamports: Option<PrioritizationFee>,
}

impl SwapRequest {
    pub fn new(user_public_key: String, quote: &QuoteResponse) -> Self {
        Self {
            user_public_key,
            quote_response: quote.raw.clone(),
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
            prioritization_fee_lamports: None,
        }
    }

    pub fn with_fee(mut self, fee: Option<PrioritizationFee>) -> Self {
        self.prioritization_fee_lamports = fee;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    /// Base64 serialized, unsigned versioned transaction
    pub swap_transaction: String,
    #[serde(default)]
    pub last_valid_block_height: u64,
    #[serde(default)]
    pub prioritization_fee_lamports: u64,
}

/// External quote/swap service
#[async_trait]
pub trait SwapRouter: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse>;

    async fn swap_transaction(&self, request: &SwapRequest) -> Result<SwapResponse>;
}

/// HTTP client for a Jupiter-compatible aggregator
pub struct JupiterRouter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JupiterRouter {
    pub fn new(config: &ExecutionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = if config.quote_api_key.is_empty() {
            None
        } else {
            Some(config.quote_api_key.clone())
        };

        Ok(Self {
            client,
            base_url: config.quote_api_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Failed to read response: {}", e)))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Http("Rate limit exceeded".into()));
        }
        if !status.is_success() {
            return Err(Error::Quote(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[async_trait]
impl SwapRouter for JupiterRouter {
    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse> {
        let url = format!("{}/quote", self.base_url);
        debug!(
            input = %request.input_mint,
            output = %request.output_mint,
            amount = request.amount,
            "Requesting quote"
        );

        let builder = self.client.get(&url).query(&[
            ("inputMint", request.input_mint.as_str()),
            ("outputMint", request.output_mint.as_str()),
            ("amount", &request.amount.to_string()),
            ("slippageBps", &request.slippage_bps.to_string()),
        ]);

        let response = self.with_key(builder).send().await?;
        let raw = Self::read_json(response).await?;

        if let Some(err) = raw.get("error").and_then(Value::as_str) {
            return Err(Error::Quote(err.to_string()));
        }

        QuoteResponse::from_value(raw)
    }

    async fn swap_transaction(&self, request: &SwapRequest) -> Result<SwapResponse> {
        let url = format!("{}/swap", self.base_url);

        let builder = self.client.post(&url).json(request);
        let response = self.with_key(builder).send().await?;
        let raw = Self::read_json(response).await?;

        let swap: SwapResponse = serde_json::from_value(raw)
            .map_err(|e| Error::TransactionBuild(format!("Failed to get swap transaction data: {}", e)))?;

        if swap.swap_transaction.is_empty() {
            return Err(Error::TransactionBuild("Failed to get swap transaction data".into()));
        }

        Ok(swap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base url
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_error_body_cut_on_char_boundary() {
        // Two-byte character straddles byte 200
        let body = format!("{}é tail", "a".repeat(199));
        let base = serve_once("500 Internal Server Error", body).await;
        let router = JupiterRouter::new(&ExecutionConfig {
            quote_api_url: base,
            ..ExecutionConfig::default()
        })
        .unwrap();

        let err = router
            .quote(&QuoteRequest {
                input_mint: "So11111111111111111111111111111111111111112".into(),
                output_mint: "MintA".into(),
                amount: 1_000,
                slippage_bps: 100,
            })
            .await
            .unwrap_err();

        match err {
            Error::Quote(message) => {
                assert!(message.starts_with("HTTP 500"));
                assert!(message.ends_with(&format!("{}é", "a".repeat(199))));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_quote_from_value() {
        let quote = QuoteResponse::from_value(json!({
            "inputMint": "So11111111111111111111111111111111111111112",
            "inAmount": "100000000",
            "outputMint": "MintA",
            "outAmount": "35000000000",
            "priceImpactPct": "0.012",
            "routePlan": []
        }))
        .unwrap();

        assert_eq!(quote.in_amount, 100_000_000);
        assert_eq!(quote.out_amount, 35_000_000_000);
        assert!((quote.price_impact_pct - 0.012).abs() < 1e-12);
        assert!(quote.raw.get("routePlan").is_some());
    }

    #[test]
    fn test_quote_missing_amount() {
        let err = QuoteResponse::from_value(json!({"inAmount": "1"})).unwrap_err();
        assert!(matches!(err, Error::Quote(_)));
    }

    #[test]
    fn test_swap_request_fee_shapes() {
        let quote = QuoteResponse::from_value(json!({"inAmount": "1", "outAmount": "2"})).unwrap();

        let flat = SwapRequest::new("User".into(), &quote)
            .with_fee(Some(PrioritizationFee::Lamports(10_000)));
        let body = serde_json::to_value(&flat).unwrap();
        assert_eq!(body["prioritizationFeeLamports"], 10_000);
        assert_eq!(body["userPublicKey"], "User");
        assert_eq!(body["wrapAndUnwrapSol"], true);
        assert_eq!(body["quoteResponse"]["outAmount"], "2");

        let tip = SwapRequest::new("User".into(), &quote).with_fee(Some(PrioritizationFee::JitoTip {
            jito_tip_lamports: 100_000,
        }));
        let body = serde_json::to_value(&tip).unwrap();
        assert_eq!(body["prioritizationFeeLamports"]["jitoTipLamports"], 100_000);

        let none = SwapRequest::new("User".into(), &quote).with_fee(None);
        let body = serde_json::to_value(&none).unwrap();
        assert!(body.get("prioritizationFeeLamports").is_none());
    }

    #[test]
    fn test_router_trims_base_url() {
        let config = ExecutionConfig {
            quote_api_url: "https://quote.example.com/swap/v1/".into(),
            ..ExecutionConfig::default()
        };
        let router = JupiterRouter::new(&config).unwrap();
        assert_eq!(router.base_url, "https://quote.example.com/swap/v1");
        assert!(router.api_key.is_none());
    }
}

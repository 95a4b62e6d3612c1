//! Stream ingestion
//!
//! Owns the single live subscription, runs detection on each envelope and
//! pushes candidates into a bounded queue drained by one consumer.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::detector::{LaunchCandidate, OpportunityDetector, Verdict};
use crate::error::Error;
use crate::stream::source::{EnvelopeStream, SubscribeRequest, TransactionSource};

/// Counters exposed for status reporting
#[derive(Debug, Default)]
pub struct IngestorStats {
    received: AtomicU64,
    malformed: AtomicU64,
    incomplete: AtomicU64,
    candidates: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestorSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub incomplete: u64,
    pub candidates: u64,
    pub reconnects: u64,
}

impl IngestorStats {
    pub fn snapshot(&self) -> IngestorSnapshot {
        IngestorSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            incomplete: self.incomplete.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// How a subscription ended
enum StreamEnd {
    /// Source closed or failed; reconnect if still active
    Disconnected,
    /// Flag flipped or consumer gone
    Stopped,
}

pub struct StreamIngestor {
    source: Arc<dyn TransactionSource>,
    detector: Arc<OpportunityDetector>,
    request: SubscribeRequest,
    reconnect_delay: Duration,
    active: Arc<AtomicBool>,
    stats: Arc<IngestorStats>,
}

impl StreamIngestor {
    pub fn new(
        source: Arc<dyn TransactionSource>,
        detector: Arc<OpportunityDetector>,
        request: SubscribeRequest,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            source,
            detector,
            request,
            reconnect_delay,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(IngestorStats::default()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> IngestorSnapshot {
        self.stats.snapshot()
    }

    /// Suppress new dispatch; the loop exits on its next check
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Stream ingestor stopping");
        }
    }

    /// Spawn the subscribe/reconnect loop
    pub fn start(&self, queue: async_channel::Sender<LaunchCandidate>) -> JoinHandle<()> {
        self.active.store(true, Ordering::SeqCst);

        let source = self.source.clone();
        let detector = self.detector.clone();
        let request = self.request.clone();
        let delay = self.reconnect_delay;
        let active = self.active.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            info!("Stream ingestor started");

            while active.load(Ordering::SeqCst) {
                match source.subscribe(&request).await {
                    Ok(stream) => {
                        let end = Self::consume(stream, &detector, &queue, &active, &stats).await;
                        if matches!(end, StreamEnd::Stopped) {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Stream subscription failed: {}", e);
                    }
                }

                if !active.load(Ordering::SeqCst) {
                    break;
                }

                stats.reconnects.fetch_add(1, Ordering::Relaxed);
                warn!("Reconnecting in {:?}...", delay);
                sleep(delay).await;
            }

            active.store(false, Ordering::SeqCst);
            info!("Stream ingestor stopped");
        })
    }

    async fn consume(
        mut stream: EnvelopeStream,
        detector: &OpportunityDetector,
        queue: &async_channel::Sender<LaunchCandidate>,
        active: &AtomicBool,
        stats: &IngestorStats,
    ) -> StreamEnd {
        while let Some(item) = stream.next().await {
            if !active.load(Ordering::SeqCst) {
                return StreamEnd::Stopped;
            }

            let envelope = match item {
                Ok(envelope) => envelope,
                Err(Error::MalformedEvent(reason)) => {
                    stats.malformed.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropped malformed frame: {}", reason);
                    continue;
                }
                Err(e) => {
                    warn!("Stream error: {}", e);
                    return StreamEnd::Disconnected;
                }
            };

            stats.received.fetch_add(1, Ordering::Relaxed);
            if !envelope.is_complete() {
                stats.incomplete.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if let Verdict::Candidate(candidate) = detector.evaluate(&envelope) {
                stats.candidates.fetch_add(1, Ordering::Relaxed);
                info!(
                    mint = %candidate.mint,
                    pool = %candidate.pool_status,
                    sol_delta = candidate.sol_delta,
                    signature = %candidate.signature,
                    "Launch candidate detected"
                );

                // Bounded: waits while the consumer is busy
                if queue.send(candidate).await.is_err() {
                    warn!("Candidate queue closed");
                    return StreamEnd::Stopped;
                }
            }
        }

        StreamEnd::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, StreamConfig, DEFAULT_POOL_AUTHORITY, WSOL_MINT};
    use crate::error::Result;
    use crate::stream::envelope::{TokenBalance, TransactionEnvelope, TransactionMeta, UiTokenAmount};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Replays one scripted batch per subscribe call
    struct ScriptedSource {
        batches: Mutex<Vec<Vec<Result<TransactionEnvelope>>>>,
        subscribes: AtomicU64,
    }

    impl ScriptedSource {
        fn new(mut batches: Vec<Vec<Result<TransactionEnvelope>>>) -> Self {
            batches.reverse();
            Self {
                batches: Mutex::new(batches),
                subscribes: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl TransactionSource for ScriptedSource {
        async fn subscribe(&self, _request: &SubscribeRequest) -> Result<EnvelopeStream> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let next = self.batches.lock().unwrap().pop();
            match next {
                Some(batch) => Ok(stream::iter(batch).boxed()),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn balance(owner: &str, mint: &str, ui: f64) -> TokenBalance {
        TokenBalance {
            account_index: None,
            mint: mint.to_string(),
            owner: Some(owner.to_string()),
            ui_token_amount: UiTokenAmount {
                ui_amount: Some(ui),
                decimals: Some(6),
                amount: None,
            },
        }
    }

    fn launch(signature: &str, mint: &str) -> TransactionEnvelope {
        TransactionEnvelope {
            signature: signature.to_string(),
            slot: 1,
            meta: TransactionMeta {
                err: None,
                log_messages: Some(vec!["Program log: Instruction: MintTo".to_string()]),
                pre_token_balances: Some(vec![balance(DEFAULT_POOL_AUTHORITY, WSOL_MINT, 1.0)]),
                post_token_balances: Some(vec![
                    balance(DEFAULT_POOL_AUTHORITY, WSOL_MINT, 3.0),
                    balance("Creator1111111111111111111111111111111111111", mint, 10.0),
                ]),
            },
        }
    }

    fn ingestor(source: Arc<dyn TransactionSource>) -> StreamIngestor {
        StreamIngestor::new(
            source,
            Arc::new(OpportunityDetector::new(DetectorConfig::default())),
            SubscribeRequest::from_config(&StreamConfig::default()),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_reconnects_after_stream_error() {
        let source = Arc::new(ScriptedSource::new(vec![
            vec![Ok(launch("s1", "MintA")), Err(Error::StreamDisconnected)],
            vec![Ok(launch("s2", "MintB"))],
        ]));
        let ingestor = ingestor(source.clone());
        let (tx, rx) = async_channel::bounded(8);

        let handle = ingestor.start(tx);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.mint, "MintA");
        assert_eq!(second.mint, "MintB");

        ingestor.stop();
        handle.abort();

        assert!(source.subscribes.load(Ordering::SeqCst) >= 2);
        assert!(ingestor.stats().reconnects >= 1);
        assert_eq!(ingestor.stats().candidates, 2);
    }

    #[tokio::test]
    async fn test_malformed_and_incomplete_items_are_dropped() {
        let mut incomplete = launch("s2", "MintB");
        incomplete.meta.pre_token_balances = None;

        let source = Arc::new(ScriptedSource::new(vec![vec![
            Err(Error::MalformedEvent("bad frame".into())),
            Ok(incomplete),
            Ok(launch("s3", "MintC")),
        ]]));
        let ingestor = ingestor(source);
        let (tx, rx) = async_channel::bounded(8);

        let handle = ingestor.start(tx);
        let candidate = rx.recv().await.unwrap();
        assert_eq!(candidate.mint, "MintC");

        ingestor.stop();
        handle.abort();

        let stats = ingestor.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.received, 2);
    }

    #[tokio::test]
    async fn test_closed_queue_stops_loop() {
        let source = Arc::new(ScriptedSource::new(vec![vec![Ok(launch("s1", "MintA"))]]));
        let ingestor = ingestor(source);
        let (tx, rx) = async_channel::bounded(1);
        drop(rx);

        let handle = ingestor.start(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should exit")
            .unwrap();
        assert!(!ingestor.is_active());
    }
}

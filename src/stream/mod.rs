//! Stream module - transaction ingestion
//!
//! A [`TransactionSource`] yields decoded transaction envelopes; the
//! [`StreamIngestor`] classifies them and queues launch candidates.

pub mod envelope;
pub mod ingestor;
pub mod source;

pub use envelope::{TokenBalance, TransactionEnvelope, TransactionMeta, UiTokenAmount};
pub use ingestor::{IngestorSnapshot, StreamIngestor};
pub use source::{EnvelopeStream, SubscribeRequest, TransactionSource, WebSocketSource};

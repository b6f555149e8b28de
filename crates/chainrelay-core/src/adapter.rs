//! The `ProtocolAdapter` trait and the events adapters emit.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ─▶ Connecting ─▶ Subscribed (push) ─┐
//!                     ▲         Polling    (poll) ─┤─▶ EventReady ─▶ back
//!                     └── backoff on I/O failure ◀─┘
//!                                   shutdown ─▶ Closing ─▶ Closed
//! ```
//!
//! An adapter is driven by exactly one task. It owns its connection and its
//! query state, writes events into a bounded `EventSink`, and stops as soon
//! as its `Shutdown` fires. Nothing is emitted after that point.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::canonical::CanonicalRequest;
use crate::error::AdapterError;
use crate::metrics::SourcePing;

/// A raw event produced by an adapter, before decoding and job matching.
#[derive(Debug, Clone, PartialEq)]
pub enum RawChainEvent {
    /// ABI-packed oracle request log from an EVM-family chain.
    Log(LogEvent),
    /// A request an adapter has already structured (Substrate, Tezos, Ontology).
    Request(StructuredRequest),
}

/// An EVM-style log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub address: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    /// Block or epoch number, if the node reported one.
    pub position: Option<u64>,
}

impl LogEvent {
    /// The job id topic of a runlog (`topics[1]`).
    pub fn job_topic(&self) -> Option<&str> {
        self.topics.get(1).map(String::as_str)
    }
}

/// A structured request with the job id the chain embedded in it.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRequest {
    pub job_id: String,
    pub fields: CanonicalRequest,
}

/// Bounded handoff from an adapter to its subscription's pump task.
pub type EventSink = mpsc::Sender<RawChainEvent>;

/// Adapter lifecycle states, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Subscribed,
    Polling,
    Closing,
    Closed,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Polling => "polling",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Receiving half of a subscription's shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Returns `true` once shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve when shutdown is requested or the trigger is dropped.
    pub async fn triggered(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending half of a subscription's shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Create a linked shutdown trigger/receiver pair.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

/// Hand an event to the sink unless shutdown wins the race.
///
/// Returns `false` when the adapter should stop: shutdown was requested or
/// the consumer is gone.
pub async fn emit(sink: &EventSink, event: RawChainEvent, shutdown: &mut Shutdown) -> bool {
    if shutdown.is_triggered() {
        return false;
    }
    tokio::select! {
        biased;
        _ = shutdown.triggered() => false,
        res = sink.send(event) => res.is_ok(),
    }
}

/// One live connection to a node for one subscription.
#[async_trait]
pub trait ProtocolAdapter: Send {
    /// Short label for logs, e.g. `"eth/poll"`.
    fn name(&self) -> &str;

    /// Liveness handle to touch whenever the node answers or pushes a message.
    fn set_source_ping(&mut self, _ping: SourcePing) {}

    /// Check the node is reachable before the subscription is activated.
    ///
    /// Poll adapters may use the answer to seed their range cursor.
    async fn test_connection(&mut self) -> Result<(), AdapterError>;

    /// Drive the adapter until `shutdown` fires.
    ///
    /// Transient failures are handled inside (reconnect or skip the tick);
    /// an `Err` means the adapter cannot continue at all.
    async fn run(&mut self, sink: EventSink, shutdown: Shutdown) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RawChainEvent {
        RawChainEvent::Request(StructuredRequest {
            job_id: "job".into(),
            fields: CanonicalRequest::new(),
        })
    }

    #[tokio::test]
    async fn emit_delivers_while_running() {
        let (_trigger, mut shutdown) = shutdown_channel();
        let (tx, mut rx) = mpsc::channel(1);
        assert!(emit(&tx, request(), &mut shutdown).await);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn emit_refuses_after_shutdown() {
        let (trigger, mut shutdown) = shutdown_channel();
        let (tx, mut rx) = mpsc::channel(1);
        trigger.trigger();
        assert!(!emit(&tx, request(), &mut shutdown).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_unblocks_full_sink() {
        let (trigger, mut shutdown) = shutdown_channel();
        let (tx, _rx) = mpsc::channel(1);
        tx.send(request()).await.unwrap();
        let pending = tokio::spawn(async move { emit(&tx, request(), &mut shutdown).await });
        trigger.trigger();
        assert!(!pending.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = shutdown_channel();
        drop(trigger);
        shutdown.triggered().await;
    }

    #[test]
    fn job_topic_is_second_topic() {
        let log = LogEvent {
            address: "0x1".into(),
            topics: vec!["0xaa".into(), "0xbb".into()],
            data: vec![],
            position: None,
        };
        assert_eq!(log.job_topic(), Some("0xbb"));
    }
}

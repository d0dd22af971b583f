//! Epoch-guarded inbox between asynchronous producers and the session tick.
//!
//! Remote callbacks and host-side recognizers never touch session state.
//! They enqueue here and the tick drains. Every sender is bound to the epoch
//! it was created in; once the session bumps the epoch (stop or restart) old
//! senders enqueue nothing, and anything they queued earlier is discarded at
//! drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::analysis::RecognitionResult;
use crate::remote::{CoachingFeedback, RemoteChordResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InboxPayload {
    Recognition(RecognitionResult),
    Remote(RemoteChordResult),
    ChannelConnected,
    ChannelDegraded(String),
    Feedback(CoachingFeedback),
}

struct InboxItem {
    epoch: u64,
    payload: InboxPayload,
}

#[derive(Clone)]
pub(crate) struct InboxSender {
    tx: mpsc::UnboundedSender<InboxItem>,
    current: Arc<AtomicU64>,
    epoch: u64,
}

impl InboxSender {
    /// Returns false when the sender's epoch is over
    pub(crate) fn push(&self, payload: InboxPayload) -> bool {
        if self.current.load(Ordering::SeqCst) != self.epoch {
            return false;
        }
        self.tx
            .send(InboxItem {
                epoch: self.epoch,
                payload,
            })
            .is_ok()
    }
}

pub(crate) struct ResultInbox {
    tx: mpsc::UnboundedSender<InboxItem>,
    rx: mpsc::UnboundedReceiver<InboxItem>,
    current: Arc<AtomicU64>,
}

impl ResultInbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Invalidate every sender handed out so far
    pub(crate) fn bump_epoch(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn sender(&self) -> InboxSender {
        InboxSender {
            tx: self.tx.clone(),
            current: Arc::clone(&self.current),
            epoch: self.epoch(),
        }
    }

    /// Everything queued for the current epoch, in arrival order
    pub(crate) fn drain(&mut self) -> Vec<InboxPayload> {
        let epoch = self.epoch();
        let mut payloads = Vec::new();
        let mut stale = 0usize;
        while let Ok(item) = self.rx.try_recv() {
            if item.epoch == epoch {
                payloads.push(item.payload);
            } else {
                stale += 1;
            }
        }
        if stale > 0 {
            log::debug!("[Session] Discarded {} inbox items from an earlier epoch", stale);
        }
        payloads
    }
}

/// Host-side handle for feeding recognition results from another recognizer
///
/// Bound to the session run it was obtained in: after `stop()` or a restart
/// it accepts nothing, so take a fresh one after each `start()`.
#[derive(Clone)]
pub struct ResultSender {
    inner: InboxSender,
}

impl ResultSender {
    pub(crate) fn new(inner: InboxSender) -> Self {
        Self { inner }
    }

    /// Queue a result for the next tick. Returns false once the run is over.
    pub fn submit(&self, result: RecognitionResult) -> bool {
        self.inner.push(InboxPayload::Recognition(result))
    }
}

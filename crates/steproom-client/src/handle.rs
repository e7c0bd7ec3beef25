//! Shared handle to the local document replica.
//!
//! Every field manager and the provider's socket task hold the same
//! [`DocHandle`]. Local mutations funnel through [`DocHandle::transact`]
//! so that read-modify-write sequences (cell toggles) happen under one
//! lock acquisition, and the resulting stamped ops are shipped to the
//! socket task in issue order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use steproom_core::{ChangeBatch, Document, Mutation, Op, SkippedOp, SubscriptionId};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Clone)]
pub struct DocHandle {
    doc: Arc<Mutex<Document>>,
    outbound: mpsc::UnboundedSender<Vec<Op>>,
    closed: Arc<AtomicBool>,
}

impl DocHandle {
    pub(crate) fn new(
        doc: Arc<Mutex<Document>>,
        outbound: mpsc::UnboundedSender<Vec<Op>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            doc,
            outbound,
            closed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a read-only closure against the current replica state.
    /// Before the first sync completes this may observe stale defaults;
    /// consumers re-pull once the provider reports synced.
    pub fn with_doc<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.lock())
    }

    /// Applies a local transaction built from the current state and
    /// ships the stamped ops. After [`Provider::close`] this becomes a
    /// no-op: mutation after disposal is defined as doing nothing.
    ///
    /// [`Provider::close`]: crate::provider::Provider::close
    pub fn transact<F>(&self, build: F) -> Vec<SkippedOp>
    where
        F: FnOnce(&Document) -> Vec<Mutation>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Vec::new();
        }
        let applied = {
            let mut doc = self.lock();
            let mutations = build(&doc);
            if mutations.is_empty() {
                return Vec::new();
            }
            doc.apply_local(mutations)
        };
        for skipped in &applied.skipped {
            warn!(reason = %skipped.reason, "skipped local mutation");
        }
        if !applied.ops.is_empty() && self.outbound.send(applied.ops).is_err() {
            // Socket task is gone; the write stays applied locally and
            // the next full-state handshake reconciles.
            warn!("outbound channel closed, local ops not shipped");
        }
        applied.skipped
    }

    /// Applies a fixed list of mutations as one local transaction.
    pub fn mutate(&self, mutations: Vec<Mutation>) -> Vec<SkippedOp> {
        self.transact(move |_| mutations)
    }

    /// Registers a change listener on the underlying document. The
    /// returned lease stays valid across resyncs: snapshot merges
    /// mutate the document in place rather than swapping it out.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&ChangeBatch) + Send + 'static,
    {
        self.lock().on_change(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().off_change(id)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use steproom_core::TrackConfig;

    /// Detached handle for manager tests: no socket task, ops land in
    /// the returned receiver.
    pub(crate) fn detached_handle() -> (DocHandle, mpsc::UnboundedReceiver<Vec<Op>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let doc = Document::new(70_000, &TrackConfig::standard());
        let handle = DocHandle::new(
            Arc::new(Mutex::new(doc)),
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        (handle, rx)
    }

    /// Merges inbound ops the way the provider's socket task does.
    pub(crate) fn apply_remote(handle: &DocHandle, ops: Vec<Op>) {
        handle.lock().apply_remote(&ops);
    }
}

//! Progress-callback trait for per-page and per-document analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to observe a
//! batch as it runs. Events are purely observational: the pipeline never
//! waits on a callback's result and makes no assumption about display.
//!
//! Events arrive in canonical order (document, then page ascending), also
//! when `concurrency > 1`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_defects::{AnalysisConfig, AnalysisProgressCallback, ProgressEvent};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl AnalysisProgressCallback for PageCounter {
//!     fn on_page_complete(&self, event: &ProgressEvent) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}", event.status);
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A position in the batch plus a human-readable status line.
///
/// Indices are 1-based so they can be shown as "page 2/5" directly.
/// `page_index` is 0 for document-level events emitted before any page
/// was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub document_index: usize,
    pub document_count: usize,
    pub page_index: usize,
    pub page_count: usize,
    pub status: String,
}

/// Called by the pipeline as it works through a batch.
///
/// All methods have no-op defaults so implementors override only what they
/// need. Implementations must be `Send + Sync`.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before the first document is opened.
    fn on_batch_start(&self, document_count: usize) {
        let _ = document_count;
    }

    /// Called before a document is rasterised.
    fn on_document_start(&self, document_index: usize, document_count: usize, filename: &str) {
        let _ = (document_index, document_count, filename);
    }

    /// Called after a page has been extracted and all its candidates classified.
    fn on_page_complete(&self, event: &ProgressEvent) {
        let _ = event;
    }

    /// Called after a document finished, whether it succeeded or failed.
    fn on_document_complete(&self, event: &ProgressEvent) {
        let _ = event;
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, document_count: usize, record_count: usize) {
        let _ = (document_count, record_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;

/// Forwards page and document events into an unbounded channel.
///
/// Unbounded because progress must never apply backpressure to the
/// pipeline. Events are dropped silently once the receiver is gone.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    /// Create the callback and the receiving end of its channel.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl AnalysisProgressCallback for ChannelProgress {
    fn on_page_complete(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }

    fn on_document_complete(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        pages: AtomicUsize,
        documents: AtomicUsize,
        batch_total: AtomicUsize,
    }

    impl AnalysisProgressCallback for TrackingCallback {
        fn on_batch_start(&self, document_count: usize) {
            self.batch_total.store(document_count, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _event: &ProgressEvent) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _event: &ProgressEvent) {
            self.documents.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(page: usize) -> ProgressEvent {
        ProgressEvent {
            document_index: 1,
            document_count: 1,
            page_index: page,
            page_count: 2,
            status: format!("page {page}/2"),
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start(1, 2, "a.pdf");
        cb.on_page_complete(&event(1));
        cb.on_document_complete(&event(2));
        cb.on_batch_complete(2, 7);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            pages: AtomicUsize::new(0),
            documents: AtomicUsize::new(0),
            batch_total: AtomicUsize::new(0),
        };
        tracker.on_batch_start(1);
        tracker.on_page_complete(&event(1));
        tracker.on_page_complete(&event(2));
        tracker.on_document_complete(&event(2));

        assert_eq!(tracker.batch_total.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.documents.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_progress_forwards_in_order() {
        let (cb, mut rx) = ChannelProgress::channel();
        cb.on_page_complete(&event(1));
        cb.on_page_complete(&event(2));
        cb.on_document_complete(&event(2));

        assert_eq!(rx.try_recv().unwrap().page_index, 1);
        assert_eq!(rx.try_recv().unwrap().page_index, 2);
        assert_eq!(rx.try_recv().unwrap().status, "page 2/2");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_progress_survives_dropped_receiver() {
        let (cb, rx) = ChannelProgress::channel();
        drop(rx);
        cb.on_page_complete(&event(1));
    }
}

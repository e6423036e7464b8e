//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe
//! the orchestrator as it moves through its states and renders pages.
//!
//! # Example
//!
//! ```rust
//! use pdf_intake::{ExtractionConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl PipelineProgressCallback for StageLog {
//!     fn on_stage(&self, stage: Stage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(StageLog(Mutex::new(Vec::new()))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use crate::output::ExtractionMethod;
use std::sync::Arc;

/// Called by the pipeline as it advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages are rendered sequentially, but the callback
/// must still be `Send + Sync` because rendering runs on a blocking thread.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called on entry to every orchestrator state.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called after a page is rendered and compressed.
    ///
    /// * `page_num` — 1-indexed page number
    /// * `total`    — pages that will be rendered
    /// * `bytes`    — size of the compressed image
    fn on_page_rendered(&self, page_num: usize, total: usize, bytes: usize) {
        let _ = (page_num, total, bytes);
    }

    /// Called when a page fails to render. The page is skipped.
    fn on_page_failed(&self, page_num: usize, total: usize, error: &str) {
        let _ = (page_num, total, error);
    }

    /// Called once the artifact is assembled.
    fn on_complete(&self, method: ExtractionMethod) {
        let _ = method;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        stages: Mutex<Vec<Stage>>,
        rendered: AtomicUsize,
        failed: AtomicUsize,
    }

    impl PipelineProgressCallback for Tracking {
        fn on_stage(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_page_rendered(&self, _page_num: usize, _total: usize, _bytes: usize) {
            self.rendered.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_failed(&self, _page_num: usize, _total: usize, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage(Stage::Validating);
        cb.on_page_rendered(1, 3, 1024);
        cb.on_page_failed(2, 3, "bitmap allocation failed");
        cb.on_complete(ExtractionMethod::Images);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Tracking::default();
        t.on_stage(Stage::Validating);
        t.on_stage(Stage::Classifying);
        t.on_page_rendered(1, 2, 10);
        t.on_page_failed(2, 2, "boom");
        assert_eq!(
            *t.stages.lock().unwrap(),
            vec![Stage::Validating, Stage::Classifying]
        );
        assert_eq!(t.rendered.load(Ordering::SeqCst), 1);
        assert_eq!(t.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage(Stage::Done);
    }
}

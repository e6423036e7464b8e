//! Page rendering: rasterise up to `max_pages` pages and compress each one.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-bound rendering.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! async workers never stall.
//!
//! ## Memory bound
//!
//! Pages are handled strictly one at a time: render, compress, drop the
//! raster, move on. Peak memory is one full-resolution bitmap plus the
//! compressed pages accumulated so far, regardless of document length.
//!
//! ## Failure isolation
//!
//! A page that fails to render or encode is logged and skipped. The call
//! only fails when *no* attempted page succeeds.
//!
//! ## Cancellation
//!
//! Renderers check a [`CancelFlag`] before each page. Dropping the
//! [`render_document`] future sets it, so an abandoned request stops after
//! the page in flight.

use crate::config::{ExtractionConfig, PAGE_CAP};
use crate::error::ExtractionError;
use crate::output::{CompressedImage, ImageSet};
use crate::pipeline::cancel::CancelFlag;
use crate::pipeline::encode::compress_page;
use crate::progress::PipelineProgressCallback;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest edge of a raw raster, before compression. Caps memory for
/// oversized pages such as posters.
const MAX_RENDER_EDGE: i32 = 4000;

/// Receives each page as it is rendered: `(index_0based, planned, result)`.
pub type PageSink<'a> = dyn FnMut(usize, usize, Result<DynamicImage, String>) + 'a;

/// Rasterises PDF pages.
///
/// Implementations must call `sink` once per attempted page, in page order,
/// and must not hold more than one raster at a time. `planned` is
/// `min(total_pages, max_pages)`. Before each page they check `cancel` and
/// return [`ExtractionError::Cancelled`] once it is set. Returns the
/// document's total page count.
pub trait PageRenderer: Send + Sync {
    fn render_pages(
        &self,
        bytes: &[u8],
        max_pages: usize,
        scale: f32,
        cancel: &CancelFlag,
        sink: &mut PageSink<'_>,
    ) -> Result<usize, ExtractionError>;
}

/// The default renderer, backed by a pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    /// Bind pdfium from the configured path, `PDFIUM_LIB_PATH`, or the system library.
    pub fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => {
                let lib = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(&path)
                } else {
                    path
                };
                debug!("Binding pdfium from {}", lib.display());
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ExtractionError::RendererUnavailable {
            detail: format!("{:?}", e),
        })?;

        Ok(Pdfium::new(bindings))
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render_pages(
        &self,
        bytes: &[u8],
        max_pages: usize,
        scale: f32,
        cancel: &CancelFlag,
        sink: &mut PageSink<'_>,
    ) -> Result<usize, ExtractionError> {
        let pdfium = self.bind()?;

        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| ExtractionError::Malformed {
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        let planned = total.min(max_pages);
        info!("PDF loaded for rendering: {} pages, rendering {}", total, planned);

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_maximum_width(MAX_RENDER_EDGE)
            .set_maximum_height(MAX_RENDER_EDGE);

        for idx in 0..planned {
            if cancel.is_cancelled() {
                debug!("Rendering cancelled before page {}", idx + 1);
                return Err(ExtractionError::Cancelled);
            }
            let result = match pages.get(idx as u16) {
                Ok(page) => page
                    .render_with_config(&render_config)
                    .map(|bitmap| bitmap.as_image())
                    .map_err(|e| format!("{:?}", e)),
                Err(e) => Err(format!("{:?}", e)),
            };
            sink(idx, planned, result);
        }

        Ok(total)
    }
}

/// Rendering and compression knobs lifted out of [`ExtractionConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub max_pages: usize,
    pub scale: f32,
    pub max_image_width: u32,
    pub jpeg_quality: u8,
}

impl From<&ExtractionConfig> for RenderOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            max_pages: config.max_pages.min(PAGE_CAP),
            scale: config.render_scale,
            max_image_width: config.max_image_width,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// The renderer the config asks for: an injected one, or pdfium.
pub fn renderer_for(config: &ExtractionConfig) -> Arc<dyn PageRenderer> {
    match &config.renderer {
        Some(r) => Arc::clone(r),
        None => Arc::new(PdfiumRenderer::new(config.pdfium_library_path.clone())),
    }
}

/// Render and compress pages on the blocking pool.
///
/// Dropping the returned future cancels the blocking work.
pub async fn render_document(
    bytes: Arc<[u8]>,
    config: &ExtractionConfig,
) -> Result<ImageSet, ExtractionError> {
    let renderer = renderer_for(config);
    let options = RenderOptions::from(config);
    let progress = config.progress_callback.clone();
    let cancel = CancelFlag::new();
    let _guard = cancel.cancel_on_drop();

    tokio::task::spawn_blocking(move || {
        render_blocking(renderer.as_ref(), &bytes, options, &cancel, progress.as_deref())
    })
    .await
    .map_err(|e| ExtractionError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of [`render_document`].
pub fn render_blocking(
    renderer: &dyn PageRenderer,
    bytes: &[u8],
    options: RenderOptions,
    cancel: &CancelFlag,
    progress: Option<&dyn PipelineProgressCallback>,
) -> Result<ImageSet, ExtractionError> {
    let mut pages: Vec<CompressedImage> = Vec::new();
    let mut attempted = 0usize;
    let mut first_error: Option<String> = None;

    let total = renderer.render_pages(
        bytes,
        options.max_pages,
        options.scale,
        cancel,
        &mut |idx, planned, result| {
            attempted += 1;
            let page_num = idx + 1;

            let compressed = result.and_then(|img| {
                compress_page(&img, page_num, options.max_image_width, options.jpeg_quality)
                    .map_err(|e| format!("encoding failed: {}", e))
                // `img` is dropped here, before the next page is rendered.
            });

            match compressed {
                Ok(page) => {
                    debug!("Page {}/{}: {} bytes", page_num, planned, page.byte_len());
                    if let Some(cb) = progress {
                        cb.on_page_rendered(page_num, planned, page.byte_len());
                    }
                    pages.push(page);
                }
                Err(e) => {
                    warn!("Page {}/{} skipped: {}", page_num, planned, e);
                    if let Some(cb) = progress {
                        cb.on_page_failed(page_num, planned, &e);
                    }
                    first_error.get_or_insert(e);
                }
            }
        },
    )?;

    if pages.is_empty() {
        return Err(ExtractionError::NoPagesRendered {
            attempted,
            first_error: first_error.unwrap_or_else(|| "document has no pages".to_string()),
        });
    }

    if total > attempted {
        info!(
            "Rendered {} of {} pages; document truncated at the page cap",
            pages.len(),
            total
        );
    }

    Ok(ImageSet {
        pages,
        page_count: attempted,
        total_pages_in_document: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Produces solid rasters; fails the pages listed in `failing`.
    struct FakeRenderer {
        total: usize,
        failing: Vec<usize>,
    }

    impl PageRenderer for FakeRenderer {
        fn render_pages(
            &self,
            _bytes: &[u8],
            max_pages: usize,
            _scale: f32,
            cancel: &CancelFlag,
            sink: &mut PageSink<'_>,
        ) -> Result<usize, ExtractionError> {
            let planned = self.total.min(max_pages);
            for idx in 0..planned {
                if cancel.is_cancelled() {
                    return Err(ExtractionError::Cancelled);
                }
                if self.failing.contains(&idx) {
                    sink(idx, planned, Err("bitmap allocation failed".into()));
                } else {
                    let img = RgbImage::from_pixel(1700, 2200, Rgb([250, 250, 250]));
                    sink(idx, planned, Ok(DynamicImage::ImageRgb8(img)));
                }
            }
            Ok(self.total)
        }
    }

    fn options(max_pages: usize) -> RenderOptions {
        RenderOptions {
            max_pages,
            scale: 2.0,
            max_image_width: 1600,
            jpeg_quality: 85,
        }
    }

    #[derive(Default)]
    struct Counter {
        ok: AtomicUsize,
        failed: AtomicUsize,
    }

    impl PipelineProgressCallback for Counter {
        fn on_page_rendered(&self, _p: usize, _t: usize, _b: usize) {
            self.ok.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_failed(&self, _p: usize, _t: usize, _e: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn long_documents_are_truncated_at_max_pages() {
        let r = FakeRenderer {
            total: 40,
            failing: vec![],
        };
        let set = render_blocking(&r, b"", options(10), &CancelFlag::new(), None).unwrap();
        assert_eq!(set.pages.len(), 10);
        assert_eq!(set.page_count, 10);
        assert_eq!(set.total_pages_in_document, 40);
        assert!(set.is_truncated());
        assert_eq!(set.pages[0].width, 1600);
        assert_eq!(set.pages[9].page_num, 10);
    }

    #[test]
    fn failed_pages_are_skipped_and_reported() {
        let r = FakeRenderer {
            total: 3,
            failing: vec![1],
        };
        let counter = Counter::default();
        let set = render_blocking(&r, b"", options(10), &CancelFlag::new(), Some(&counter)).unwrap();
        let nums: Vec<usize> = set.pages.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 3]);
        assert_eq!(set.page_count, 3);
        assert_eq!(counter.ok.load(Ordering::SeqCst), 2);
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn all_pages_failing_is_an_error() {
        let r = FakeRenderer {
            total: 2,
            failing: vec![0, 1],
        };
        let err = render_blocking(&r, b"", options(10), &CancelFlag::new(), None).unwrap_err();
        match err {
            ExtractionError::NoPagesRendered {
                attempted,
                first_error,
            } => {
                assert_eq!(attempted, 2);
                assert!(first_error.contains("bitmap"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_page_document_is_an_error() {
        let r = FakeRenderer {
            total: 0,
            failing: vec![],
        };
        assert!(matches!(
            render_blocking(&r, b"", options(10), &CancelFlag::new(), None),
            Err(ExtractionError::NoPagesRendered { attempted: 0, .. })
        ));
    }

    #[tokio::test]
    async fn injected_renderer_is_used() {
        let config = ExtractionConfig::builder()
            .renderer(Arc::new(FakeRenderer {
                total: 2,
                failing: vec![],
            }))
            .max_pages(1)
            .build()
            .unwrap();
        let set = render_document(Arc::from(&b"%PDF-"[..]), &config)
            .await
            .unwrap();
        assert_eq!(set.pages.len(), 1);
        assert_eq!(set.total_pages_in_document, 2);
    }

    /// Sleeps per page and records how far it got.
    #[derive(Default)]
    struct SlowRenderer {
        rendered: AtomicUsize,
        finished: std::sync::atomic::AtomicBool,
    }

    impl PageRenderer for SlowRenderer {
        fn render_pages(
            &self,
            _bytes: &[u8],
            max_pages: usize,
            _scale: f32,
            cancel: &CancelFlag,
            sink: &mut PageSink<'_>,
        ) -> Result<usize, ExtractionError> {
            let mut result = Ok(max_pages);
            for idx in 0..max_pages {
                if cancel.is_cancelled() {
                    result = Err(ExtractionError::Cancelled);
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(25));
                self.rendered.fetch_add(1, Ordering::SeqCst);
                let img = RgbImage::from_pixel(40, 50, Rgb([255, 255, 255]));
                sink(idx, max_pages, Ok(DynamicImage::ImageRgb8(img)));
            }
            self.finished.store(true, Ordering::SeqCst);
            result
        }
    }

    #[test]
    fn cancelled_flag_stops_rendering() {
        let r = FakeRenderer {
            total: 5,
            failing: vec![],
        };
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            render_blocking(&r, b"", options(10), &cancel, None),
            Err(ExtractionError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn dropped_render_stops_after_the_page_in_flight() {
        let renderer = Arc::new(SlowRenderer::default());
        let config = ExtractionConfig::builder()
            .renderer(renderer.clone())
            .build()
            .unwrap();

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(60),
            render_document(Arc::from(&b"%PDF-"[..]), &config),
        )
        .await;
        assert!(abandoned.is_err());

        for _ in 0..200 {
            if renderer.finished.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(renderer.finished.load(Ordering::SeqCst));
        assert!(renderer.rendered.load(Ordering::SeqCst) < PAGE_CAP);
    }

    #[test]
    fn options_never_exceed_page_cap() {
        let mut config = ExtractionConfig::default();
        config.max_pages = 99;
        assert_eq!(RenderOptions::from(&config).max_pages, PAGE_CAP);
    }
}

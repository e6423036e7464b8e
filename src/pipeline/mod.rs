//! Pipeline stages.
//!
//! Each submodule implements one component. Data flows strictly downward and
//! only the orchestrator holds state across stages.
//!
//! ```text
//! input ──▶ classify ──▶ text ───────────────▶ adapter
//! (validate)  (verdict)    └─(fallback)─▶ render ─▶ encode ─┘
//! ```
//!
//! 1. [`input`]    — load bytes from a path or URL and validate the PDF header
//! 2. [`content`]  — walk page content streams (shared by classify and text)
//! 3. [`classify`] — text density + image operators → typed verdict
//! 4. [`text`]     — operator-level text reconstruction and normalisation
//! 5. [`render`]   — rasterise up to `max_pages` pages via pdfium, one at a time
//! 6. [`encode`]   — resize and JPEG-compress each raster, base64 for the API
//! 7. [`adapter`]  — the schema-constrained model call and response shape check
//!
//! [`cancel`] carries the stop signal the blocking stages poll between pages.

pub mod adapter;
pub mod cancel;
pub mod classify;
pub mod content;
pub mod encode;
pub mod input;
pub mod render;
pub mod text;

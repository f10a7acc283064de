//! Pipeline stages for defect analysis.
//!
//! Each submodule implements one step, so each can be tested on its own
//! and the two external seams (rasteriser, reasoning service) can be
//! replaced by stubs.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ extract ──▶ classify
//! (bytes)   (pdfium)   (base64)   (vision)    (text)
//!                                    └── llm + response ──┘
//! ```
//!
//! 1. [`input`]    — load a path or URL into a [`input::SourceDocument`]
//! 2. [`render`]   — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]   — PNG-encode and base64-wrap a page for the vision request
//! 4. [`extract`]  — one vision call per page → defect candidates
//! 5. [`classify`] — one text call per candidate → origin, confidence, translation
//!
//! [`llm`] owns the service seam with retry/backoff and the in-flight limit;
//! [`response`] decodes JSON payloads out of free-form model output.

pub mod classify;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod render;
pub mod response;

//! Pipeline stages for story assembly.
//!
//! Each submodule implements one transformation step. The orchestration that
//! strings them together lives in [`crate::assemble`].
//!
//! ## Data Flow
//!
//! ```text
//! batch ──▶ sanitize ──▶ extract ──▶ materialize
//! (groups)  (whitelist)  (rewrite)   (fetch + JPEG)
//! ```
//!
//! 1. [`batch`]: run an async operation over a list in bounded,
//!    order-preserving groups; fail-fast for parts, best-effort for images
//! 2. [`sanitize`]: restrict part markup to an allowed tag/attribute/scheme
//!    set; parsing is html5ever's, so malformed input never fails
//! 3. [`extract`]: rewrite every `img` source to its content-addressed local
//!    path and collect the references
//! 4. [`materialize`]: fetch each distinct image once and store it as JPEG;
//!    the only stage that writes to disk
//!
//! [`hash`] holds the URL → file name mapping both `extract` and
//! `materialize` rely on.

pub mod batch;
pub mod extract;
pub mod hash;
pub(crate) mod markup;
pub mod materialize;
pub mod sanitize;

//! Pipeline stages for invoice line-item extraction.
//!
//! Each submodule implements exactly one transformation step. The stages
//! after the model call are pure functions of their input, so a response
//! captured once can be replayed through them without any network access.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ llm ──▶ parse ──▶ normalize ──▶ validate ──▶ pricing ──▶ assemble
//! (files)  (VLM)   (JSON)    (rows)        (types)      (markup)    (merge)
//!           │
//!           └── render + encode (PDF pages / images → base64)
//! ```
//!
//! 1. [`input`]     — discover documents and check their content
//! 2. [`llm`]       — call the vision model with retry/backoff; the only
//!    stage with network I/O. [`render`] and [`encode`] prepare its images.
//! 3. [`parse`]     — find the JSON in free text; field → value sequence
//! 4. [`normalize`] — pad ragged fields into aligned rows
//! 5. [`validate`]  — type values, drop rows with no product or no price
//! 6. [`pricing`]   — derive missing unit prices, apply markup
//! 7. [`assemble`]  — per-document tables plus one sorted combined table

pub mod assemble;
pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod parse;
pub mod pricing;
pub mod render;
pub mod validate;

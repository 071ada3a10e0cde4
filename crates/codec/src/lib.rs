//! Conversion between transfer-encoded remote content and the
//! `(front matter, body)` pairs the store edits.
//!
//! - [`encoding`] handles the base64 payloads the remote contents API speaks.
//! - [`frontmatter`] splits and rebuilds YAML-headed documents.

pub mod encoding;
pub mod error;
pub mod frontmatter;

pub use crate::frontmatter::{Decomposed, FrontMatter, compose, decompose};
pub use serde_yaml::{Number, Value};

//! URL handling module
//!
//! Normalization of listing URLs into the keys records are deduplicated by.

mod normalize;

pub use normalize::{dedup_key, normalize_url};

//! URL handling module for Pagescope
//!
//! This module turns user-supplied site identifiers into canonical absolute
//! URLs and provides host comparison helpers used by the analysis checks.

mod domain;
mod normalize;

// Re-export main functions
pub use domain::{extract_domain, same_site};
pub use normalize::{normalize_site_url, NormalizedUrl};

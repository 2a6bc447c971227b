pub mod citations;

pub use citations::{partial_marker_suffix, rewrite_citations};

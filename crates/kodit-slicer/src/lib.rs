//! AST-driven snippet extraction for kodit
//!
//! Parses source files with tree-sitter, builds a cross-file call graph,
//! and assembles content-addressed snippets: one per public function or
//! method, bundled with its transitive dependencies and example
//! call-sites.

pub mod extractor;
pub mod languages;
pub mod slicer;

pub use extractor::Definition;
pub use languages::{language_for_extension, LANGUAGE_REGISTRY};
pub use slicer::{AssembledSnippet, Slicer, SlicerPolicy, SourceFile};

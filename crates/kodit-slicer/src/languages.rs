//! Language-specific parsing configuration
//!
//! Centralizes the per-language node-kind tables the extractor walks:
//! which AST nodes are function or method definitions, which are call
//! expressions, and the surface rules (visibility, comment prefix) that
//! differ between languages. Grammars are process-wide, loaded once.

use lazy_static::lazy_static;
use std::collections::HashMap;
use tree_sitter::Language;

/// A supported language and its extraction tables
pub struct LanguageSpec {
    /// The language identifier (e.g., "rust", "python")
    pub id: &'static str,
    /// File extensions associated with this language
    pub extensions: &'static [&'static str],
    /// Tree-sitter grammar
    pub language: Language,
    /// Node kinds that define a free function
    pub function_nodes: &'static [&'static str],
    /// Node kinds that define a method (resolved against an enclosing
    /// type or receiver)
    pub method_nodes: &'static [&'static str],
    /// Node kinds of call expressions
    pub call_nodes: &'static [&'static str],
    /// Line-comment prefix for assembled example labels
    pub comment_prefix: &'static str,
}

impl LanguageSpec {
    /// Language-specific public/private rule
    pub fn is_public_name(&self, name: &str) -> bool {
        match self.id {
            // Upper-case first letter exports in Go
            "go" => name.chars().next().is_some_and(char::is_uppercase),
            // Leading underscore marks private in Python and, by
            // convention, in JavaScript/TypeScript
            "python" | "javascript" | "typescript" => !name.starts_with('_'),
            // Rust visibility comes from the AST, not the name
            _ => true,
        }
    }
}

lazy_static! {
    /// Registry of all supported languages, keyed by id
    pub static ref LANGUAGE_REGISTRY: HashMap<&'static str, LanguageSpec> = {
        let mut registry = HashMap::new();

        registry.insert(
            "rust",
            LanguageSpec {
                id: "rust",
                extensions: &["rs"],
                language: tree_sitter_rust::LANGUAGE.into(),
                function_nodes: &["function_item"],
                method_nodes: &["function_item"],
                call_nodes: &["call_expression"],
                comment_prefix: "//",
            },
        );

        registry.insert(
            "python",
            LanguageSpec {
                id: "python",
                extensions: &["py", "pyi"],
                language: tree_sitter_python::LANGUAGE.into(),
                function_nodes: &["function_definition"],
                method_nodes: &["function_definition"],
                call_nodes: &["call"],
                comment_prefix: "#",
            },
        );

        registry.insert(
            "go",
            LanguageSpec {
                id: "go",
                extensions: &["go"],
                language: tree_sitter_go::LANGUAGE.into(),
                function_nodes: &["function_declaration"],
                method_nodes: &["method_declaration"],
                call_nodes: &["call_expression"],
                comment_prefix: "//",
            },
        );

        registry.insert(
            "javascript",
            LanguageSpec {
                id: "javascript",
                extensions: &["js", "mjs", "cjs", "jsx"],
                language: tree_sitter_javascript::LANGUAGE.into(),
                function_nodes: &["function_declaration", "generator_function_declaration"],
                method_nodes: &["method_definition"],
                call_nodes: &["call_expression", "new_expression"],
                comment_prefix: "//",
            },
        );

        registry.insert(
            "typescript",
            LanguageSpec {
                id: "typescript",
                extensions: &["ts", "mts", "cts"],
                language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                function_nodes: &["function_declaration", "generator_function_declaration"],
                method_nodes: &["method_definition"],
                call_nodes: &["call_expression", "new_expression"],
                comment_prefix: "//",
            },
        );

        registry
    };

    /// Extension -> language id lookup derived from the registry
    pub static ref EXTENSION_INDEX: HashMap<&'static str, &'static str> = {
        let mut index = HashMap::new();
        for spec in LANGUAGE_REGISTRY.values() {
            for ext in spec.extensions {
                index.insert(*ext, spec.id);
            }
        }
        index
    };
}

/// Look up a language by file extension (without the dot)
pub fn language_for_extension(extension: &str) -> Option<&'static LanguageSpec> {
    EXTENSION_INDEX
        .get(extension)
        .and_then(|id| LANGUAGE_REGISTRY.get(id))
}

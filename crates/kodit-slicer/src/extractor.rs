//! Per-file definition extraction
//!
//! Parses one file with the language's tree-sitter grammar and collects
//! function and method definitions: qualified name, byte span, docstring,
//! parameters, return type, visibility, and the raw callee names found in
//! the body. Parser and tree handles live only for the duration of one
//! call.

use tree_sitter::{Node, Parser};

use crate::languages::LanguageSpec;

/// One function or method definition found in a file
#[derive(Debug, Clone)]
pub struct Definition {
    /// `module.name`, or `module.Receiver.name` for methods
    pub qualified_name: String,
    pub name: String,
    pub module: String,
    pub file_path: String,
    /// Byte span of the definition in its file
    pub span: (usize, usize),
    pub source: String,
    pub docstring: Option<String>,
    pub parameters: String,
    pub return_type: Option<String>,
    pub is_public: bool,
    pub is_method: bool,
    /// Raw callee names collected from the body, in source order
    pub calls: Vec<String>,
}

/// Module component of a qualified name: the file stem
fn module_of(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.')
        .map_or_else(|| file.to_string(), |(stem, _)| stem.to_string())
}

fn node_text<'a>(node: Node<'_>, src: &'a str) -> &'a str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

fn field_text(node: Node<'_>, field: &str, src: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, src).to_string())
}

/// Walk every node in the tree, including unnamed ones
fn walk_tree(node: Node<'_>, visit: &mut impl FnMut(Node<'_>)) {
    visit(node);
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            walk_tree(child, visit);
        }
    }
}

fn has_function_ancestor(node: Node<'_>, spec: &LanguageSpec) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        if spec.function_nodes.contains(&parent.kind())
            || spec.method_nodes.contains(&parent.kind())
        {
            return true;
        }
        current = parent.parent();
    }
    false
}

/// Receiver type for a method definition, or None for free functions
fn receiver_of(node: Node<'_>, spec: &LanguageSpec, src: &str) -> Option<String> {
    match spec.id {
        "go" => {
            if node.kind() != "method_declaration" {
                return None;
            }
            let receiver = node.child_by_field_name("receiver")?;
            let mut cursor = receiver.walk();
            let param = receiver
                .named_children(&mut cursor)
                .find(|n| n.kind() == "parameter_declaration")?;
            let ty = field_text(param, "type", src)?;
            Some(ty.trim_start_matches('*').trim().to_string())
        }
        "rust" => {
            let mut current = node.parent();
            while let Some(parent) = current {
                if parent.kind() == "impl_item" {
                    let ty = field_text(parent, "type", src)?;
                    // Drop generic arguments from the receiver name
                    return Some(ty.split('<').next().unwrap_or(&ty).trim().to_string());
                }
                current = parent.parent();
            }
            None
        }
        "python" => {
            let mut current = node.parent();
            while let Some(parent) = current {
                if parent.kind() == "class_definition" {
                    return field_text(parent, "name", src);
                }
                current = parent.parent();
            }
            None
        }
        "javascript" | "typescript" => {
            if node.kind() != "method_definition" {
                return None;
            }
            let mut current = node.parent();
            while let Some(parent) = current {
                if parent.kind() == "class_declaration" || parent.kind() == "class" {
                    return field_text(parent, "name", src);
                }
                current = parent.parent();
            }
            None
        }
        _ => None,
    }
}

/// Contiguous comment block directly above a definition
fn preceding_comments(node: Node<'_>, src: &str) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = node.prev_sibling();

    while let Some(sibling) = current {
        let kind = sibling.kind();
        if !(kind == "comment" || kind == "line_comment" || kind == "block_comment") {
            break;
        }
        // A blank line between comment and definition detaches the doc
        if node_gap_has_blank_line(sibling, node, src) && lines.is_empty() {
            break;
        }
        lines.push(node_text(sibling, src).to_string());
        current = sibling.prev_sibling();
    }

    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn node_gap_has_blank_line(first: Node<'_>, second: Node<'_>, src: &str) -> bool {
    let gap = &src[first.end_byte()..second.start_byte().max(first.end_byte())];
    gap.matches('\n').count() > 1
}

/// Python docstring: leading string expression of the body
fn python_docstring(node: Node<'_>, src: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = node_text(string, src);
    Some(
        raw.trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string(),
    )
}

fn docstring_of(node: Node<'_>, spec: &LanguageSpec, src: &str) -> Option<String> {
    match spec.id {
        "python" => python_docstring(node, src),
        _ => preceding_comments(node, src),
    }
}

fn rust_is_public(node: Node<'_>) -> bool {
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i)
            && child.kind() == "visibility_modifier"
        {
            return true;
        }
    }
    false
}

fn return_type_of(node: Node<'_>, spec: &LanguageSpec, src: &str) -> Option<String> {
    let field = match spec.id {
        "go" => "result",
        "javascript" => return None,
        _ => "return_type",
    };
    field_text(node, field, src).map(|t| t.trim_start_matches("->").trim().to_string())
}

/// Callee name of a call expression's function node
fn callee_name(function: Node<'_>, src: &str) -> Option<String> {
    match function.kind() {
        "identifier" => Some(node_text(function, src).to_string()),
        // Method and module calls resolve by their final segment
        "field_expression" => field_text(function, "field", src),
        "selector_expression" => field_text(function, "field", src),
        "attribute" => field_text(function, "attribute", src),
        "member_expression" => field_text(function, "property", src),
        "scoped_identifier" => field_text(function, "name", src),
        "generic_function" => function
            .child_by_field_name("function")
            .and_then(|inner| callee_name(inner, src)),
        "parenthesized_expression" => function
            .named_child(0)
            .and_then(|inner| callee_name(inner, src)),
        _ => {
            let text = node_text(function, src);
            let last = text
                .rsplit("::")
                .next()
                .and_then(|t| t.rsplit('.').next())
                .unwrap_or(text)
                .trim();
            if last.is_empty() || !last.chars().all(|c| c.is_alphanumeric() || c == '_') {
                None
            } else {
                Some(last.to_string())
            }
        }
    }
}

/// Collect callee names from every call expression under `node`
fn collect_calls(node: Node<'_>, spec: &LanguageSpec, src: &str) -> Vec<String> {
    let mut calls = Vec::new();
    walk_tree(node, &mut |n| {
        if spec.call_nodes.contains(&n.kind())
            && let Some(function) = n
                .child_by_field_name("function")
                .or_else(|| n.child_by_field_name("constructor"))
            && let Some(name) = callee_name(function, src)
        {
            calls.push(name);
        }
    });
    calls
}

/// Anonymous-function kinds that take a variable's name when assigned
fn is_anonymous_function(kind: &str) -> bool {
    matches!(
        kind,
        "closure_expression" | "func_literal" | "lambda" | "arrow_function" | "function_expression"
    )
}

/// Top-level `name = <anonymous fn>` bindings, per language shape
fn anonymous_binding<'t>(node: Node<'t>, spec: &LanguageSpec, src: &str) -> Option<(String, Node<'t>)> {
    match (spec.id, node.kind()) {
        ("rust", "let_declaration") => {
            let value = node.child_by_field_name("value")?;
            if !is_anonymous_function(value.kind()) {
                return None;
            }
            let pattern = node.child_by_field_name("pattern")?;
            (pattern.kind() == "identifier")
                .then(|| (node_text(pattern, src).to_string(), node))
        }
        ("python", "expression_statement") => {
            let assignment = node.named_child(0)?;
            if assignment.kind() != "assignment" {
                return None;
            }
            let right = assignment.child_by_field_name("right")?;
            if !is_anonymous_function(right.kind()) {
                return None;
            }
            let left = assignment.child_by_field_name("left")?;
            (left.kind() == "identifier").then(|| (node_text(left, src).to_string(), node))
        }
        ("go", "short_var_declaration") => {
            let right = node.child_by_field_name("right")?;
            let value = right.named_child(0)?;
            if !is_anonymous_function(value.kind()) {
                return None;
            }
            let left = node.child_by_field_name("left")?;
            let name = left.named_child(0)?;
            (name.kind() == "identifier").then(|| (node_text(name, src).to_string(), node))
        }
        ("javascript" | "typescript", "variable_declarator") => {
            let value = node.child_by_field_name("value")?;
            if !is_anonymous_function(value.kind()) {
                return None;
            }
            let name = node.child_by_field_name("name")?;
            let span_node = node.parent().unwrap_or(node);
            (name.kind() == "identifier")
                .then(|| (node_text(name, src).to_string(), span_node))
        }
        _ => None,
    }
}

/// Extract all definitions from one file
///
/// Parse failures yield no definitions but never abort the caller.
pub fn extract_file(path: &str, content: &str, spec: &LanguageSpec) -> Vec<Definition> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&spec.language) {
        tracing::warn!(language = spec.id, error = %e, "grammar rejected by parser");
        return Vec::new();
    }

    let Some(tree) = parser.parse(content, None) else {
        tracing::warn!(path, "parse produced no tree, skipping file");
        return Vec::new();
    };

    let module = module_of(path);
    let mut definitions = Vec::new();

    walk_tree(tree.root_node(), &mut |node| {
        let kind = node.kind();

        let is_definition =
            spec.function_nodes.contains(&kind) || spec.method_nodes.contains(&kind);

        if is_definition {
            let Some(name) = field_text(node, "name", content) else {
                return;
            };

            let receiver = receiver_of(node, spec, content);
            let is_method = receiver.is_some();
            let qualified_name = match &receiver {
                Some(r) => format!("{module}.{r}.{name}"),
                None => format!("{module}.{name}"),
            };

            let is_public = match spec.id {
                "rust" => rust_is_public(node),
                _ => spec.is_public_name(&name),
            };

            definitions.push(Definition {
                qualified_name,
                name: name.clone(),
                module: module.clone(),
                file_path: path.to_string(),
                span: (node.start_byte(), node.end_byte()),
                source: node_text(node, content).to_string(),
                docstring: docstring_of(node, spec, content),
                parameters: field_text(node, "parameters", content).unwrap_or_default(),
                return_type: return_type_of(node, spec, content),
                is_public,
                is_method,
                calls: collect_calls(node, spec, content),
            });
            return;
        }

        // A lambda bound to a top-level variable is addressable by the
        // variable's name
        if !has_function_ancestor(node, spec)
            && let Some((name, span_node)) = anonymous_binding(node, spec, content)
        {
            definitions.push(Definition {
                qualified_name: format!("{module}.{name}"),
                name: name.clone(),
                module: module.clone(),
                file_path: path.to_string(),
                span: (span_node.start_byte(), span_node.end_byte()),
                source: node_text(span_node, content).to_string(),
                docstring: preceding_comments(span_node, content),
                parameters: String::new(),
                return_type: None,
                is_public: spec.is_public_name(&name),
                is_method: false,
                calls: collect_calls(span_node, spec, content),
            });
        }
    });

    definitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::language_for_extension;

    #[test]
    fn test_go_functions_and_visibility() {
        let src = r#"package mathutil

// Add returns the sum of two integers.
func Add(a, b int) int {
	return addChecked(a, b)
}

func addChecked(a, b int) int {
	return a + b
}
"#;
        let spec = language_for_extension("go").unwrap();
        let defs = extract_file("mathutil/add.go", src, spec);

        assert_eq!(defs.len(), 2);
        let add = defs.iter().find(|d| d.name == "Add").unwrap();
        assert_eq!(add.qualified_name, "add.Add");
        assert!(add.is_public);
        assert_eq!(add.calls, vec!["addChecked"]);
        assert!(add.docstring.as_deref().unwrap().contains("sum of two"));
        assert_eq!(add.return_type.as_deref(), Some("int"));

        let checked = defs.iter().find(|d| d.name == "addChecked").unwrap();
        assert!(!checked.is_public);
    }

    #[test]
    fn test_go_method_receiver() {
        let src = r#"package store

type Cache struct{}

func (c *Cache) Get(key string) string {
	return lookup(key)
}
"#;
        let spec = language_for_extension("go").unwrap();
        let defs = extract_file("store/cache.go", src, spec);

        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].qualified_name, "cache.Cache.Get");
        assert!(defs[0].is_method);
    }

    #[test]
    fn test_python_docstring_and_privacy() {
        let src = r#"class Greeter:
    def greet(self, name):
        """Return a greeting."""
        return _format(name)

def _format(name):
    return f"hi {name}"
"#;
        let spec = language_for_extension("py").unwrap();
        let defs = extract_file("app/greeter.py", src, spec);

        let greet = defs.iter().find(|d| d.name == "greet").unwrap();
        assert_eq!(greet.qualified_name, "greeter.Greeter.greet");
        assert_eq!(greet.docstring.as_deref(), Some("Return a greeting."));
        assert_eq!(greet.calls, vec!["_format"]);

        let private = defs.iter().find(|d| d.name == "_format").unwrap();
        assert!(!private.is_public);
    }

    #[test]
    fn test_rust_pub_detection_and_scoped_calls() {
        let src = r#"pub fn run() {
    helpers::start();
    finish();
}

fn finish() {}
"#;
        let spec = language_for_extension("rs").unwrap();
        let defs = extract_file("src/main.rs", src, spec);

        let run = defs.iter().find(|d| d.name == "run").unwrap();
        assert!(run.is_public);
        assert_eq!(run.calls, vec!["start", "finish"]);

        let finish = defs.iter().find(|d| d.name == "finish").unwrap();
        assert!(!finish.is_public);
    }

    #[test]
    fn test_rust_method_qualifies_with_impl_type() {
        let src = r#"struct Engine;

impl Engine {
    pub fn start(&self) {}
}
"#;
        let spec = language_for_extension("rs").unwrap();
        let defs = extract_file("src/engine.rs", src, spec);

        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].qualified_name, "engine.Engine.start");
        assert!(defs[0].is_method);
    }

    #[test]
    fn test_js_arrow_function_takes_variable_name() {
        let src = r#"const formatName = (name) => name.trim();

function greet(name) {
    return formatName(name);
}
"#;
        let spec = language_for_extension("js").unwrap();
        let defs = extract_file("src/greet.js", src, spec);

        let arrow = defs.iter().find(|d| d.name == "formatName").unwrap();
        assert_eq!(arrow.qualified_name, "greet.formatName");
        assert!(arrow.source.starts_with("const formatName"));
        assert_eq!(arrow.calls, vec!["trim"]);

        let greet = defs.iter().find(|d| d.name == "greet").unwrap();
        assert_eq!(greet.calls, vec!["formatName"]);
    }

    #[test]
    fn test_parse_garbage_yields_no_definitions() {
        let spec = language_for_extension("go").unwrap();
        let defs = extract_file("bad.go", "}}}} not really go {{{{", spec);
        assert!(defs.is_empty());
    }
}

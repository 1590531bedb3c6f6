//! Snippet assembly
//!
//! Takes the definitions extracted from a set of files, resolves a
//! cross-file call graph, and assembles one content-addressed snippet per
//! public definition: the definition itself, its transitive callees up to
//! a depth/count budget, and up to N caller bodies as usage examples.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::extractor::{extract_file, Definition};
use crate::languages::{language_for_extension, LanguageSpec};

/// One file handed to the slicer, already read from the working copy
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// Assembly budgets and switches
#[derive(Debug, Clone)]
pub struct SlicerPolicy {
    /// BFS hop limit when collecting callee sources
    pub max_dependency_depth: usize,
    /// Callee source count limit per snippet
    pub max_dependency_count: usize,
    /// Caller bodies included as usage examples
    pub max_examples: usize,
    /// Emit snippets for private definitions too
    pub include_private: bool,
    /// Files larger than this are skipped outright
    pub max_file_bytes: usize,
}

impl Default for SlicerPolicy {
    fn default() -> Self {
        Self {
            max_dependency_depth: 2,
            max_dependency_count: 10,
            max_examples: 3,
            include_private: false,
            max_file_bytes: 1_048_576,
        }
    }
}

/// A content-addressed snippet ready for persistence
#[derive(Debug, Clone)]
pub struct AssembledSnippet {
    /// SHA-256 of `content`, lowercase hex
    pub sha: String,
    pub content: String,
    pub extension: String,
    pub qualified_name: String,
    /// Files the snippet derives from, sorted and deduplicated
    pub source_files: Vec<String>,
}

pub struct Slicer {
    policy: SlicerPolicy,
}

impl Slicer {
    pub const fn new(policy: SlicerPolicy) -> Self {
        Self { policy }
    }

    /// Slice a set of files into deduplicated snippets
    ///
    /// Files are grouped by language; the call graph never crosses a
    /// language boundary. Unsupported extensions and oversized files are
    /// skipped with a log line, never an error.
    pub fn slice(&self, files: &[SourceFile]) -> Vec<AssembledSnippet> {
        let mut by_language: HashMap<&'static str, Vec<&SourceFile>> = HashMap::new();

        for file in files {
            if file.content.len() > self.policy.max_file_bytes {
                tracing::debug!(path = %file.path, size = file.content.len(), "file over size limit, skipping");
                continue;
            }
            let extension = file.path.rsplit('.').next().unwrap_or("");
            match language_for_extension(extension) {
                Some(spec) => by_language.entry(spec.id).or_default().push(file),
                None => {
                    tracing::debug!(path = %file.path, "no grammar for extension, skipping");
                }
            }
        }

        let mut snippets: Vec<AssembledSnippet> = Vec::new();
        let mut by_sha: HashMap<String, usize> = HashMap::new();

        let mut language_ids: Vec<&str> = by_language.keys().copied().collect();
        language_ids.sort_unstable();

        for language_id in language_ids {
            let group = &by_language[language_id];
            let spec = crate::languages::LANGUAGE_REGISTRY
                .get(language_id)
                .expect("registry lists every grouped language");

            for snippet in self.slice_language(group, spec) {
                match by_sha.get(&snippet.sha).copied() {
                    // Identical content: one row, merged derivations
                    Some(existing) => {
                        let merged = &mut snippets[existing];
                        for path in snippet.source_files {
                            if !merged.source_files.contains(&path) {
                                merged.source_files.push(path);
                            }
                        }
                        merged.source_files.sort();
                    }
                    None => {
                        by_sha.insert(snippet.sha.clone(), snippets.len());
                        snippets.push(snippet);
                    }
                }
            }
        }

        snippets.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        snippets
    }

    fn slice_language(
        &self,
        files: &[&SourceFile],
        spec: &'static LanguageSpec,
    ) -> Vec<AssembledSnippet> {
        let mut definitions: Vec<Definition> = Vec::new();
        for file in files {
            definitions.extend(extract_file(&file.path, &file.content, spec));
        }
        if definitions.is_empty() {
            return Vec::new();
        }

        // Index definitions by qualified name for callee resolution.
        // Ambiguous suffix matches resolve to the lexicographically first
        // candidate so re-runs are deterministic.
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, def) in definitions.iter().enumerate() {
            index.entry(def.qualified_name.as_str()).or_insert(i);
        }
        let mut sorted_names: Vec<&str> = index.keys().copied().collect();
        sorted_names.sort_unstable();

        let resolve = |callee: &str| -> Option<usize> {
            if let Some(&i) = index.get(callee) {
                return Some(i);
            }
            let suffix = format!(".{callee}");
            sorted_names
                .iter()
                .find(|name| name.ends_with(&suffix))
                .map(|name| index[*name])
        };

        // Forward edges (resolved callees) and reverse edges (callers)
        let mut callees: Vec<Vec<usize>> = vec![Vec::new(); definitions.len()];
        let mut callers: Vec<Vec<usize>> = vec![Vec::new(); definitions.len()];

        for (i, def) in definitions.iter().enumerate() {
            let mut seen = HashSet::new();
            for call in &def.calls {
                let Some(target) = resolve(call) else {
                    // Unresolved callees skip the edge, not the snippet
                    continue;
                };
                if target == i || !seen.insert(target) {
                    continue;
                }
                callees[i].push(target);
                callers[target].push(i);
            }
        }

        let mut snippets = Vec::new();
        for (i, def) in definitions.iter().enumerate() {
            if !def.is_public && !self.policy.include_private {
                continue;
            }
            snippets.push(self.assemble(i, def, &definitions, &callees, &callers, spec));
        }
        snippets
    }

    fn assemble(
        &self,
        index: usize,
        def: &Definition,
        definitions: &[Definition],
        callees: &[Vec<usize>],
        callers: &[Vec<usize>],
        spec: &LanguageSpec,
    ) -> AssembledSnippet {
        // Callee sources in BFS first-seen order
        let mut dependency_order: Vec<usize> = Vec::new();
        let mut visited: HashSet<usize> = HashSet::from([index]);
        let mut frontier: VecDeque<(usize, usize)> = VecDeque::from([(index, 0)]);

        while let Some((current, depth)) = frontier.pop_front() {
            if depth >= self.policy.max_dependency_depth {
                continue;
            }
            for &next in &callees[current] {
                if !visited.insert(next) {
                    continue;
                }
                if dependency_order.len() < self.policy.max_dependency_count {
                    dependency_order.push(next);
                    frontier.push_back((next, depth + 1));
                }
            }
        }

        // Callers sort lexicographically before truncation
        let mut example_indices: Vec<usize> = callers[index].clone();
        example_indices.sort_by(|&a, &b| {
            definitions[a]
                .qualified_name
                .cmp(&definitions[b].qualified_name)
        });
        example_indices.dedup();
        example_indices.truncate(self.policy.max_examples);

        let mut parts: Vec<String> = vec![def.source.clone()];
        let mut source_files: Vec<String> = vec![def.file_path.clone()];

        for &dep in &dependency_order {
            parts.push(definitions[dep].source.clone());
            source_files.push(definitions[dep].file_path.clone());
        }
        for &example in &example_indices {
            parts.push(format!(
                "{} example usage\n{}",
                spec.comment_prefix, definitions[example].source
            ));
            source_files.push(definitions[example].file_path.clone());
        }

        source_files.sort();
        source_files.dedup();

        let content = parts.join("\n\n");
        let sha = format!("{:x}", Sha256::digest(content.as_bytes()));
        let extension = def
            .file_path
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_string();

        AssembledSnippet {
            sha,
            content,
            extension,
            qualified_name: def.qualified_name.clone(),
            source_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn go_file(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    const MATH_GO: &str = r#"package mathutil

// Add returns the sum of two integers.
func Add(a, b int) int {
	return clamp(a + b)
}

// Multiply returns the product of two integers.
func Multiply(a, b int) int {
	return clamp(a * b)
}

func clamp(v int) int {
	return v
}
"#;

    #[test]
    fn test_public_functions_become_snippets_with_dependencies() {
        let slicer = Slicer::new(SlicerPolicy::default());
        let snippets = slicer.slice(&[go_file("mathutil/math.go", MATH_GO)]);

        // Two public functions, two snippets; clamp is private
        assert_eq!(snippets.len(), 2);
        let add = snippets
            .iter()
            .find(|s| s.qualified_name == "math.Add")
            .unwrap();
        assert!(add.content.contains("func Add"));
        assert!(add.content.contains("func clamp"), "dependency inlined");
        assert_eq!(add.source_files, vec!["mathutil/math.go"]);
    }

    #[test]
    fn test_sha_is_content_hash_and_distinct() {
        let slicer = Slicer::new(SlicerPolicy::default());
        let snippets = slicer.slice(&[go_file("mathutil/math.go", MATH_GO)]);

        for snippet in &snippets {
            let expected = format!("{:x}", Sha256::digest(snippet.content.as_bytes()));
            assert_eq!(snippet.sha, expected);
        }
        assert_ne!(snippets[0].sha, snippets[1].sha);
    }

    #[test]
    fn test_include_private_emits_private_snippets_with_examples() {
        let slicer = Slicer::new(SlicerPolicy {
            include_private: true,
            ..SlicerPolicy::default()
        });
        let snippets = slicer.slice(&[go_file("mathutil/math.go", MATH_GO)]);

        assert_eq!(snippets.len(), 3);
        let clamp = snippets
            .iter()
            .find(|s| s.qualified_name == "math.clamp")
            .unwrap();
        // Callers sorted lexicographically: Add before Multiply
        assert!(clamp.content.contains("// example usage"));
        let add_pos = clamp.content.find("func Add").unwrap();
        let mul_pos = clamp.content.find("func Multiply").unwrap();
        assert!(add_pos < mul_pos);
    }

    #[test]
    fn test_cross_file_resolution() {
        let main = go_file(
            "app/main.go",
            "package main\n\nfunc Run() {\n\tHelper()\n}\n",
        );
        let util = go_file(
            "app/util.go",
            "package main\n\nfunc Helper() {\n}\n",
        );

        let slicer = Slicer::new(SlicerPolicy::default());
        let snippets = slicer.slice(&[main, util]);

        let run = snippets
            .iter()
            .find(|s| s.qualified_name == "main.Run")
            .unwrap();
        assert!(run.content.contains("func Helper"));
        assert_eq!(run.source_files, vec!["app/main.go", "app/util.go"]);
    }

    #[test]
    fn test_dependency_budget_limits_bfs() {
        let chain = go_file(
            "chain/chain.go",
            r#"package chain

func A() { B() }

func B() { C() }

func C() { D() }

func D() {}
"#,
        );

        let slicer = Slicer::new(SlicerPolicy {
            max_dependency_depth: 1,
            include_private: true,
            ..SlicerPolicy::default()
        });
        let snippets = slicer.slice(&[chain]);

        let a = snippets
            .iter()
            .find(|s| s.qualified_name == "chain.A")
            .unwrap();
        assert!(a.content.contains("func B"));
        assert!(!a.content.contains("func C"), "depth 1 stops after B");
    }

    #[test]
    fn test_unresolved_callee_does_not_fail_snippet() {
        let slicer = Slicer::new(SlicerPolicy::default());
        let snippets = slicer.slice(&[go_file(
            "app/ext.go",
            "package app\n\nfunc Fetch() {\n\thttpGet()\n}\n",
        )]);

        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].content.contains("func Fetch"));
    }

    #[test]
    fn test_identical_content_dedupes_to_one_snippet() {
        let a = go_file("a/dup.go", "package a\n\nfunc Same() int {\n\treturn 1\n}\n");
        let b = go_file("b/dup.go", "package a\n\nfunc Same() int {\n\treturn 1\n}\n");

        let slicer = Slicer::new(SlicerPolicy::default());
        let snippets = slicer.slice(&[a, b]);

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].source_files, vec!["a/dup.go", "b/dup.go"]);
    }

    #[test]
    fn test_unsupported_and_oversized_files_are_skipped() {
        let big = SourceFile {
            path: "big.go".to_string(),
            content: format!("package big\n// {}\n", "x".repeat(64)),
        };
        let unknown = go_file("notes.txt", "not code");

        let slicer = Slicer::new(SlicerPolicy {
            max_file_bytes: 32,
            ..SlicerPolicy::default()
        });
        assert!(slicer.slice(&[big, unknown]).is_empty());
    }
}

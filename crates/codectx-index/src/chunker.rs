//! Syntax-aware chunking via tree-sitter.

use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tree_sitter::{Node, Parser};
use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::languages::Lang;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    Function,
    Class,
    Method,
    Other,
}

impl SymbolType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Other => "other",
        }
    }
}

/// One declaration-sized piece of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    pub id: String,
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub content: String,
    pub symbol_type: SymbolType,
    pub symbol_name: Option<String>,
    pub language: Lang,
    pub workspace_id: String,
}

impl CodeChunk {
    /// Text sent to the embedding model: a short header naming the file and
    /// symbol followed by the code, cut to at most `max_chars` code characters.
    #[must_use]
    pub fn embedding_text(&self, max_chars: usize) -> String {
        let code = truncate_chars(&self.content, max_chars);
        match &self.symbol_name {
            Some(name) => format!(
                "// {} {} {name}\n{code}",
                self.file_path,
                self.symbol_type.as_str()
            ),
            None => format!("// {} {}\n{code}", self.file_path, self.symbol_type.as_str()),
        }
    }

    /// Payload stored next to the vector. `file_path` is added by the store.
    #[must_use]
    pub fn payload(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("start_line".into(), Value::from(self.start_line));
        m.insert("end_line".into(), Value::from(self.end_line));
        m.insert("symbol_type".into(), Value::from(self.symbol_type.as_str()));
        if let Some(name) = &self.symbol_name {
            m.insert("symbol_name".into(), Value::from(name.as_str()));
        }
        m.insert("language".into(), Value::from(self.language.id()));
        m.insert("workspace_id".into(), Value::from(self.workspace_id.as_str()));
        m.insert("content".into(), Value::from(self.content.as_str()));
        m
    }
}

/// Deterministic chunk id: UUID v5 over the path, line span and byte span.
///
/// The byte span keeps declarations that share lines (an impl and its method
/// written on one line) apart.
#[must_use]
pub fn chunk_id(
    file_path: &str,
    start_line: usize,
    end_line: usize,
    bytes: Range<usize>,
) -> String {
    let key = format!(
        "{file_path}:{start_line}:{end_line}:{}-{}",
        bytes.start, bytes.end
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parse `source` and emit one chunk per function, class or method node.
///
/// Nested declarations each get their own chunk, so line ranges may overlap.
/// Unsupported languages (`lang` is `None` or its grammar is not compiled in)
/// yield no chunks. A file with content but no declarations yields a single
/// file-level [`SymbolType::Other`] chunk.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] when the grammar reports syntax errors.
pub fn chunk_file(
    source: &str,
    file_path: &str,
    lang: Option<Lang>,
    workspace_id: &str,
) -> Result<Vec<CodeChunk>> {
    let Some((lang, grammar)) = lang.and_then(|l| l.grammar().map(|g| (l, g))) else {
        return Ok(Vec::new());
    };
    if source.trim().is_empty() {
        return Ok(Vec::new());
    }

    let parse_err = |reason: String| IndexError::Parse {
        path: file_path.to_owned(),
        reason,
    };

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| parse_err(format!("set_language failed: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| parse_err("parser returned no tree".into()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(parse_err(format!("{} syntax error", lang.id())));
    }

    let mut chunks = Vec::new();
    let mut seen = HashSet::new();
    let containers = lang.container_kinds();
    // preorder walk; outer declarations precede their nested members
    let mut stack: Vec<(Node<'_>, bool)> = vec![(root, false)];
    while let Some((node, in_container)) = stack.pop() {
        if let Some(symbol_type) = lang.classify(&node, in_container) {
            let start_line = node.start_position().row + 1;
            let end_line = node.end_position().row + 1;
            let id = chunk_id(file_path, start_line, end_line, node.byte_range());
            if seen.insert(id.clone()) {
                chunks.push(CodeChunk {
                    id,
                    file_path: file_path.to_owned(),
                    start_line,
                    end_line,
                    content: source[node.byte_range()].to_owned(),
                    symbol_type,
                    symbol_name: symbol_name(&node, source),
                    language: lang,
                    workspace_id: workspace_id.to_owned(),
                });
            }
        }

        let child_in_container = in_container || containers.contains(&node.kind());
        let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
        for i in (0..count).rev() {
            if let Some(child) = node.named_child(i) {
                stack.push((child, child_in_container));
            }
        }
    }

    if chunks.is_empty() {
        let end_line = source.lines().count().max(1);
        chunks.push(CodeChunk {
            id: chunk_id(file_path, 1, end_line, 0..source.len()),
            file_path: file_path.to_owned(),
            start_line: 1,
            end_line,
            content: source.to_owned(),
            symbol_type: SymbolType::Other,
            symbol_name: None,
            language: lang,
            workspace_id: workspace_id.to_owned(),
        });
    }

    Ok(chunks)
}

fn symbol_name(node: &Node<'_>, source: &str) -> Option<String> {
    // tree-sitter-rust: impl_item uses "type" field, most others use "name"
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .map(|n| source[n.byte_range()].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(chunks: &[CodeChunk]) -> Vec<(SymbolType, Option<&str>)> {
        chunks
            .iter()
            .map(|c| (c.symbol_type, c.symbol_name.as_deref()))
            .collect()
    }

    #[test]
    fn chunk_id_is_deterministic_uuid() {
        let a = chunk_id("src/lib.rs", 3, 9, 40..200);
        assert_eq!(a, chunk_id("src/lib.rs", 3, 9, 40..200));
        assert_ne!(a, chunk_id("src/lib.rs", 3, 10, 40..200));
        assert_ne!(a, chunk_id("src/lib.rs", 3, 9, 52..200));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn unsupported_language_yields_nothing() {
        let chunks = chunk_file("anything", "README.md", None, "ws").unwrap();
        assert!(chunks.is_empty());
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_functions_structs_and_methods() {
        let source = r"
struct Config {
    port: u16,
}

impl Config {
    fn port(&self) -> u16 {
        self.port
    }
}

fn main() {}
";
        let chunks = chunk_file(source, "src/main.rs", Some(Lang::Rust), "ws").unwrap();
        assert_eq!(
            kinds(&chunks),
            vec![
                (SymbolType::Class, Some("Config")),
                (SymbolType::Class, Some("Config")),
                (SymbolType::Method, Some("port")),
                (SymbolType::Function, Some("main")),
            ]
        );
        let method = &chunks[2];
        assert_eq!((method.start_line, method.end_line), (7, 9));
        assert!(method.content.starts_with("fn port"));
        // method range nests inside the impl range
        assert!(chunks[1].start_line <= method.start_line && method.end_line <= chunks[1].end_line);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rechunking_unchanged_source_gives_same_ids() {
        let source = "fn a() {}\nfn b() {}\n";
        let first = chunk_file(source, "x.rs", Some(Lang::Rust), "ws").unwrap();
        let second = chunk_file(source, "x.rs", Some(Lang::Rust), "ws").unwrap();
        assert_eq!(first, second);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn declarations_sharing_a_line_get_distinct_chunks() {
        let source = "impl X { fn a() {} fn b() {} }\n";
        let chunks = chunk_file(source, "one.rs", Some(Lang::Rust), "ws").unwrap();
        assert_eq!(
            kinds(&chunks),
            vec![
                (SymbolType::Class, Some("X")),
                (SymbolType::Method, Some("a")),
                (SymbolType::Method, Some("b")),
            ]
        );
        assert!(chunks.iter().all(|c| (c.start_line, c.end_line) == (1, 1)));
        let ids: HashSet<_> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn malformed_rust_is_a_parse_error() {
        let err = chunk_file("fn broken( {", "bad.rs", Some(Lang::Rust), "ws").unwrap_err();
        assert!(matches!(err, IndexError::Parse { ref path, .. } if path == "bad.rs"));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn declaration_free_file_becomes_one_other_chunk() {
        let source = "use std::io;\n\nconst X: u8 = 1;\n";
        let chunks = chunk_file(source, "consts.rs", Some(Lang::Rust), "ws").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_type, SymbolType::Other);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn whitespace_only_file_yields_nothing() {
        assert!(chunk_file("\n\n  \n", "empty.rs", Some(Lang::Rust), "ws")
            .unwrap()
            .is_empty());
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_methods() {
        let source = "class Greeter:\n    def hello(self):\n        return 1\n\ndef top():\n    pass\n";
        let chunks = chunk_file(source, "g.py", Some(Lang::Python), "ws").unwrap();
        assert_eq!(
            kinds(&chunks),
            vec![
                (SymbolType::Class, Some("Greeter")),
                (SymbolType::Method, Some("hello")),
                (SymbolType::Function, Some("top")),
            ]
        );
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn javascript_arrow_functions_and_methods() {
        let source = "const add = (a, b) => a + b;\nclass Box {\n  open() { return 1; }\n}\n";
        let chunks = chunk_file(source, "box.js", Some(Lang::JavaScript), "ws").unwrap();
        assert_eq!(
            kinds(&chunks),
            vec![
                (SymbolType::Function, Some("add")),
                (SymbolType::Class, Some("Box")),
                (SymbolType::Method, Some("open")),
            ]
        );
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_types_functions_and_methods() {
        let source = "package main\n\ntype Server struct {\n\tport int\n}\n\nfunc (s *Server) Run() {}\n\nfunc main() {}\n";
        let chunks = chunk_file(source, "main.go", Some(Lang::Go), "ws").unwrap();
        assert_eq!(
            kinds(&chunks),
            vec![
                (SymbolType::Class, Some("Server")),
                (SymbolType::Method, Some("Run")),
                (SymbolType::Function, Some("main")),
            ]
        );
    }

    #[test]
    fn embedding_text_truncates_code_only() {
        let chunk = CodeChunk {
            id: chunk_id("a.rs", 1, 1, 0..26),
            file_path: "a.rs".into(),
            start_line: 1,
            end_line: 1,
            content: "fn long_function_name() {}".into(),
            symbol_type: SymbolType::Function,
            symbol_name: Some("long_function_name".into()),
            language: Lang::Rust,
            workspace_id: "ws".into(),
        };
        let text = chunk.embedding_text(7);
        assert_eq!(text, "// a.rs function long_function_name\nfn long");
        assert_eq!(chunk.content.len(), 26);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn payload_has_line_range_and_content() {
        let chunk = CodeChunk {
            id: chunk_id("a.py", 2, 4, 9..26),
            file_path: "a.py".into(),
            start_line: 2,
            end_line: 4,
            content: "def f():\n    pass".into(),
            symbol_type: SymbolType::Function,
            symbol_name: None,
            language: Lang::Python,
            workspace_id: "abc".into(),
        };
        let p = chunk.payload();
        assert_eq!(p["start_line"], 2);
        assert_eq!(p["end_line"], 4);
        assert_eq!(p["symbol_type"], "function");
        assert_eq!(p["workspace_id"], "abc");
        assert!(!p.contains_key("symbol_name"));
    }
}

//! Language detection, tree-sitter grammars and symbol classification.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::SymbolType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Lang {
    /// Identifier stored in the chunk payload.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Node kinds whose nested functions count as methods.
    #[must_use]
    pub fn container_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["impl_item", "trait_item"],
            Self::Python => &["class_definition"],
            Self::JavaScript | Self::TypeScript | Self::Tsx => {
                &["class_declaration", "class", "abstract_class_declaration"]
            }
            Self::Go => &[],
        }
    }

    /// Map an AST node to the symbol it declares, if it is a chunk boundary.
    ///
    /// `in_container` is true when an ancestor is one of [`Self::container_kinds`].
    #[must_use]
    pub fn classify(self, node: &tree_sitter::Node<'_>, in_container: bool) -> Option<SymbolType> {
        let function = if in_container {
            SymbolType::Method
        } else {
            SymbolType::Function
        };
        match (self, node.kind()) {
            (Self::Rust, "function_item" | "function_signature_item") => Some(function),
            (Self::Rust, "impl_item" | "struct_item" | "enum_item" | "trait_item" | "union_item") => {
                Some(SymbolType::Class)
            }

            (Self::Python, "function_definition") => Some(function),
            (Self::Python, "class_definition") => Some(SymbolType::Class),

            (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "function_declaration" | "generator_function_declaration",
            ) => Some(SymbolType::Function),
            (Self::JavaScript | Self::TypeScript | Self::Tsx, "method_definition") => {
                Some(SymbolType::Method)
            }
            (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "class_declaration" | "abstract_class_declaration" | "interface_declaration",
            ) => Some(SymbolType::Class),
            // `const f = () => ...` and `const f = function () ...`
            (Self::JavaScript | Self::TypeScript | Self::Tsx, "variable_declarator") => node
                .child_by_field_name("value")
                .filter(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
                .map(|_| SymbolType::Function),

            (Self::Go, "function_declaration") => Some(SymbolType::Function),
            (Self::Go, "method_declaration") => Some(SymbolType::Method),
            (Self::Go, "type_spec") => node
                .child_by_field_name("type")
                .filter(|t| matches!(t.kind(), "struct_type" | "interface_type"))
                .map(|_| SymbolType::Class),

            _ => None,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Check if a file should be indexed (has a supported language with grammar).
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).and_then(Lang::grammar).is_some()
}

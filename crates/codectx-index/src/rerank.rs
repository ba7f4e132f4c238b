//! Pluggable query expansion and result re-ranking backed by a chat model.

use std::fmt::Write;
use std::sync::Arc;

use codectx_llm::{AnyProvider, LlmProvider, Message};
use codectx_store::BoxFuture;

use crate::chunker::truncate_chars;
use crate::error::{IndexError, Result};
use crate::query::SearchResult;

/// Snippet characters per candidate shown to the re-ranking model.
const RERANK_SNIPPET_CHARS: usize = 400;

pub trait QueryExpander: Send + Sync {
    /// Return the text to embed in place of `query`.
    fn expand<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<String>>;
}

pub trait Reranker: Send + Sync {
    /// Return candidate indices, most relevant first.
    ///
    /// The caller repairs the answer into a permutation of `0..candidates.len()`.
    fn rerank<'a>(
        &'a self,
        query: &'a str,
        candidates: &'a [SearchResult],
    ) -> BoxFuture<'a, Result<Vec<usize>>>;
}

/// Appends related identifiers and terms suggested by the chat model.
#[derive(Debug, Clone)]
pub struct LlmQueryExpander {
    provider: Arc<AnyProvider>,
}

impl LlmQueryExpander {
    #[must_use]
    pub fn new(provider: Arc<AnyProvider>) -> Self {
        Self { provider }
    }
}

impl QueryExpander for LlmQueryExpander {
    fn expand<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let messages = [
                Message::system(
                    "You expand code search queries. Reply with a single line of up to ten \
                     related identifiers, keywords or synonyms separated by spaces. \
                     Do not repeat the query and do not explain.",
                ),
                Message::user(query),
            ];
            let reply = self.provider.chat(&messages).await?;
            let terms = reply.lines().next().unwrap_or_default().trim();
            if terms.is_empty() {
                return Ok(query.to_owned());
            }
            Ok(format!("{query} {terms}"))
        })
    }
}

/// Asks the chat model to order candidates and reads back a JSON index array.
#[derive(Debug, Clone)]
pub struct LlmReranker {
    provider: Arc<AnyProvider>,
}

impl LlmReranker {
    #[must_use]
    pub fn new(provider: Arc<AnyProvider>) -> Self {
        Self { provider }
    }
}

impl Reranker for LlmReranker {
    fn rerank<'a>(
        &'a self,
        query: &'a str,
        candidates: &'a [SearchResult],
    ) -> BoxFuture<'a, Result<Vec<usize>>> {
        Box::pin(async move {
            let mut prompt = format!("Query: {query}\n\nCandidates:\n");
            for (i, c) in candidates.iter().enumerate() {
                let _ = writeln!(
                    prompt,
                    "[{i}] {}\n{}\n",
                    c.file_path,
                    truncate_chars(&c.best_snippet, RERANK_SNIPPET_CHARS)
                );
            }
            let messages = [
                Message::system(
                    "You rank source files by relevance to a code search query. Reply with \
                     only a JSON array of candidate numbers, most relevant first.",
                ),
                Message::user(prompt),
            ];
            let reply = self.provider.chat(&messages).await?;
            parse_order(&reply)
        })
    }
}

/// Extract the first JSON array of integers from a model reply.
fn parse_order(reply: &str) -> Result<Vec<usize>> {
    let start = reply.find('[');
    let end = reply.rfind(']');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(IndexError::Other(format!("re-ranker reply has no index array: {reply:?}")));
    };
    if end < start {
        return Err(IndexError::Other(format!("re-ranker reply has no index array: {reply:?}")));
    }
    serde_json::from_str(&reply[start..=end])
        .map_err(|e| IndexError::Other(format!("re-ranker reply is not an index array: {e}")))
}

/// Reorder `items` by `order`, dropping out-of-range and repeated indices and
/// appending anything the order left out in its original position.
///
/// Membership never changes; only the order does.
pub(crate) fn apply_order<T>(items: Vec<T>, order: &[usize]) -> Vec<T> {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    for &i in order {
        if let Some(item) = slots.get_mut(i).and_then(Option::take) {
            out.push(item);
        }
    }
    out.extend(slots.into_iter().flatten());
    out
}

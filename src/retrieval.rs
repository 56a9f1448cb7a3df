//! Retrieval client.
//!
//! [`Retriever`] validates the query, asks a [`PassageSearch`] backend for the
//! top-k passages and joins them into a single context blob. Zero passages is
//! not an error: it yields [`RetrievedContext::NothingFound`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{CarelineError, Result};
use crate::models::{RetrievedContext, MAX_INPUT_CHARS};

/// Similarity search over a prebuilt passage index.
#[async_trait]
pub trait PassageSearch: Send + Sync {
    /// Up to `k` passage texts, best match first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>>;
}

pub struct Retriever {
    search: Arc<dyn PassageSearch>,
    top_k: usize,
}

impl Retriever {
    pub fn new(search: Arc<dyn PassageSearch>, top_k: usize) -> Self {
        Self {
            search,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext> {
        if query.trim().is_empty() {
            return Err(CarelineError::invalid("retrieval query cannot be empty"));
        }
        if query.chars().count() > MAX_INPUT_CHARS {
            return Err(CarelineError::invalid(format!(
                "retrieval query exceeds maximum length of {} characters",
                MAX_INPUT_CHARS
            )));
        }

        let passages = self
            .search
            .search(query, self.top_k)
            .await
            .map_err(|e| {
                error!(error = %e, "passage search failed");
                match e {
                    e @ CarelineError::Retrieval(_) => e,
                    other => CarelineError::Retrieval(other.to_string()),
                }
            })?;

        debug!(count = passages.len(), k = self.top_k, "passages retrieved");

        if passages.is_empty() {
            return Ok(RetrievedContext::NothingFound);
        }
        Ok(RetrievedContext::Passages(passages.join("\n")))
    }
}

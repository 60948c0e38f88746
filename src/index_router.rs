//! Per-model index routing and dimension reconciliation.
//!
//! Each embedding model writes into its own physical index, named by
//! sanitizing the model name onto a configured base. Before any write the
//! index's recorded vector dimensionality must agree with the model's;
//! mixing dimensions in one index is otherwise undetectable until query
//! time.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Error, Result};
use crate::index_store::IndexStore;

fn non_alnum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex"))
}

/// Sanitize a model name for use inside an index name.
///
/// Runs of non-alphanumeric characters become single underscores; the result
/// is trimmed and lowercased. `"text-embedding-3-large"` becomes
/// `"text_embedding_3_large"`.
pub fn sanitize_model_key(model: &str) -> String {
    non_alnum_re()
        .replace_all(model, "_")
        .trim_matches('_')
        .to_lowercase()
}

/// Full index name for a model: `{base_index}__{sanitized_model}`.
pub fn resolve_index_name(base_index: &str, model: &str) -> String {
    format!("{}__{}", base_index, sanitize_model_key(model))
}

/// Make sure `index_name` exists with the given vector dimension.
///
/// A missing index is created with `dimension`; an existing index must
/// already record exactly `dimension` or the operation fails with
/// [`Error::DimensionMismatch`] before anything is written.
pub async fn ensure_index(
    store: &dyn IndexStore,
    index_name: &str,
    dimension: usize,
) -> Result<()> {
    if !store.exists(index_name).await? {
        tracing::info!(index = index_name, dimension, "creating index");
        return store.create(index_name, dimension).await;
    }

    let existing = store.dimension(index_name).await?.ok_or_else(|| {
        Error::Internal(format!(
            "index {} exists but has no recorded dimension",
            index_name
        ))
    })?;

    if existing != dimension {
        return Err(Error::DimensionMismatch {
            index_name: index_name.to_string(),
            expected: dimension,
            actual: existing,
        });
    }

    tracing::debug!(index = index_name, dimension, "index dimension verified");
    Ok(())
}

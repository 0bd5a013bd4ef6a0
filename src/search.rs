//! Semantic search over indexed chunks.
//!
//! The query is embedded with the same embedder used at ingestion time and
//! sent to the vector index, optionally restricted to one line of business.
//! Results come back in descending similarity order.

use crate::context::AppContext;
use crate::error::Result;
use crate::index::MetadataFilter;
use crate::models::SearchHit;

/// Embed `query` and return the `limit` closest chunks.
///
/// A blank query returns an empty list. A missing embedder or index is an
/// error here so callers can tell "nothing matched" from "could not search";
/// use [`search_or_empty`] to get the degraded behaviour instead.
pub async fn search(
    ctx: &AppContext,
    query: &str,
    lob: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let embedder = ctx.embedder()?;
    let index = ctx.index()?;

    let vector = embedder.embed(query).await?;
    let filter = lob.map(MetadataFilter::lob);
    let matches = index.query(&vector, limit, filter.as_ref()).await?;

    tracing::debug!(query, ?lob, hits = matches.len(), "search complete");
    Ok(matches.into_iter().map(SearchHit::from_match).collect())
}

/// Like [`search`], but any failure is logged and yields no results.
pub async fn search_or_empty(
    ctx: &AppContext,
    query: &str,
    lob: Option<&str>,
    limit: usize,
) -> Vec<SearchHit> {
    match search(ctx, query, lob, limit).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "search unavailable; returning no results");
            Vec::new()
        }
    }
}

/// Print hits the way `ba search` shows them.
pub fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (lob: {}, chunk {})",
            i + 1,
            hit.score,
            hit.document_name,
            if hit.lob.is_empty() { "-" } else { &hit.lob },
            hit.metadata
                .get("chunk_index")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string()),
        );
        println!("    {}", preview(&hit.content, 200));
        println!();
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        format!("{}...", crate::index::truncate_chars(&flat, max_chars))
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::RecordStore;

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\n\nb   c", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc...");
    }

    #[tokio::test]
    async fn test_degraded_search_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::minimal(dir.path().join("ba.sqlite"));
        let store = RecordStore::connect(&config.db).await.unwrap();
        let ctx = AppContext::from_parts(config, store, None, None);

        assert!(search(&ctx, "collision coverage", None, 5).await.is_err());
        assert!(search_or_empty(&ctx, "collision coverage", None, 5)
            .await
            .is_empty());
        assert!(search(&ctx, "   ", None, 5).await.unwrap().is_empty());
    }
}

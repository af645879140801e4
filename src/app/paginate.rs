//! Paginated field resolution over split queries
//!
//! Resolving "all matching values of one field" is the common prefix of both
//! the submission dedupe snapshot and the download id-set resolution: split
//! the filter query into bounded sub-queries, fetch the first page of each
//! to learn the totals, then fan the remaining pages through the scheduler.

use std::sync::Arc;

use indicatif::ProgressBar;
use serde_json::Value;

use crate::app::client::ApiClient;
use crate::app::models::Resource;
use crate::app::query::{split_query, Query};
use crate::app::scheduler::{Fetched, RequestScheduler, TrackedRequest};
use crate::errors::Result;

/// Number of pages needed for `total` records at `per_page`
pub fn total_pages(total: usize, per_page: usize) -> usize {
    let per_page = per_page.max(1);
    (total + per_page - 1) / per_page
}

/// Pull one field's value out of each record
pub fn extract_field(records: &[Value], field: &str) -> Vec<String> {
    records
        .iter()
        .filter_map(|record| match record.get(field) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Resolve every value of `field` across all records matching `query`
///
/// First pages are fetched eagerly to learn each sub-query's total; the
/// remaining pages run concurrently under the scheduler's budget. With an
/// exhausted budget the result is partial, mirroring the scheduler's
/// advisory-timeout semantics.
pub async fn resolve_values(
    client: &Arc<ApiClient>,
    scheduler: &RequestScheduler,
    resource: Resource,
    query: &Query,
    field: &str,
    progress: Option<ProgressBar>,
) -> Result<Vec<String>> {
    let per_page = resource.max_per_page();
    let subqueries = split_query(query, per_page, None)?;

    let mut values = Vec::new();
    let mut requests = Vec::new();

    for (slot, sub) in subqueries.iter().enumerate() {
        let first = client
            .get_page(resource, sub, &[field], None, Some(1), Some(per_page))
            .await?;
        values.extend(extract_field(&first.data, field));

        // Page fan-out goes through the splitter so every sub-query shape
        // comes from one place; the first page was already fetched above.
        let pages = total_pages(first.total_count, per_page);
        for (index, paged) in split_query(sub, per_page, Some(pages))?
            .into_iter()
            .enumerate()
            .skip(1)
        {
            let client = client.clone();
            let field = field.to_string();
            let track_id = format!("{}:{}:{}", resource.path(), slot, index + 1);
            requests.push(TrackedRequest::new(track_id, async move {
                let page_data = client
                    .get_page(resource, &paged, &[&field], None, None, Some(per_page))
                    .await?;
                let count = page_data.data.len();
                Ok(Fetched::new(Value::Array(page_data.data), count))
            }));
        }
    }

    let outcomes = scheduler.run(requests, progress).await;
    for fetched in outcomes.values() {
        if let Value::Array(records) = &fetched.value {
            values.extend(extract_field(records, field));
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 100), 0);
        assert_eq!(total_pages(1, 100), 1);
        assert_eq!(total_pages(100, 100), 1);
        assert_eq!(total_pages(101, 100), 2);
        assert_eq!(total_pages(250, 100), 3);
    }

    #[test]
    fn test_extract_field_skips_missing() {
        let records = vec![
            json!({"id": "c-1"}),
            json!({"other": true}),
            json!({"id": 42}),
        ];
        assert_eq!(extract_field(&records, "id"), vec!["c-1", "42"]);
    }
}

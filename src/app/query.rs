//! Query splitting for bounded sub-queries
//!
//! Filter queries may carry list-valued operators (`__in` style) whose
//! serialized form exceeds either the operation's page size or the URL
//! length ceiling. This module splits such a query into sub-queries that
//! each fit both bounds, preserving every scalar field of the original.

use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::limits;
use crate::errors::{QueryError, QueryResult};

/// A filter query: field (with optional `__op` suffix) to value
pub type Query = Map<String, Value>;

/// Split a query into bounded sub-queries
///
/// At most one list-valued field may require splitting; the list is chunked
/// into groups of at most `per_page` entries, shrinking by 20% as long as a
/// chunk's comma-joined serialization exceeds the URL length ceiling. When
/// no split is needed and an explicit page count is requested, the query
/// fans out by page number instead.
///
/// Every returned sub-query carries all of the original's scalar fields,
/// and the union of any split field's chunks equals the original list.
pub fn split_query(query: &Query, per_page: usize, pages: Option<usize>) -> QueryResult<Vec<Query>> {
    let mut oversized: Vec<(&String, &Vec<Value>)> = Vec::new();

    for (field, value) in query {
        if let Value::Array(items) = value {
            if items.len() > per_page || joined_len(field, items)? > limits::MAX_FILTER_CHARS {
                oversized.push((field, items));
            }
        }
    }

    if oversized.len() > 1 {
        return Err(QueryError::MultipleListFields {
            fields: oversized.iter().map(|(f, _)| (*f).clone()).collect(),
        });
    }

    let Some((field, items)) = oversized.pop() else {
        // Nothing to split; optionally fan out by page number
        return Ok(match pages {
            Some(n) if n > 1 => (1..=n)
                .map(|page| {
                    let mut sub = query.clone();
                    sub.insert("page".to_string(), Value::from(page));
                    sub
                })
                .collect(),
            _ => vec![query.clone()],
        });
    };

    let chunk_size = fit_chunk_size(field, items, per_page)?;
    debug!(
        field = %field,
        entries = items.len(),
        chunk_size,
        "splitting list filter into bounded sub-queries"
    );

    Ok(items
        .chunks(chunk_size)
        .map(|chunk| {
            let mut sub = query.clone();
            sub.insert(field.clone(), Value::Array(chunk.to_vec()));
            sub
        })
        .collect())
}

/// Largest chunk size, at most `per_page`, whose serialized form fits the
/// URL ceiling. Shrinks progressively by the configured factor.
fn fit_chunk_size(field: &str, items: &[Value], per_page: usize) -> QueryResult<usize> {
    let mut chunk_size = per_page.min(items.len()).max(1);

    loop {
        let widest = items
            .chunks(chunk_size)
            .map(|chunk| joined_len(field, chunk))
            .collect::<QueryResult<Vec<_>>>()?
            .into_iter()
            .max()
            .unwrap_or(0);

        if widest <= limits::MAX_FILTER_CHARS {
            return Ok(chunk_size);
        }

        if chunk_size == 1 {
            return Err(QueryError::ValueTooLong {
                field: field.to_string(),
            });
        }

        let shrunk = ((chunk_size as f64) * limits::CHUNK_SHRINK_FACTOR).floor() as usize;
        chunk_size = shrunk.clamp(1, chunk_size - 1);
    }
}

/// Length of the comma-joined filter value for a chunk
fn joined_len(field: &str, items: &[Value]) -> QueryResult<usize> {
    let mut len = items.len().saturating_sub(1); // commas
    for item in items {
        len += filter_repr(field, item)?.len();
    }
    Ok(len)
}

/// Serialized form of one filter value as it appears on the URL
pub fn filter_repr(field: &str, value: &Value) -> QueryResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(QueryError::UnsupportedListEntry {
            field: field.to_string(),
        }),
    }
}

/// Serialized form of a whole query value (lists comma-joined)
pub fn param_repr(field: &str, value: &Value) -> QueryResult<String> {
    match value {
        Value::Array(items) => {
            let parts: QueryResult<Vec<String>> =
                items.iter().map(|item| filter_repr(field, item)).collect();
            Ok(parts?.join(","))
        }
        other => filter_repr(field, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(value: Value) -> Query {
        value.as_object().cloned().unwrap()
    }

    fn ids(n: usize) -> Vec<Value> {
        (0..n).map(|i| Value::from(format!("mp-{}", i))).collect()
    }

    #[test]
    fn test_no_split_needed_returns_single_query() {
        let q = query(json!({"project": "p", "identifier__in": ["mp-1", "mp-2"]}));
        let subs = split_query(&q, 100, None).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0], q);
    }

    #[test]
    fn test_page_fanout_when_single_query() {
        let q = query(json!({"project": "p"}));
        let subs = split_query(&q, 100, Some(3)).unwrap();
        assert_eq!(subs.len(), 3);
        for (i, sub) in subs.iter().enumerate() {
            assert_eq!(sub["page"], Value::from(i + 1));
            assert_eq!(sub["project"], Value::from("p"));
        }
    }

    #[test]
    fn test_split_by_page_size_preserves_union() {
        let mut q = query(json!({"project": "p"}));
        q.insert("identifier__in".into(), Value::Array(ids(250)));

        let subs = split_query(&q, 100, None).unwrap();
        assert_eq!(subs.len(), 3);

        let mut collected = Vec::new();
        for sub in &subs {
            let chunk = sub["identifier__in"].as_array().unwrap();
            assert!(chunk.len() <= 100);
            assert_eq!(sub["project"], Value::from("p"));
            collected.extend(chunk.iter().cloned());
        }
        assert_eq!(collected, ids(250));
    }

    #[test]
    fn test_split_shrinks_for_url_ceiling() {
        // 100 entries of 100 chars each join to ~10100 chars, well past the
        // 4000-char ceiling, so chunks must shrink below the page size
        let long_ids: Vec<Value> = (0..100)
            .map(|i| Value::from(format!("{:0>100}", i)))
            .collect();
        let mut q = query(json!({}));
        q.insert("identifier__in".into(), Value::Array(long_ids.clone()));

        let subs = split_query(&q, 100, None).unwrap();
        assert!(subs.len() > 1);

        let mut collected = Vec::new();
        for sub in &subs {
            let chunk = sub["identifier__in"].as_array().unwrap();
            let joined: Vec<&str> = chunk.iter().map(|v| v.as_str().unwrap()).collect();
            assert!(joined.join(",").len() <= limits::MAX_FILTER_CHARS);
            collected.extend(chunk.iter().cloned());
        }
        assert_eq!(collected, long_ids);
    }

    #[test]
    fn test_single_value_past_ceiling_is_an_error() {
        let huge = "x".repeat(limits::MAX_FILTER_CHARS + 1);
        let mut q = query(json!({}));
        q.insert(
            "identifier__in".into(),
            Value::Array(vec![Value::from(huge)]),
        );

        match split_query(&q, 100, None) {
            Err(QueryError::ValueTooLong { field }) => assert_eq!(field, "identifier__in"),
            other => panic!("expected ValueTooLong, got {:?}", other),
        }
    }

    #[test]
    fn test_two_oversized_lists_rejected() {
        let mut q = query(json!({}));
        q.insert("identifier__in".into(), Value::Array(ids(200)));
        q.insert("formula__in".into(), Value::Array(ids(200)));

        match split_query(&q, 100, None) {
            Err(QueryError::MultipleListFields { fields }) => assert_eq!(fields.len(), 2),
            other => panic!("expected MultipleListFields, got {:?}", other),
        }
    }

    #[test]
    fn test_param_repr_joins_lists() {
        let value = json!(["a", "b", 3]);
        assert_eq!(param_repr("f", &value).unwrap(), "a,b,3");
        assert_eq!(param_repr("f", &json!(true)).unwrap(), "true");
    }
}

//! Custom query loading from JSON files

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use super::{query_id, Difficulty, GeneratedQuery, Provenance};

/// Error type for query loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}

/// Accepted file shapes: a bare array or `{ "queries": [...] }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryFile {
    List(Vec<QueryEntry>),
    Wrapped { queries: Vec<QueryEntry> },
}

#[derive(Debug, Deserialize)]
struct QueryEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "text")]
    query: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    difficulty: Option<Difficulty>,
}

/// Load queries from a JSON file
pub fn load_queries_from_file(path: impl AsRef<Path>) -> Result<Vec<GeneratedQuery>, LoadError> {
    let content = std::fs::read_to_string(path)?;
    load_queries_from_str(&content)
}

/// Load queries from a JSON string
pub fn load_queries_from_str(content: &str) -> Result<Vec<GeneratedQuery>, LoadError> {
    let file: QueryFile =
        serde_json::from_str(content).map_err(|e| LoadError::Parse(e.to_string()))?;

    let entries = match file {
        QueryFile::List(entries) => entries,
        QueryFile::Wrapped { queries } => queries,
    };

    // Explicit ids are claimed first so generated ones never collide with them
    let mut seen = HashSet::new();
    for id in entries.iter().filter_map(|entry| entry.id.as_deref()) {
        if !seen.insert(id.to_string()) {
            return Err(LoadError::Parse(format!("duplicate query id '{}'", id)));
        }
    }

    let mut queries = Vec::with_capacity(entries.len());
    let mut next = 0;
    for (index, entry) in entries.into_iter().enumerate() {
        let text = entry
            .query
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| LoadError::MissingField(format!("query (entry {})", index)))?;

        let id = match entry.id {
            Some(id) => id,
            None => {
                next = next.max(index);
                while seen.contains(&query_id(next)) {
                    next += 1;
                }
                let id = query_id(next);
                seen.insert(id.clone());
                id
            }
        };

        queries.push(GeneratedQuery {
            id,
            text,
            category: entry.category,
            difficulty: entry.difficulty,
            provenance: Provenance::Custom,
        });
    }

    if queries.is_empty() {
        return Err(LoadError::Parse("query file contains no queries".to_string()));
    }

    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_bare_array() {
        let json = r#"[
            {"query": "Translate: good morning", "category": "greeting", "difficulty": "easy"},
            {"query": "Translate a legal clause"}
        ]"#;

        let queries = load_queries_from_str(json).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].id, "q0001");
        assert_eq!(queries[0].difficulty, Some(Difficulty::Easy));
        assert_eq!(queries[1].provenance, Provenance::Custom);
    }

    #[test]
    fn test_load_wrapped_object() {
        let json = r#"{"queries": [{"id": "custom-1", "query": "Hi"}]}"#;
        let queries = load_queries_from_str(json).unwrap();
        assert_eq!(queries[0].id, "custom-1");
    }

    #[test]
    fn test_missing_query_field() {
        let json = r#"[{"category": "x"}]"#;
        assert!(matches!(
            load_queries_from_str(json),
            Err(LoadError::MissingField(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let json = r#"[{"id": "a", "query": "x"}, {"id": "a", "query": "y"}]"#;
        assert!(load_queries_from_str(json).is_err());
    }

    #[test]
    fn test_generated_ids_skip_explicit_ones() {
        let json = r#"[
            {"query": "first"},
            {"id": "q0002", "query": "second"},
            {"query": "third"},
            {"id": "q0001", "query": "fourth"},
            {"query": "fifth"}
        ]"#;

        let ids: Vec<String> = load_queries_from_str(json)
            .unwrap()
            .into_iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(ids, vec!["q0003", "q0002", "q0004", "q0001", "q0005"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.json");
        std::fs::write(&path, r#"["ignored"]"#).unwrap();
        // Plain strings are not an accepted entry shape
        assert!(load_queries_from_file(&path).is_err());

        std::fs::write(&path, r#"[{"query": "What is 2+2?"}]"#).unwrap();
        assert_eq!(load_queries_from_file(&path).unwrap().len(), 1);
    }
}

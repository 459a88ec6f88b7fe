//! JSON knowledge import
//!
//! Accepted file shapes, checked in this order:
//! - an array of entries
//! - a wrapper object holding an array under `documents`, `items` or `data`
//! - a single entry object
//!
//! An entry is an object using the field aliases below, or a bare primitive
//! which becomes the content. Anything else is rejected.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RagError, Result};

use super::store::{Document, KnowledgeStore, NewDocument};

const TITLE_KEYS: [&str; 2] = ["title", "name"];
const CONTENT_KEYS: [&str; 7] = ["content", "text", "body", "description", "message", "value", "data"];
const SOURCE_KEYS: [&str; 3] = ["source", "url", "link"];
const WRAPPER_KEYS: [&str; 3] = ["documents", "items", "data"];

const DEFAULT_FALLBACK_TITLE: &str = "Uploaded JSON Document";

// ============================================================================
// Types
// ============================================================================

/// One importable entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedDocument {
    pub title: String,
    pub content: String,
    pub source: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl From<ParsedDocument> for NewDocument {
    fn from(doc: ParsedDocument) -> Self {
        NewDocument {
            title: doc.title,
            content: doc.content,
            source: doc.source,
            metadata: doc.metadata,
        }
    }
}

/// Top-level shape of an import file
#[derive(Debug, Clone, PartialEq)]
pub enum ImportShape {
    /// `[ entry, entry, ... ]`
    ObjectArray(Vec<Value>),
    /// `{ "documents" | "items" | "data": [ ... ] }`
    Wrapped { key: &'static str, items: Vec<Value> },
    /// `{ "title": ..., "content": ... }`
    SingleObject(Map<String, Value>),
    /// A top-level primitive
    Unsupported,
}

impl ImportShape {
    pub fn detect(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::ObjectArray(items),
            Value::Object(mut map) => {
                for key in WRAPPER_KEYS {
                    if matches!(map.get(key), Some(Value::Array(_))) {
                        if let Some(Value::Array(items)) = map.remove(key) {
                            return Self::Wrapped { key, items };
                        }
                    }
                }
                Self::SingleObject(map)
            }
            _ => Self::Unsupported,
        }
    }

    /// Entries of this shape that carry content
    pub fn into_documents(self, fallback_title: &str) -> Vec<ParsedDocument> {
        match self {
            Self::ObjectArray(items) | Self::Wrapped { items, .. } => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    to_parsed_document(item, &format!("{} #{}", fallback_title, i + 1))
                })
                .collect(),
            Self::SingleObject(map) => to_parsed_document(&Value::Object(map), fallback_title)
                .into_iter()
                .collect(),
            Self::Unsupported => vec![],
        }
    }
}

/// Result of importing a batch of files
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub imported_count: usize,
    pub file_count: usize,
    pub document_ids: Vec<String>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse raw JSON into importable entries
pub fn parse_knowledge_json(
    raw: &str,
    fallback_title: &str,
) -> std::result::Result<Vec<ParsedDocument>, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(ImportShape::detect(value).into_documents(fallback_title))
}

/// Fallback title for entries without one: the file name minus `.json`
pub fn fallback_title(file_name: &str) -> String {
    let stem = strip_json_extension(file_name);
    if stem.is_empty() {
        DEFAULT_FALLBACK_TITLE.to_string()
    } else {
        stem.to_string()
    }
}

fn strip_json_extension(file_name: &str) -> &str {
    let cut = file_name.len().saturating_sub(5);
    if file_name.is_char_boundary(cut) && file_name[cut..].eq_ignore_ascii_case(".json") {
        &file_name[..cut]
    } else {
        file_name
    }
}

fn to_parsed_document(item: &Value, fallback: &str) -> Option<ParsedDocument> {
    let input = match item {
        Value::Object(map) => map,
        Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            return Some(ParsedDocument {
                title: fallback.to_string(),
                content: pretty(item),
                source: None,
                metadata: None,
            });
        }
        _ => {
            let content = normalize_text(item);
            if content.is_empty() {
                return None;
            }
            return Some(ParsedDocument {
                title: fallback.to_string(),
                content,
                source: None,
                metadata: None,
            });
        }
    };

    let title = first_string(input, &TITLE_KEYS).unwrap_or_else(|| fallback.to_string());
    let source = first_string(input, &SOURCE_KEYS);

    // First key that is present and not null wins, even if it normalizes to ""
    let mut content = CONTENT_KEYS
        .iter()
        .find_map(|key| input.get(*key).filter(|v| !v.is_null()))
        .map(normalize_text)
        .unwrap_or_default();

    if content.is_empty() {
        if input.is_empty() {
            return None;
        }
        content = pretty(item);
    }

    let metadata = match input.get("metadata") {
        Some(Value::Object(m)) => Some(m.clone()),
        _ => None,
    };

    Some(ParsedDocument {
        title,
        content,
        source,
        metadata,
    })
}

/// First non-blank string among the keys, trimmed
fn first_string(input: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match input.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn normalize_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(_) | Value::Array(_) => pretty(value),
        Value::Null => String::new(),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

// ============================================================================
// Import
// ============================================================================

/// Import one JSON payload under the given file name
///
/// Fails without writing anything if the name is not `.json`, the payload
/// does not parse, or no entry carries content.
pub fn import_json_str(store: &KnowledgeStore, file_name: &str, raw: &str) -> Result<Vec<Document>> {
    if !file_name.to_lowercase().ends_with(".json") {
        return Err(RagError::NotJsonFile(file_name.to_string()));
    }

    let docs = parse_knowledge_json(raw, &fallback_title(file_name)).map_err(|source| {
        RagError::InvalidJson {
            file: file_name.to_string(),
            source,
        }
    })?;

    if docs.is_empty() {
        return Err(RagError::NoValidDocuments(file_name.to_string()));
    }

    let mut created = Vec::with_capacity(docs.len());
    for doc in docs {
        created.push(store.add_document(doc.into())?);
    }

    tracing::info!("Imported {} documents from {}", created.len(), file_name);
    Ok(created)
}

/// Import a batch of files, stopping at the first failing file
///
/// Files processed before the failure stay imported.
pub fn import_json_files(store: &KnowledgeStore, paths: &[PathBuf]) -> Result<ImportSummary> {
    if paths.is_empty() {
        return Err(RagError::Validation(
            "Please select at least one JSON file".to_string(),
        ));
    }

    let mut summary = ImportSummary {
        file_count: paths.len(),
        ..Default::default()
    };

    for path in paths {
        let file_name = display_name(path);
        if !file_name.to_lowercase().ends_with(".json") {
            return Err(RagError::NotJsonFile(file_name));
        }

        let raw = std::fs::read_to_string(path)?;
        let docs = import_json_str(store, &file_name, &raw)?;

        summary.imported_count += docs.len();
        summary.document_ids.extend(docs.into_iter().map(|d| d.id));
    }

    Ok(summary)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    fn store() -> KnowledgeStore {
        KnowledgeStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_array_with_aliases() {
        let docs =
            parse_knowledge_json(r#"[{"text":"hello"},{"title":"T","content":"C"}]"#, "faq").unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "faq #1");
        assert_eq!(docs[0].content, "hello");
        assert_eq!(docs[1].title, "T");
        assert_eq!(docs[1].content, "C");
    }

    #[test]
    fn test_empty_object_yields_nothing() {
        assert!(parse_knowledge_json("{}", "x").unwrap().is_empty());
        assert!(parse_knowledge_json("[]", "x").unwrap().is_empty());
        assert!(parse_knowledge_json("42", "x").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json() {
        assert!(parse_knowledge_json("{not json", "x").is_err());
    }

    #[test]
    fn test_wrapper_keys() {
        for key in ["documents", "items", "data"] {
            let raw = format!(r#"{{"{}": [{{"name":"N","body":"B","url":"https://u"}}]}}"#, key);
            let docs = parse_knowledge_json(&raw, "x").unwrap();
            assert_eq!(docs.len(), 1, "wrapper key {}", key);
            assert_eq!(docs[0].title, "N");
            assert_eq!(docs[0].content, "B");
            assert_eq!(docs[0].source.as_deref(), Some("https://u"));
        }
    }

    #[test]
    fn test_data_string_is_content_not_wrapper() {
        let docs = parse_knowledge_json(r#"{"title":"T","data":"payload"}"#, "x").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "payload");
    }

    #[test]
    fn test_single_object_fields() {
        let raw = r#"{
            "title": "  Zakat  ",
            "description": "  Obligatory charity.  ",
            "link": "zakat.md",
            "metadata": {"category": "pillars"}
        }"#;
        let docs = parse_knowledge_json(raw, "fallback").unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Zakat");
        assert_eq!(docs[0].content, "Obligatory charity.");
        assert_eq!(docs[0].source.as_deref(), Some("zakat.md"));
        assert_eq!(
            docs[0].metadata.as_ref().and_then(|m| m.get("category")),
            Some(&Value::String("pillars".to_string()))
        );
    }

    #[test]
    fn test_non_string_content_is_stringified() {
        let docs = parse_knowledge_json(
            r#"[{"value": 42}, {"message": true}, {"content": {"a": 1}}, "plain", null]"#,
            "x",
        )
        .unwrap();

        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0].content, "42");
        assert_eq!(docs[1].content, "true");
        assert_eq!(docs[2].content, "{\n  \"a\": 1\n}");
        assert_eq!(docs[3].content, "plain");
        assert_eq!(docs[3].title, "x #4");
    }

    #[test]
    fn test_object_without_content_dumps_itself() {
        let docs = parse_knowledge_json(r#"{"question":"Q?","answer":"A."}"#, "qa").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "qa");
        assert_eq!(docs[0].content, "{\n  \"question\": \"Q?\",\n  \"answer\": \"A.\"\n}");
    }

    #[test]
    fn test_shape_detection_order() {
        let shape = ImportShape::detect(serde_json::json!({"items": [1], "title": "t"}));
        assert!(matches!(shape, ImportShape::Wrapped { key: "items", .. }));

        let shape = ImportShape::detect(serde_json::json!({"documents": [], "items": [1]}));
        assert!(matches!(shape, ImportShape::Wrapped { key: "documents", .. }));

        let shape = ImportShape::detect(serde_json::json!({"title": "t"}));
        assert!(matches!(shape, ImportShape::SingleObject(_)));

        assert_eq!(ImportShape::detect(Value::Null), ImportShape::Unsupported);
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title("faq.json"), "faq");
        assert_eq!(fallback_title("FAQ.JSON"), "FAQ");
        assert_eq!(fallback_title(".json"), DEFAULT_FALLBACK_TITLE);
    }

    #[test]
    fn test_import_json_str_creates_documents() {
        let store = store();
        let docs = import_json_str(
            &store,
            "faq.json",
            r#"[{"text":"hello"},{"title":"T","content":"C"}]"#,
        )
        .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].title, "T");
        assert_eq!(store.stats().unwrap().document_count, 2);
    }

    #[test]
    fn test_import_empty_object_fails() {
        let store = store();
        let err = import_json_str(&store, "empty.json", "{}").unwrap_err();
        assert!(matches!(err, RagError::NoValidDocuments(_)));
        assert_eq!(store.stats().unwrap().document_count, 0);
    }

    #[test]
    fn test_import_rejects_non_json_name() {
        let store = store();
        let err = import_json_str(&store, "notes.txt", "{}").unwrap_err();
        assert!(matches!(err, RagError::NotJsonFile(_)));
    }

    #[test]
    fn test_import_files_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        let never = dir.path().join("never.json");
        std::fs::write(&good, r#"{"title":"Good","content":"Kept"}"#).unwrap();
        std::fs::write(&bad, "{oops").unwrap();
        std::fs::write(&never, r#"{"title":"Never","content":"Skipped"}"#).unwrap();

        let store = store();
        let err = import_json_files(&store, &[good.clone(), bad, never]).unwrap_err();
        assert!(matches!(err, RagError::InvalidJson { .. }));
        assert!(err.to_string().contains("bad.json"));

        let docs = store.list_documents(10).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Good");

        let summary = import_json_files(&store, &[good]).unwrap();
        assert_eq!(summary.imported_count, 1);
        assert_eq!(summary.file_count, 1);
    }
}

use csv::{QuoteStyle, WriterBuilder};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("Failed to read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid JSON: {}", .path.display(), .source)]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {}", .path.display(), .source)]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Unwraps `{"client": {...}}` rows; anything else is used as the row.
fn row_fields(item: &Value) -> Option<&Map<String, Value>> {
    let map = item.as_object()?;
    if map.len() == 1 {
        if let Some(Value::Object(inner)) = map.values().next() {
            return Some(inner);
        }
    }
    Some(map)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Writes `<stem>.csv` next to `json_path`. Headers are the sorted keys of
/// the first row and every cell is quoted. Returns `None` when the export
/// holds no rows.
pub fn json_to_csv(json_path: &Path) -> Result<Option<PathBuf>, CsvError> {
    let csv_path = json_path.with_extension("csv");
    info!("{} -> {}", json_path.display(), csv_path.display());

    let content = std::fs::read_to_string(json_path).map_err(|source| CsvError::Read {
        path: json_path.to_path_buf(),
        source,
    })?;
    let data: Value = serde_json::from_str(&content).map_err(|source| CsvError::Json {
        path: json_path.to_path_buf(),
        source,
    })?;

    let rows: Vec<&Map<String, Value>> = match &data {
        Value::Array(items) => items.iter().filter_map(row_fields).collect(),
        other => row_fields(other).into_iter().collect(),
    };
    info!("{} JSON records", rows.len());

    let Some(first) = rows.first() else {
        warn!("No data in '{}'", json_path.display());
        return Ok(None);
    };

    // serde_json maps iterate in key order
    let fields: Vec<&String> = first.keys().collect();

    let write_err = |source: csv::Error| CsvError::Write {
        path: csv_path.clone(),
        source,
    };
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(&csv_path)
        .map_err(write_err)?;

    writer.write_record(&fields).map_err(write_err)?;
    for row in &rows {
        let record: Vec<String> = fields.iter().map(|field| cell(row.get(*field))).collect();
        writer.write_record(&record).map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|e| write_err(csv::Error::from(e)))?;

    info!("{} CSV rows", rows.len());
    Ok(Some(csv_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(json: &str) -> (tempfile::TempDir, Option<String>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.json");
        std::fs::write(&path, json).unwrap();
        let csv = json_to_csv(&path)
            .unwrap()
            .map(|p| std::fs::read_to_string(p).unwrap());
        (dir, csv)
    }

    #[test]
    fn test_wrapped_rows_are_unwrapped() {
        let (_dir, csv) = convert(
            r#"[{"client": {"name": "Acme", "id": 1}}, {"client": {"name": "Globex", "id": 2}}]"#,
        );
        assert_eq!(
            csv.unwrap(),
            "\"id\",\"name\"\n\"1\",\"Acme\"\n\"2\",\"Globex\"\n"
        );
    }

    #[test]
    fn test_flat_rows_with_nested_and_missing_values() {
        let (_dir, csv) = convert(
            r#"[{"id": 1, "tags": ["a", "b"], "note": null}, {"id": 2, "tags": []}]"#,
        );
        assert_eq!(
            csv.unwrap(),
            "\"id\",\"note\",\"tags\"\n\"1\",\"\",\"[\"\"a\"\",\"\"b\"\"]\"\n\"2\",\"\",\"[]\"\n"
        );
    }

    #[test]
    fn test_empty_collection_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(json_to_csv(&path).unwrap().is_none());
        assert!(!dir.path().join("tasks.csv").exists());
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(json_to_csv(&path), Err(CsvError::Json { .. })));
    }
}

use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Serializer, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::harvest::EntityType;

/// Turns a raw response body into the collection written for `entity`.
///
/// `{"<key>": [...]}` envelopes are unwrapped to the array, bare arrays pass
/// through, an empty body becomes `[]`, and any other value is kept as is.
pub fn reshape(entity: EntityType, body: Value) -> Value {
    match body {
        Value::Null => {
            warn!("{}: empty response, writing an empty collection", entity);
            Value::Array(Vec::new())
        }
        Value::Object(mut map) => match map.remove(entity.collection_key()) {
            Some(collection @ Value::Array(_)) => collection,
            Some(other) => {
                map.insert(entity.collection_key().to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Number of records in a collection, or 1 for a lone object.
pub fn record_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

/// Serializes with four-space indentation and a trailing newline. Object keys
/// come out sorted, so unchanged data always renders to the same bytes.
pub fn to_pretty_json(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buffer = Vec::new();
    let mut serializer =
        Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// Writes `value` to `path`, replacing any previous export. The data goes to
/// `<path>.tmp` first and is renamed over `path`, so a failed write leaves the
/// previous file untouched.
pub async fn write_json(path: &Path, value: &Value) -> std::io::Result<()> {
    let bytes = to_pretty_json(value).map_err(std::io::Error::other)?;
    let tmp_path = tmp_path(path);

    if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

pub async fn read_json(path: &Path) -> std::io::Result<Value> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(std::io::Error::other)
}

/// Extracts the numeric ids from an exported collection. Elements may be
/// flat (`{"id": 1}`) or wrapped (`{"project": {"id": 1}}`).
pub fn collection_ids(collection: &Value, wrapper_key: &str) -> Vec<u64> {
    let Some(items) = collection.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            item.get(wrapper_key)
                .unwrap_or(item)
                .get("id")
                .and_then(Value::as_u64)
        })
        .collect()
}

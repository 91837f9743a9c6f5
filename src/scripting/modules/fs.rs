//! Sandboxed filesystem module for scripts
//!
//! Scripts may only touch files below the allowed directories. With nothing
//! configured, only the system temp directory is reachable. Names that
//! usually hold secrets are refused anywhere.
//!
//! Every function returns JSON text: `{"success": true, "data": ...}` or
//! `{"success": false, "error": "..."}`.

use dashmap::DashSet;
use once_cell::sync::Lazy;
use rune::alloc::String as RuneString;
use rune::{ContextError, Module};
use serde_json::Value as JsonValue;
use std::path::{Component, Path, PathBuf};

/// Uses DashSet so concurrent runs never contend on a lock
static ALLOWED_DIRS: Lazy<DashSet<PathBuf>> = Lazy::new(DashSet::new);

const BLOCKED_PATTERNS: &[&str] = &[
    ".env",
    ".git",
    "id_rsa",
    "id_ed25519",
    ".ssh",
    "credentials",
    "secrets",
    ".aws",
    "private",
    "password",
    ".gnupg",
];

/// Largest file a script may read (10MB)
const MAX_READ_SIZE: u64 = 10 * 1024 * 1024;

/// Create the fs module
pub fn module() -> Result<Module, ContextError> {
    let mut module = Module::with_crate("fs")?;

    module.function("read_json", read_json).build()?;
    module.function("write_json", write_json).build()?;
    module.function("read_csv", read_csv).build()?;
    module.function("write_csv", write_csv).build()?;
    module.function("exists", file_exists).build()?;

    Ok(module)
}

/// Add an allowed directory for file access
pub fn allow_directory(path: &Path) {
    match path.canonicalize() {
        Ok(canonical) => ALLOWED_DIRS.insert(canonical),
        Err(_) => ALLOWED_DIRS.insert(path.to_path_buf()),
    };
}

pub fn clear_allowed_directories() {
    ALLOWED_DIRS.clear();
}

pub fn allowed_directories() -> Vec<PathBuf> {
    ALLOWED_DIRS.iter().map(|p| p.key().clone()).collect()
}

fn is_blocked_name(name: &str) -> bool {
    let name = name.to_lowercase();
    BLOCKED_PATTERNS.iter().any(|pattern| {
        name == *pattern
            || name.starts_with(&format!("{}.", pattern))
            || name.starts_with(&format!("{}_", pattern))
            || name.starts_with(&format!("{}-", pattern))
            || (name.ends_with('~') && name.starts_with(pattern))
            || (name.contains(pattern)
                && (pattern.starts_with('.') || pattern.contains("rsa") || pattern.contains("ed25519")))
    })
}

/// Check an already-canonicalized path
fn is_path_allowed(canonical: &Path) -> bool {
    // macOS temp paths live under /private/var; only user-level "private" is blocked
    let components: Vec<_> = canonical.components().collect();
    let skip = match components.get(1) {
        Some(Component::Normal(first)) if cfg!(target_os = "macos") && first.to_string_lossy() == "private" => 2,
        _ => 1,
    };

    let blocked = components.iter().skip(skip).any(|component| match component {
        Component::Normal(name) => is_blocked_name(&name.to_string_lossy()),
        _ => false,
    });
    if blocked {
        return false;
    }

    if ALLOWED_DIRS.is_empty() {
        return std::env::temp_dir()
            .canonicalize()
            .map(|temp| canonical.starts_with(temp))
            .unwrap_or(false);
    }

    ALLOWED_DIRS.iter().any(|allowed| canonical.starts_with(allowed.key()))
}

/// Resolve an existing file for reading.
fn resolve_existing(path: &str) -> Result<PathBuf, String> {
    let canonical = Path::new(path)
        .canonicalize()
        .map_err(|e| format!("Cannot resolve path: {}", e))?;
    if !is_path_allowed(&canonical) {
        return Err("Access denied: path not in allowed directories".to_string());
    }
    Ok(canonical)
}

/// Resolve a write target; its parent directory must already exist.
fn resolve_target(path: &str) -> Result<PathBuf, String> {
    let path = Path::new(path);
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("Invalid file path: {}", path.display()))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical = parent
        .canonicalize()
        .map_err(|e| format!("Cannot resolve directory: {}", e))?
        .join(file_name);
    if !is_path_allowed(&canonical) {
        return Err("Access denied: path not in allowed directories".to_string());
    }
    Ok(canonical)
}

fn read_text(path: &str) -> Result<String, String> {
    let canonical = resolve_existing(path)?;
    let meta = std::fs::metadata(&canonical).map_err(|e| format!("Cannot read file metadata: {}", e))?;
    if meta.len() > MAX_READ_SIZE {
        return Err(format!("File too large: {} bytes exceeds 10MB limit", meta.len()));
    }
    std::fs::read_to_string(&canonical).map_err(|e| format!("Failed to read file: {}", e))
}

fn read_json(path: &str) -> RuneString {
    respond(read_text(path).and_then(|text| {
        serde_json::from_str::<JsonValue>(&text).map_err(|e| format!("Invalid JSON: {}", e))
    }))
}

fn write_json(path: &str, json: &str) -> RuneString {
    respond((|| {
        let value: JsonValue = serde_json::from_str(json).map_err(|e| format!("Invalid JSON: {}", e))?;
        let target = resolve_target(path)?;
        let text = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
        std::fs::write(&target, text).map_err(|e| format!("Failed to write file: {}", e))?;
        Ok(JsonValue::String(target.display().to_string()))
    })())
}

/// With a header row the rows become objects keyed by column, otherwise
/// arrays of strings.
fn read_csv(path: &str, has_header: bool) -> RuneString {
    respond(read_text(path).and_then(|text| parse_csv(&text, has_header)))
}

fn parse_csv(text: &str, has_header: bool) -> Result<JsonValue, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = if has_header {
        reader
            .headers()
            .map_err(|e| format!("Invalid CSV: {}", e))?
            .iter()
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("Invalid CSV: {}", e))?;
        let row = if has_header {
            let object: serde_json::Map<String, JsonValue> = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.clone(), JsonValue::String(v.to_string())))
                .collect();
            JsonValue::Object(object)
        } else {
            JsonValue::Array(record.iter().map(|v| JsonValue::String(v.to_string())).collect())
        };
        rows.push(row);
    }
    Ok(JsonValue::Array(rows))
}

/// `rows` is a JSON array of objects or arrays. `headers` is a comma
/// separated column list; when empty, object rows use the first row's keys.
fn write_csv(path: &str, rows: &str, headers: &str) -> RuneString {
    respond((|| {
        let rows: JsonValue = serde_json::from_str(rows).map_err(|e| format!("Invalid JSON: {}", e))?;
        let text = render_csv(&rows, headers)?;
        let target = resolve_target(path)?;
        std::fs::write(&target, text).map_err(|e| format!("Failed to write file: {}", e))?;
        Ok(JsonValue::String(target.display().to_string()))
    })())
}

fn render_csv(rows: &JsonValue, headers: &str) -> Result<String, String> {
    let rows = rows.as_array().ok_or_else(|| "Rows must be a JSON array".to_string())?;

    let mut columns: Vec<String> = headers
        .split(',')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();
    if columns.is_empty() {
        if let Some(JsonValue::Object(first)) = rows.first() {
            columns = first.keys().cloned().collect();
        }
    }

    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    if !columns.is_empty() {
        writer.write_record(&columns).map_err(|e| e.to_string())?;
    }
    for row in rows {
        let record: Vec<String> = match row {
            JsonValue::Object(object) => columns
                .iter()
                .map(|c| object.get(c).map(cell).unwrap_or_default())
                .collect(),
            JsonValue::Array(values) => values.iter().map(cell).collect(),
            other => vec![cell(other)],
        };
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }

    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

fn cell(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn file_exists(path: &str) -> bool {
    resolve_existing(path).is_ok()
}

fn respond(result: Result<JsonValue, String>) -> RuneString {
    let value = match result {
        Ok(data) => serde_json::json!({ "success": true, "data": data }),
        Err(error) => serde_json::json!({ "success": false, "error": error }),
    };
    RuneString::try_from(value.to_string()).unwrap_or_default()
}

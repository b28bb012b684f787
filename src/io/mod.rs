// src/io/mod.rs
//
// File boundary for structured documents.
// - read_document / write_document: JSON or YAML chosen by file extension
// - atomic_write: temp file + rename so readers never see a partial file
//
// Every error carries the path it happened on.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde_json::Value;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

/// Load a document from disk into a generic JSON value.
pub fn read_document(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    match DocumentFormat::for_path(path) {
        DocumentFormat::Json => {
            serde_json::from_str(&text).map_err(|e| EngineError::parse(path, e))
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(&text).map_err(|e| EngineError::parse(path, e))
        }
    }
}

/// Serialise `value` in the format implied by the extension and write it atomically.
pub fn write_document(path: &Path, value: &Value) -> Result<()> {
    let bytes = match DocumentFormat::for_path(path) {
        DocumentFormat::Json => {
            serde_json::to_vec_pretty(value).map_err(|e| EngineError::parse(path, e))?
        }
        DocumentFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| EngineError::parse(path, e))?
            .into_bytes(),
    };
    atomic_write(path, &bytes)
}

/// Write a file atomically (temp file + rename), creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    let temp_name = format!(
        ".tmp_{}_{}",
        std::process::id(),
        path.file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default()
    );
    let temp_path = parent.join(&temp_name);

    let mut file = File::create(&temp_path).map_err(|e| EngineError::io(&temp_path, e))?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| EngineError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

//! Reads preprocessed chunk records from `.json` / `.jsonl` files.
//!
//! Accepts both the canonical record shape (`id`, `text`, `source_url`, ...)
//! and the preprocessor's output (`content`, `source`, `chunk_id`, ...).
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::Chunk;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(alias = "source", alias = "url", default)]
    pub source_url: String,
    #[serde(alias = "page_title", default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Position of the chunk within its page, when the preprocessor emits one.
    #[serde(default)]
    pub chunk_id: Option<u64>,
}

impl ChunkRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: text.into(),
            source_url: String::new(),
            title: String::new(),
            tags: Vec::new(),
            category: None,
            topic: None,
            language: None,
            chunk_id: None,
        }
    }

    /// Explicit id, or a deterministic one derived from source, position and text.
    pub fn resolved_id(&self) -> String {
        if let Some(id) = self.id.as_deref().filter(|s| !s.trim().is_empty()) {
            return id.to_string();
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.source_url.as_bytes());
        hasher.update(&self.chunk_id.unwrap_or(0).to_le_bytes());
        hasher.update(self.text.as_bytes());
        let hex = hasher.finalize().to_hex();
        format!("chunk-{}", &hex.as_str()[..16])
    }

    pub fn into_chunk(self) -> Chunk {
        let id = self.resolved_id();
        let category = match self.category.filter(|c| !c.trim().is_empty()) {
            Some(category) => category,
            None => categorize(&self.source_url, &self.text).to_string(),
        };
        Chunk {
            id,
            text: self.text,
            source_url: self.source_url,
            title: self.title,
            category,
            tags: self.tags,
            topic: self.topic,
            language: self.language,
            created_at: Utc::now(),
        }
    }
}

const URL_CATEGORIES: &[(&str, &[&str])] = &[
    ("Services", &["/services/", "/service/"]),
    ("Industries", &["/industries/", "/industry/"]),
    ("Company", &["/about/", "/company/", "/home/"]),
    ("Content", &["/blog/", "/news/"]),
    ("Products", &["/products/", "/product/"]),
    ("Contact", &["/contact/", "/contact-us/", "/locations/"]),
];

const TEXT_CATEGORIES: &[(&str, &[&str])] = &[
    ("Services", &["services", "solutions", "development", "consulting", "design"]),
    ("Industries", &["healthcare", "fintech", "retail", "manufacturing", "hospitality"]),
];

pub const DEFAULT_CATEGORY: &str = "General";

/// Category for a record that arrived without one: URL path patterns first,
/// then content keywords, then [`DEFAULT_CATEGORY`].
pub fn categorize(source_url: &str, text: &str) -> &'static str {
    let url = source_url.to_lowercase();
    if let Some((category, _)) = URL_CATEGORIES.iter().find(|(_, patterns)| patterns.iter().any(|p| url.contains(p))) {
        return category;
    }
    let text = text.to_lowercase();
    TEXT_CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map_or(DEFAULT_CATEGORY, |(category, _)| category)
}

/// Load every record under `path` (a file or a directory walked recursively).
///
/// Malformed lines are logged and skipped; records with blank text are dropped.
pub fn load_records(path: &Path) -> Result<Vec<ChunkRecord>> {
    let files = if path.is_dir() { list_record_files(path) } else { vec![path.to_path_buf()] };
    if files.is_empty() {
        warn!("No .json/.jsonl files found under {}", path.display());
        return Ok(vec![]);
    }
    let mut records = Vec::new();
    for (file_index, file_path) in files.iter().enumerate() {
        debug!("Reading file {}/{}: {}", file_index + 1, files.len(), file_path.display());
        let before = records.len();
        read_file(file_path, &mut records)?;
        debug!("{} records from {}", records.len() - before, file_path.display());
    }
    let total = records.len();
    records.retain(|r| !r.text.trim().is_empty());
    if records.len() < total {
        debug!("Dropped {} records with empty text", total - records.len());
    }
    info!("Loaded {} chunk records from {} files", records.len(), files.len());
    Ok(records)
}

fn read_file(file_path: &Path, out: &mut Vec<ChunkRecord>) -> Result<()> {
    let content = match fs::read_to_string(file_path) {
        Ok(content) => content,
        Err(_) => String::from_utf8_lossy(
            &fs::read(file_path).with_context(|| format!("Failed to read {}", file_path.display()))?,
        )
        .to_string(),
    };
    let is_jsonl = file_path.extension().and_then(|s| s.to_str()) == Some("jsonl");
    if is_jsonl {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChunkRecord>(line) {
                Ok(record) => out.push(record),
                Err(e) => warn!("Skipping {}:{}: {}", file_path.display(), line_num + 1, e),
            }
        }
        return Ok(());
    }
    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(serde_json::Value::Array(items)) => {
            for (i, item) in items.into_iter().enumerate() {
                match serde_json::from_value::<ChunkRecord>(item) {
                    Ok(record) => out.push(record),
                    Err(e) => warn!("Skipping {}[{}]: {}", file_path.display(), i, e),
                }
            }
        }
        Ok(value) => match serde_json::from_value::<ChunkRecord>(value) {
            Ok(record) => out.push(record),
            Err(e) => warn!("Skipping {}: {}", file_path.display(), e),
        },
        Err(e) => warn!("Skipping {}: {}", file_path.display(), e),
    }
    Ok(())
}

fn list_record_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
        let path = entry.path();
        if matches!(path.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

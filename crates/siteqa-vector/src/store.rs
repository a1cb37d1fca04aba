//! On-disk snapshot persistence.
//!
//! Layout under the index root:
//!
//! ```text
//! <root>/CURRENT            "v<N>\n", replaced by write-temp-then-rename
//! <root>/v<N>/manifest.json dimension, metric, chunk count, embedder, created_at
//! <root>/v<N>/chunks.lance  LanceDB table with metadata + vector column
//! ```
//!
//! A version directory is complete before `CURRENT` points at it, so a crash
//! mid-save leaves the previous version loadable.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connect;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use siteqa_core::types::{Chunk, Metric};

use crate::error::{StoreError, StoreResult};
use crate::schema::{build_chunks_schema, CHUNKS_TABLE};
use crate::snapshot::IndexSnapshot;

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u64,
    pub dimension: usize,
    pub metric: Metric,
    pub chunk_count: usize,
    pub embedder_id: String,
    pub created_at: DateTime<Utc>,
}

impl SnapshotManifest {
    fn for_snapshot(snapshot: &IndexSnapshot) -> Self {
        Self {
            version: snapshot.version(),
            dimension: snapshot.dim(),
            metric: snapshot.metric(),
            chunk_count: snapshot.len(),
            embedder_id: snapshot.embedder_id().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// What the running process requires of a persisted snapshot.
#[derive(Debug, Clone)]
pub struct Expected<'a> {
    pub metric: Metric,
    pub dimension: usize,
    pub embedder_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    keep_versions: usize,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, keep_versions: usize) -> Self {
        Self { root: root.into(), keep_versions: keep_versions.max(1) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, version: u64) -> PathBuf {
        self.root.join(format!("v{version}"))
    }

    /// Version named by `CURRENT`, or `None` when nothing was ever saved.
    pub fn current_version(&self) -> StoreResult<Option<u64>> {
        let path = self.root.join(CURRENT_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        parse_version_name(raw.trim())
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt { version: CURRENT_FILE.to_string(), reason: format!("unreadable pointer '{}'", raw.trim()) })
    }

    pub fn read_manifest(&self, version: u64) -> StoreResult<SnapshotManifest> {
        let path = self.version_dir(version).join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).map_err(|e| StoreError::Corrupt {
            version: format!("v{version}"),
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let manifest: SnapshotManifest = serde_json::from_str(&raw)?;
        if manifest.version != version {
            return Err(StoreError::Corrupt {
                version: format!("v{version}"),
                reason: format!("manifest claims version {}", manifest.version),
            });
        }
        Ok(manifest)
    }

    /// Write `snapshot` as a new version directory, then repoint `CURRENT`.
    /// Filesystem work runs on the blocking pool.
    pub async fn save(&self, snapshot: &IndexSnapshot) -> StoreResult<SnapshotManifest> {
        let (store, version) = (self.clone(), snapshot.version());
        let dir = blocking(move || store.fresh_version_dir(version)).await?;

        let schema = build_chunks_schema(snapshot.dim());
        let db = connect(dir.to_string_lossy().as_ref()).execute().await?;
        if snapshot.is_empty() {
            db.create_empty_table(CHUNKS_TABLE, schema).execute().await?;
        } else {
            let batch = snapshot_to_record_batch(snapshot)?;
            let reader = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema);
            db.create_table(CHUNKS_TABLE, reader).execute().await?;
        }

        let manifest = SnapshotManifest::for_snapshot(snapshot);
        let (store, written) = (self.clone(), manifest.clone());
        blocking(move || store.commit(&dir, &written)).await?;
        Ok(manifest)
    }

    fn fresh_version_dir(&self, version: u64) -> StoreResult<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let dir = self.version_dir(version);
        if dir.exists() {
            warn!("Removing leftover snapshot directory {}", dir.display());
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn commit(&self, dir: &Path, manifest: &SnapshotManifest) -> StoreResult<()> {
        write_atomically(dir, &dir.join(MANIFEST_FILE), &serde_json::to_vec_pretty(manifest)?)?;
        write_atomically(&self.root, &self.root.join(CURRENT_FILE), format!("v{}\n", manifest.version).as_bytes())?;
        info!("Persisted index snapshot v{} ({} chunks) to {}", manifest.version, manifest.chunk_count, dir.display());

        if let Err(e) = self.gc(manifest.version) {
            warn!("Failed to remove superseded snapshots: {}", e);
        }
        Ok(())
    }

    /// Load the version `CURRENT` points at. `Ok(None)` means no snapshot was
    /// ever saved; a dangling pointer or unreadable table is an error.
    pub async fn load_current(&self, expected: &Expected<'_>) -> StoreResult<Option<IndexSnapshot>> {
        match self.current_version()? {
            Some(version) => self.load_version(version, expected).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn load_version(&self, version: u64, expected: &Expected<'_>) -> StoreResult<IndexSnapshot> {
        let manifest = self.read_manifest(version)?;
        check_compatible(&manifest, expected)?;

        let dir = self.version_dir(version);
        let db = connect(dir.to_string_lossy().as_ref()).execute().await?;
        let table = db.open_table(CHUNKS_TABLE).execute().await?;
        let mut stream = table.query().limit(manifest.chunk_count.max(1)).execute().await?;
        let mut items = Vec::with_capacity(manifest.chunk_count);
        while let Some(batch) = stream.try_next().await? {
            read_batch(&batch, manifest.dimension, version, &mut items)?;
        }
        if items.len() != manifest.chunk_count {
            return Err(StoreError::Corrupt {
                version: format!("v{version}"),
                reason: format!("manifest lists {} chunks, table has {}", manifest.chunk_count, items.len()),
            });
        }
        let snapshot = IndexSnapshot::build(version, manifest.metric, manifest.dimension, manifest.embedder_id, items)?;
        info!("Loaded index snapshot v{} ({} chunks)", version, snapshot.len());
        Ok(snapshot)
    }

    /// Remove version directories older than the newest `keep_versions`,
    /// never touching `current`. Returns how many were removed.
    pub fn gc(&self, current: u64) -> StoreResult<usize> {
        let mut versions = self.list_versions()?;
        versions.sort_unstable_by(|a, b| b.cmp(a));
        let mut removed = 0;
        for version in versions.into_iter().skip(self.keep_versions) {
            if version == current {
                continue;
            }
            let dir = self.version_dir(version);
            debug!("Removing superseded snapshot {}", dir.display());
            fs::remove_dir_all(&dir)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn list_versions(&self) -> StoreResult<Vec<u64>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(v) = entry.file_name().to_str().and_then(parse_version_name) {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

fn parse_version_name(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.parse().ok()
}

fn check_compatible(manifest: &SnapshotManifest, expected: &Expected<'_>) -> StoreResult<()> {
    let mismatch = |reason: String| Err(StoreError::Incompatible { version: manifest.version, reason });
    if manifest.dimension != expected.dimension {
        return mismatch(format!("dimension {} != configured {}", manifest.dimension, expected.dimension));
    }
    if manifest.metric != expected.metric {
        return mismatch(format!("metric {} != configured {}", manifest.metric, expected.metric));
    }
    if manifest.embedder_id != expected.embedder_id {
        return mismatch(format!("built with embedder '{}', running '{}'", manifest.embedder_id, expected.embedder_id));
    }
    Ok(())
}

async fn blocking<T, F>(work: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn snapshot_to_record_batch(snapshot: &IndexSnapshot) -> StoreResult<RecordBatch> {
    let entries = snapshot.entries();
    let dim = snapshot.dim();
    let mut ids = Vec::with_capacity(entries.len());
    let mut texts = Vec::with_capacity(entries.len());
    let mut urls = Vec::with_capacity(entries.len());
    let mut titles = Vec::with_capacity(entries.len());
    let mut categories = Vec::with_capacity(entries.len());
    let mut tags = Vec::with_capacity(entries.len());
    let mut topics: Vec<Option<String>> = Vec::with_capacity(entries.len());
    let mut languages: Vec<Option<String>> = Vec::with_capacity(entries.len());
    let mut created = Vec::with_capacity(entries.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(entries.len());
    for entry in entries {
        let c = &entry.chunk;
        ids.push(c.id.clone());
        texts.push(c.text.clone());
        urls.push(c.source_url.clone());
        titles.push(c.title.clone());
        categories.push(c.category.clone());
        tags.push(serde_json::to_string(&c.tags)?);
        topics.push(c.topic.clone());
        languages.push(c.language.clone());
        created.push(c.created_at.timestamp_millis());
        vectors.push(Some(entry.vector.iter().map(|&x| Some(x)).collect()));
    }
    let batch = RecordBatch::try_new(
        build_chunks_schema(dim),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(urls)),
            Arc::new(StringArray::from(titles)),
            Arc::new(StringArray::from(categories)),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(topics)),
            Arc::new(StringArray::from(languages)),
            Arc::new(TimestampMillisecondArray::from(created)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim as i32)),
        ],
    )?;
    Ok(batch)
}

fn read_batch(batch: &RecordBatch, dim: usize, version: u64, out: &mut Vec<(Chunk, Vec<f32>)>) -> StoreResult<()> {
    let corrupt = |reason: String| StoreError::Corrupt { version: format!("v{version}"), reason };
    let strings = |name: &str| -> StoreResult<&StringArray> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| corrupt(format!("missing or mistyped column '{name}'")))
    };
    let ids = strings("id")?;
    let texts = strings("text")?;
    let urls = strings("source_url")?;
    let titles = strings("title")?;
    let categories = strings("category")?;
    let tags = strings("tags")?;
    let topics = strings("topic")?;
    let languages = strings("language")?;
    let created = batch
        .column_by_name("created_at")
        .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
        .ok_or_else(|| corrupt("missing or mistyped column 'created_at'".to_string()))?;
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| corrupt("missing or mistyped column 'vector'".to_string()))?;

    let optional = |arr: &StringArray, i: usize| (!arr.is_null(i)).then(|| arr.value(i).to_string());
    for i in 0..batch.num_rows() {
        let values = vectors.value(i);
        let floats = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| corrupt("vector items are not f32".to_string()))?;
        if floats.len() != dim {
            return Err(corrupt(format!("row {} has {} dims, manifest says {}", i, floats.len(), dim)));
        }
        let created_at = DateTime::<Utc>::from_timestamp_millis(created.value(i))
            .ok_or_else(|| corrupt(format!("row {i} has an out-of-range timestamp")))?;
        let chunk = Chunk {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            source_url: urls.value(i).to_string(),
            title: titles.value(i).to_string(),
            category: categories.value(i).to_string(),
            tags: serde_json::from_str(tags.value(i))?,
            topic: optional(topics, i),
            language: optional(languages, i),
            created_at,
        };
        out.push((chunk, floats.values().to_vec()));
    }
    Ok(())
}

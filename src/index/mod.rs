
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::{RagError, Result};

/// Input to [`VectorIndex::upsert`]: a chunk and its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One ranked hit from [`VectorIndex::search`]; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
    pub rank: usize,
}

/// Outcome of an upsert call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    #[inline]
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Missing-collection behavior for writes.
///
/// Searching a missing collection is never an error; it returns no results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the collection on first insert (the default)
    #[default]
    AutoCreate,
    /// Fail with `CollectionNotFound` if the collection does not exist
    Strict,
}

/// Collection name and live record count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub records: usize,
}

/// Record as stored: the vector is kept unit-normalized so cosine similarity
/// reduces to a dot product at search time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    chunk: Chunk,
    vector: Vec<f32>,
    created_at: String,
}

/// On-disk representation of one collection
#[derive(Debug, Deserialize)]
struct PersistedCollection {
    dimension: usize,
    records: BTreeMap<String, StoredRecord>,
}

/// Serialization view over a live record map, so flushing does not clone it
#[derive(Serialize)]
struct PersistedCollectionRef<'a> {
    dimension: usize,
    records: &'a BTreeMap<String, StoredRecord>,
}

#[derive(Debug)]
struct CollectionHandle {
    name: String,
    state: RwLock<BTreeMap<String, StoredRecord>>,
}

/// Vector store over named, isolated collections, persisted as one JSON file
/// per collection under the index root.
///
/// Writes are serialized per collection (writes to different collections
/// proceed independently); a search observes either the pre-write or the
/// post-write state, never a partially applied batch. Every write is flushed
/// to a temporary file and renamed into place before it becomes visible to
/// readers, so a failed flush leaves both memory and disk untouched.
#[derive(Debug)]
pub struct VectorIndex {
    root: PathBuf,
    dimension: usize,
    collections: RwLock<HashMap<String, Arc<CollectionHandle>>>,
}

impl VectorIndex {
    /// Open (or create) an index rooted at `root` for vectors of the given
    /// dimensionality, loading any collections persisted by earlier runs.
    #[inline]
    pub async fn open(root: impl Into<PathBuf>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding dimension must be at least 1".to_string(),
            ));
        }

        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| storage_err("*", "open", &e.to_string()))?;

        let mut collections = HashMap::new();
        let entries =
            fs::read_dir(&root).map_err(|e| storage_err("*", "open", &e.to_string()))?;

        for entry in entries {
            let entry = entry.map_err(|e| storage_err("*", "open", &e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!("Skipping collection file with non-UTF-8 name: {:?}", path);
                continue;
            };

            let persisted = load_collection(&path, name)?;
            if persisted.dimension != dimension {
                return Err(RagError::InvalidConfiguration(format!(
                    "collection '{}' was built with dimension {} but the index is configured for {}",
                    name, persisted.dimension, dimension
                )));
            }

            debug!(
                "Loaded collection '{}' with {} records",
                name,
                persisted.records.len()
            );
            collections.insert(
                name.to_string(),
                Arc::new(CollectionHandle {
                    name: name.to_string(),
                    state: RwLock::new(persisted.records),
                }),
            );
        }

        info!(
            "Vector index opened at {:?} with {} collections",
            root,
            collections.len()
        );

        Ok(Self {
            root,
            dimension,
            collections: RwLock::new(collections),
        })
    }

    /// Vector dimensionality every record in this index must have
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or replace records, keyed by chunk id.
    ///
    /// Re-upserting an existing id replaces the whole record. A vector whose
    /// length differs from the index dimensionality is a configuration error
    /// and fails the entire call before anything is written.
    #[inline]
    pub async fn upsert(
        &self,
        collection: &str,
        records: Vec<IndexRecord>,
        mode: WriteMode,
    ) -> Result<UpsertSummary> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        for record in &records {
            if record.vector.len() != self.dimension {
                return Err(RagError::InvalidConfiguration(format!(
                    "vector for chunk '{}' has dimension {} but the index requires {}",
                    record.chunk.id,
                    record.vector.len(),
                    self.dimension
                )));
            }
        }

        let handle = self.handle_for_write(collection, mode).await?;
        let mut state = handle.state.write().await;

        // Apply to a copy, flush it, then publish: a storage failure must not
        // leave readers seeing records that never reached disk.
        let mut next = state.clone();
        let mut summary = UpsertSummary::default();
        let now = chrono::Utc::now().to_rfc3339();

        for record in records {
            let vector = unit_normalize(&record.vector);
            let stored = StoredRecord {
                chunk: record.chunk,
                vector,
                created_at: now.clone(),
            };
            if next.insert(stored.chunk.id.clone(), stored).is_some() {
                summary.updated += 1;
            } else {
                summary.inserted += 1;
            }
        }

        self.persist(&handle.name, &next, "upsert")?;
        *state = next;

        debug!(
            "Upserted {} records into '{}' ({} inserted, {} updated)",
            summary.written(),
            collection,
            summary.inserted,
            summary.updated
        );
        Ok(summary)
    }

    /// Rank records of `collection` by cosine similarity to `query`.
    ///
    /// Results are sorted by descending score with ties broken by ascending
    /// sequence number, truncated to `limit`, and never include scores below
    /// `min_score`. A missing collection yields an empty result.
    #[inline]
    pub async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalResult>> {
        if query.len() != self.dimension {
            return Err(RagError::InvalidConfiguration(format!(
                "query vector has dimension {} but the index requires {}",
                query.len(),
                self.dimension
            )));
        }

        let handle = {
            let collections = self.collections.read().await;
            match collections.get(collection) {
                Some(handle) => Arc::clone(handle),
                None => {
                    debug!("Search on unknown collection '{}'", collection);
                    return Ok(Vec::new());
                }
            }
        };

        let unit_query = unit_normalize(query);
        let state = handle.state.read().await;

        let mut hits: Vec<(f32, &StoredRecord)> = state
            .values()
            .map(|record| (dot(&unit_query, &record.vector), record))
            .filter(|(score, _)| *score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.1.chunk.sequence_number.cmp(&b.1.chunk.sequence_number))
        });
        hits.truncate(limit);

        let results = hits
            .into_iter()
            .enumerate()
            .map(|(i, (score, record))| RetrievalResult {
                chunk: record.chunk.clone(),
                score,
                rank: i + 1,
            })
            .collect::<Vec<_>>();

        debug!(
            "Search in '{}' returned {} results (limit {}, min score {})",
            collection,
            results.len(),
            limit,
            min_score
        );
        Ok(results)
    }

    /// Remove records by id; returns how many existed and were removed
    #[inline]
    pub async fn delete(
        &self,
        collection: &str,
        ids: &HashSet<String>,
        mode: WriteMode,
    ) -> Result<usize> {
        self.remove_matching(collection, mode, "delete", |record| {
            ids.contains(&record.chunk.id)
        })
        .await
    }

    /// Remove every record chunked from `source_document`
    #[inline]
    pub async fn delete_source(
        &self,
        collection: &str,
        source_document: &str,
        mode: WriteMode,
    ) -> Result<usize> {
        self.remove_matching(collection, mode, "delete_source", |record| {
            record.chunk.source_document == source_document
        })
        .await
    }

    async fn remove_matching<F>(
        &self,
        collection: &str,
        mode: WriteMode,
        operation: &'static str,
        matches: F,
    ) -> Result<usize>
    where
        F: Fn(&StoredRecord) -> bool,
    {
        let maybe_handle = {
            let collections = self.collections.read().await;
            collections.get(collection).map(Arc::clone)
        };
        let handle = match (maybe_handle, mode) {
            (Some(handle), _) => handle,
            (None, WriteMode::Strict) => {
                return Err(RagError::CollectionNotFound(collection.to_string()));
            }
            (None, WriteMode::AutoCreate) => return Ok(0),
        };

        let mut state = handle.state.write().await;
        let mut next = state.clone();
        let before = next.len();
        next.retain(|_, record| !matches(record));
        let removed = before - next.len();

        if removed == 0 {
            return Ok(0);
        }

        self.persist(&handle.name, &next, operation)?;
        *state = next;

        debug!("Removed {} records from '{}'", removed, collection);
        Ok(removed)
    }

    /// Number of records in `collection`; 0 if it does not exist
    #[inline]
    pub async fn count(&self, collection: &str) -> usize {
        let maybe_handle = {
            let collections = self.collections.read().await;
            collections.get(collection).map(Arc::clone)
        };
        match maybe_handle {
            Some(handle) => handle.state.read().await.len(),
            None => 0,
        }
    }

    /// All collections with their record counts, sorted by name
    #[inline]
    pub async fn collections(&self) -> Vec<CollectionInfo> {
        let handles: Vec<Arc<CollectionHandle>> = {
            let collections = self.collections.read().await;
            collections.values().map(Arc::clone).collect()
        };

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            let records = handle.state.read().await.len();
            infos.push(CollectionInfo {
                name: handle.name.clone(),
                records,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Drop a collection and its on-disk file; returns whether it existed
    #[inline]
    pub async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let existed = collections.remove(collection).is_some();

        if existed {
            let path = self.collection_path(collection);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(storage_err(collection, "drop", &e.to_string())),
            }
            info!("Dropped collection '{}'", collection);
        }

        Ok(existed)
    }

    async fn handle_for_write(
        &self,
        collection: &str,
        mode: WriteMode,
    ) -> Result<Arc<CollectionHandle>> {
        {
            let collections = self.collections.read().await;
            if let Some(handle) = collections.get(collection) {
                return Ok(Arc::clone(handle));
            }
        }

        match mode {
            WriteMode::Strict => Err(RagError::CollectionNotFound(collection.to_string())),
            WriteMode::AutoCreate => {
                validate_collection_name(collection)?;
                let mut collections = self.collections.write().await;
                let handle = collections
                    .entry(collection.to_string())
                    .or_insert_with(|| {
                        info!("Creating collection '{}'", collection);
                        Arc::new(CollectionHandle {
                            name: collection.to_string(),
                            state: RwLock::new(BTreeMap::new()),
                        })
                    });
                Ok(Arc::clone(handle))
            }
        }
    }

    /// Flush a collection snapshot: write to a temp file, then rename over
    /// the live file so readers of the file never see a torn write.
    fn persist(
        &self,
        collection: &str,
        records: &BTreeMap<String, StoredRecord>,
        operation: &'static str,
    ) -> Result<()> {
        let persisted = PersistedCollectionRef {
            dimension: self.dimension,
            records,
        };
        let json = serde_json::to_vec(&persisted)
            .map_err(|e| storage_err(collection, operation, &e.to_string()))?;

        let path = self.collection_path(collection);
        let tmp_path = path.with_extension("json.tmp");

        fs::write(&tmp_path, &json)
            .map_err(|e| storage_err(collection, operation, &e.to_string()))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| storage_err(collection, operation, &e.to_string()))?;

        Ok(())
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.json"))
    }
}

fn load_collection(path: &Path, name: &str) -> Result<PersistedCollection> {
    let bytes = fs::read(path).map_err(|e| storage_err(name, "load", &e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| storage_err(name, "load", &e.to_string()))
}

fn storage_err(collection: &str, operation: &'static str, message: &str) -> RagError {
    RagError::StorageIo {
        collection: collection.to_string(),
        operation,
        message: message.to_string(),
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidConfiguration(format!(
            "invalid collection name '{}': use ASCII letters, digits, '-', '_' or '.'",
            name
        )))
    }
}

/// Scale to unit length; zero or non-finite vectors come back as all zeros
/// and score 0 against everything.
fn unit_normalize(vector: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
    let norm = norm_sq.sqrt();
    if norm.is_finite() && norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vec![0.0; vector.len()]
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

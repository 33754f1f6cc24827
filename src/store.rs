//! Dual-vector store
//!
//! Owns the two parallel vector arrays (content, context) plus the
//! session metadata, and provides snapshot persistence. Vectors are
//! L2-normalized on write; the all-zero vector is a legal sentinel for
//! "the embedding provider failed for this session" and is kept so that
//! the index stays aligned with the metadata.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};
use crate::types::SessionMeta;

const SNAPSHOT_MAGIC: [u8; 8] = *b"MNEMOSTO";
const SNAPSHOT_VERSION: u32 = 1;

/// Tolerance when checking stored vector norms
pub const NORM_EPSILON: f32 = 1e-5;

/// On-disk file layout derived from a snapshot base path
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub store: PathBuf,
    pub content_ann: PathBuf,
    pub context_ann: PathBuf,
}

impl SnapshotPaths {
    /// `base` is the path without extension; the snapshot lands at
    /// `<base>.store` with ANN companions `<base>.content.ann` /
    /// `<base>.context.ann`.
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let with_ext = |ext: &str| {
            let mut p = base.as_os_str().to_owned();
            p.push(ext);
            PathBuf::from(p)
        };
        Self {
            store: with_ext(".store"),
            content_ann: with_ext(".content.ann"),
            context_ann: with_ext(".context.ann"),
        }
    }
}

/// Self-describing snapshot container
#[derive(Serialize, Deserialize)]
struct Snapshot {
    magic: [u8; 8],
    version: u32,
    dimension: u32,
    content_vectors: Vec<Vec<f32>>,
    context_vectors: Vec<Vec<f32>>,
    metadata: Vec<SessionMeta>,
}

/// In-memory dual-vector store
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    content_vectors: Vec<Vec<f32>>,
    context_vectors: Vec<Vec<f32>>,
    metadata: Vec<SessionMeta>,
    // Zero-sentinel flags, derived; not part of the snapshot
    content_zero: Vec<bool>,
    context_zero: Vec<bool>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            content_vectors: Vec::new(),
            context_vectors: Vec::new(),
            metadata: Vec::new(),
            content_zero: Vec::new(),
            context_zero: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn meta(&self, i: usize) -> Option<&SessionMeta> {
        self.metadata.get(i)
    }

    pub fn content(&self, i: usize) -> Option<&[f32]> {
        self.content_vectors.get(i).map(Vec::as_slice)
    }

    pub fn context(&self, i: usize) -> Option<&[f32]> {
        self.context_vectors.get(i).map(Vec::as_slice)
    }

    pub fn metadata(&self) -> &[SessionMeta] {
        &self.metadata
    }

    pub fn content_vectors(&self) -> &[Vec<f32>] {
        &self.content_vectors
    }

    pub fn context_vectors(&self) -> &[Vec<f32>] {
        &self.context_vectors
    }

    /// Whether entry `i` carries the zero content sentinel
    pub fn content_is_zero(&self, i: usize) -> bool {
        self.content_zero.get(i).copied().unwrap_or(true)
    }

    /// Whether entry `i` carries the zero context sentinel
    pub fn context_is_zero(&self, i: usize) -> bool {
        self.context_zero.get(i).copied().unwrap_or(true)
    }

    /// Append a session. Both vectors must have the store dimension; they
    /// are unit-normalized unless all-zero. Returns the new entry's index.
    pub fn add(
        &mut self,
        content_vector: Vec<f32>,
        context_vector: Vec<f32>,
        meta: SessionMeta,
    ) -> Result<usize> {
        for (role, v) in [("content", &content_vector), ("context", &context_vector)] {
            if v.len() != self.dimension {
                return Err(MnemoError::InvalidInput(format!(
                    "{} vector has dimension {}, store expects {}",
                    role,
                    v.len(),
                    self.dimension
                )));
            }
        }

        let mut content_vector = content_vector;
        let mut context_vector = context_vector;
        self.content_zero.push(!normalize_in_place(&mut content_vector));
        self.context_zero.push(!normalize_in_place(&mut context_vector));

        self.content_vectors.push(content_vector);
        self.context_vectors.push(context_vector);
        self.metadata.push(meta);
        Ok(self.metadata.len() - 1)
    }

    /// Append every entry of `other`, preserving order. Used by the shard
    /// merge step of the offline build.
    pub fn merge(&mut self, other: VectorStore) -> Result<()> {
        if other.dimension != self.dimension {
            return Err(MnemoError::Config(format!(
                "cannot merge store of dimension {} into {}",
                other.dimension, self.dimension
            )));
        }
        self.content_vectors.extend(other.content_vectors);
        self.context_vectors.extend(other.context_vectors);
        self.metadata.extend(other.metadata);
        self.content_zero.extend(other.content_zero);
        self.context_zero.extend(other.context_zero);
        Ok(())
    }

    /// Write the snapshot container to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let snapshot = Snapshot {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            dimension: self.dimension as u32,
            content_vectors: self.content_vectors.clone(),
            context_vectors: self.context_vectors.clone(),
            metadata: self.metadata.clone(),
        };
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), &snapshot)?;
        tracing::info!(path = %path.display(), entries = self.len(), "store snapshot written");
        Ok(())
    }

    /// Restore a snapshot container from `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            MnemoError::Config(format!("cannot open store snapshot {}: {}", path.display(), e))
        })?;
        let snapshot: Snapshot = bincode::deserialize_from(BufReader::new(file))?;
        if snapshot.magic != SNAPSHOT_MAGIC {
            return Err(MnemoError::Config(format!(
                "{} is not a mnemo store snapshot",
                path.display()
            )));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MnemoError::Config(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        let n = snapshot.metadata.len();
        if snapshot.content_vectors.len() != n || snapshot.context_vectors.len() != n {
            return Err(MnemoError::Config(format!(
                "snapshot arrays disagree: {} content / {} context / {} metadata",
                snapshot.content_vectors.len(),
                snapshot.context_vectors.len(),
                n
            )));
        }
        tracing::info!(path = %path.display(), entries = n, "store snapshot loaded");
        let is_zero = |v: &Vec<f32>| v.iter().all(|&x| x == 0.0);
        Ok(Self {
            dimension: snapshot.dimension as usize,
            content_zero: snapshot.content_vectors.iter().map(is_zero).collect(),
            context_zero: snapshot.context_vectors.iter().map(is_zero).collect(),
            content_vectors: snapshot.content_vectors,
            context_vectors: snapshot.context_vectors,
            metadata: snapshot.metadata,
        })
    }
}

/// Scale `v` to unit length. All-zero vectors are left untouched and
/// `false` is returned.
pub fn normalize_in_place(v: &mut [f32]) -> bool {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{session_id, ConversationKind, SessionKind};

    fn meta(i: i64) -> SessionMeta {
        SessionMeta {
            session_id: session_id(SessionKind::Main, i, i + 10),
            conversation_name: format!("conv-{}", i),
            conversation_kind: ConversationKind::Private,
            participants: vec!["甲".to_string(), "乙".to_string()],
            start_ts: i,
            end_ts: i + 10,
            session_kind: SessionKind::Main,
            content_text: "甲: 你好".to_string(),
            context_text: "2024年1月1日上午 参与者: 甲, 乙".to_string(),
            tokens: vec!["你好".to_string()],
        }
    }

    #[test]
    fn test_add_normalizes() {
        let mut store = VectorStore::new(3);
        store.add(vec![3.0, 0.0, 0.0], vec![0.0, 4.0, 0.0], meta(1)).unwrap();
        let c = store.content(0).unwrap();
        let norm: f32 = c.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < NORM_EPSILON);
    }

    #[test]
    fn test_zero_vector_sentinel_kept() {
        let mut store = VectorStore::new(3);
        store.add(vec![0.0; 3], vec![0.0; 3], meta(1)).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.content(0).unwrap().iter().all(|&x| x == 0.0));
        assert!(store.content_is_zero(0));
        assert!(store.context_is_zero(0));
    }

    #[test]
    fn test_zero_flags_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.store");
        let mut store = VectorStore::new(2);
        store.add(vec![0.0, 0.0], vec![1.0, 0.0], meta(1)).unwrap();
        store.save(&path).unwrap();

        let loaded = VectorStore::load(&path).unwrap();
        assert!(loaded.content_is_zero(0));
        assert!(!loaded.context_is_zero(0));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut store = VectorStore::new(3);
        let err = store.add(vec![1.0, 0.0], vec![0.0; 3], meta(1)).unwrap_err();
        assert!(matches!(err, MnemoError::InvalidInput(_)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.store");

        let mut store = VectorStore::new(4);
        store.add(vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0], meta(1)).unwrap();
        store.add(vec![0.0; 4], vec![0.5, 0.5, 0.5, 0.5], meta(2)).unwrap();
        store.save(&path).unwrap();

        let loaded = VectorStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dimension(), 4);
        assert_eq!(loaded.meta(0).unwrap(), store.meta(0).unwrap());
        assert_eq!(loaded.content(0).unwrap(), store.content(0).unwrap());
    }

    #[test]
    fn test_load_missing_is_config_error() {
        let err = VectorStore::load("/nonexistent/nowhere.store").unwrap_err();
        assert!(matches!(err, MnemoError::Config(_)));
    }

    #[test]
    fn test_merge_keeps_order() {
        let mut a = VectorStore::new(2);
        a.add(vec![1.0, 0.0], vec![1.0, 0.0], meta(1)).unwrap();
        let mut b = VectorStore::new(2);
        b.add(vec![0.0, 1.0], vec![0.0, 1.0], meta(2)).unwrap();
        a.merge(b).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.meta(1).unwrap().start_ts, 2);

        let c = VectorStore::new(3);
        assert!(a.merge(c).is_err());
    }

    #[test]
    fn test_snapshot_paths() {
        let p = SnapshotPaths::new("vector_stores/conversations");
        assert_eq!(p.store, PathBuf::from("vector_stores/conversations.store"));
        assert_eq!(p.content_ann, PathBuf::from("vector_stores/conversations.content.ann"));
        assert_eq!(p.context_ann, PathBuf::from("vector_stores/conversations.context.ann"));
    }
}

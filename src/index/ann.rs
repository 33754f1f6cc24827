//! Approximate nearest-neighbor index
//!
//! A hierarchical navigable small-world graph over the store's vectors.
//! Nodes are store indices; the graph holds no vector data of its own, so
//! searches borrow the vector arrays from the caller. Distances are
//! squared L2, from which cosine similarity over unit vectors is
//! recovered as `cos = 1 - d/2`.
//!
//! Construction uses a seeded level RNG, so rebuilding the same corpus
//! yields the same graph.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};

const COMPANION_MAGIC: [u8; 8] = *b"MNEMOANN";
const COMPANION_VERSION: u32 = 1;

/// Hard cap on layer height; level sampling practically never reaches it
const MAX_LEVEL: usize = 16;

/// Graph construction parameters
#[derive(Debug, Clone)]
pub struct AnnParams {
    /// Per-node connectivity on upper layers (layer 0 uses `2 * m`)
    pub m: usize,
    /// Candidate-list width during construction
    pub ef_construction: usize,
    /// Level RNG seed; fixed so builds are reproducible
    pub seed: u64,
}

impl Default for AnnParams {
    fn default() -> Self {
        Self { m: 32, ef_construction: 200, seed: 0x6d6e656d6f }
    }
}

/// Squared Euclidean distance
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cosine similarity recovered from a squared-L2 distance between unit
/// vectors
pub fn cosine_from_distance(d: f32) -> f32 {
    1.0 - d / 2.0
}

#[derive(Debug, PartialEq)]
struct HeapItem {
    dist: f32,
    id: u32,
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.total_cmp(&other.dist).then(self.id.cmp(&other.id))
    }
}

/// The navigable small-world graph
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    m: usize,
    m0: usize,
    ml: f64,
    ef_construction: usize,
    entry_point: Option<u32>,
    top_level: usize,
    /// `edges[node][level]` holds the node's neighbors on that level
    edges: Vec<Vec<Vec<u32>>>,
}

impl HnswGraph {
    /// Build a graph over `vectors`; node ids equal vector indices
    pub fn build(vectors: &[Vec<f32>], params: &AnnParams) -> Self {
        let m = params.m.max(2);
        let mut graph = Self {
            m,
            m0: m * 2,
            ml: 1.0 / (m as f64).ln(),
            ef_construction: params.ef_construction.max(m),
            entry_point: None,
            top_level: 0,
            edges: Vec::with_capacity(vectors.len()),
        };
        let mut rng = SmallRng::seed_from_u64(params.seed);
        for id in 0..vectors.len() {
            let level = graph.random_level(&mut rng);
            graph.insert(vectors, id as u32, level);
        }
        graph
    }

    /// Number of indexed nodes
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn random_level(&self, rng: &mut SmallRng) -> usize {
        let unif: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
        ((-unif.ln() * self.ml).floor() as usize).min(MAX_LEVEL)
    }

    fn insert(&mut self, vectors: &[Vec<f32>], id: u32, level: usize) {
        self.edges.push(vec![Vec::new(); level + 1]);

        let Some(ep) = self.entry_point else {
            self.entry_point = Some(id);
            self.top_level = level;
            return;
        };

        let q = &vectors[id as usize];
        let ep_dist = squared_l2(q, &vectors[ep as usize]);
        let (mut ep, mut ep_dist) = (ep, ep_dist);

        // Greedy descent through the layers above the insertion level
        for l in ((level + 1)..=self.top_level).rev() {
            (ep, ep_dist) = self.greedy_step(vectors, q, ep, ep_dist, l);
        }

        // Link into every layer from min(level, top) down to 0
        let mut entry = vec![(ep_dist, ep)];
        for l in (0..=level.min(self.top_level)).rev() {
            let found = self.search_layer(vectors, q, &entry, self.ef_construction, l);
            let m_max = if l == 0 { self.m0 } else { self.m };
            for &(_, nb) in found.iter().take(m_max) {
                self.edges[id as usize][l].push(nb);
                self.edges[nb as usize][l].push(id);
                if self.edges[nb as usize][l].len() > m_max {
                    self.prune(vectors, nb, l, m_max);
                }
            }
            entry = found;
        }

        if level > self.top_level {
            self.top_level = level;
            self.entry_point = Some(id);
        }
    }

    /// One greedy hill-climb on a single layer
    fn greedy_step(
        &self,
        vectors: &[Vec<f32>],
        q: &[f32],
        mut ep: u32,
        mut ep_dist: f32,
        level: usize,
    ) -> (u32, f32) {
        loop {
            let mut improved = false;
            for &nb in &self.edges[ep as usize][level] {
                let d = squared_l2(q, &vectors[nb as usize]);
                if d < ep_dist {
                    ep = nb;
                    ep_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return (ep, ep_dist);
            }
        }
    }

    /// Best-first expansion on one layer, keeping the `ef` closest
    fn search_layer(
        &self,
        vectors: &[Vec<f32>],
        q: &[f32],
        entry: &[(f32, u32)],
        ef: usize,
        level: usize,
    ) -> Vec<(f32, u32)> {
        let mut visited: HashSet<u32> = entry.iter().map(|&(_, id)| id).collect();
        let mut candidates: BinaryHeap<Reverse<HeapItem>> = entry
            .iter()
            .map(|&(dist, id)| Reverse(HeapItem { dist, id }))
            .collect();
        let mut found: BinaryHeap<HeapItem> =
            entry.iter().map(|&(dist, id)| HeapItem { dist, id }).collect();

        while let Some(Reverse(c)) = candidates.pop() {
            let worst = found.peek().map(|h| h.dist).unwrap_or(f32::INFINITY);
            if c.dist > worst && found.len() >= ef {
                break;
            }
            if (c.id as usize) < self.edges.len() && level < self.edges[c.id as usize].len() {
                for &nb in &self.edges[c.id as usize][level] {
                    if !visited.insert(nb) {
                        continue;
                    }
                    let d = squared_l2(q, &vectors[nb as usize]);
                    let worst = found.peek().map(|h| h.dist).unwrap_or(f32::INFINITY);
                    if found.len() < ef || d < worst {
                        candidates.push(Reverse(HeapItem { dist: d, id: nb }));
                        found.push(HeapItem { dist: d, id: nb });
                        if found.len() > ef {
                            found.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(f32, u32)> =
            found.into_iter().map(|h| (h.dist, h.id)).collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        out
    }

    /// Trim a node's neighborhood back to the `m_max` closest
    fn prune(&mut self, vectors: &[Vec<f32>], node: u32, level: usize, m_max: usize) {
        let v = &vectors[node as usize];
        let current = std::mem::take(&mut self.edges[node as usize][level]);
        let mut ranked: Vec<(f32, u32)> = current
            .into_iter()
            .map(|n| (squared_l2(v, &vectors[n as usize]), n))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.truncate(m_max);
        self.edges[node as usize][level] = ranked.into_iter().map(|(_, n)| n).collect();
    }

    /// K-nearest search. Returns `(node id, squared L2)` sorted by
    /// ascending distance; `ef` is clamped up to `k`.
    pub fn search(
        &self,
        vectors: &[Vec<f32>],
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Vec<(u32, f32)> {
        let Some(ep) = self.entry_point else {
            return Vec::new();
        };
        let mut ep = ep;
        let mut ep_dist = squared_l2(query, &vectors[ep as usize]);
        for l in (1..=self.top_level).rev() {
            (ep, ep_dist) = self.greedy_step(vectors, query, ep, ep_dist, l);
        }
        let found = self.search_layer(vectors, query, &[(ep_dist, ep)], ef.max(k), 0);
        found.into_iter().take(k).map(|(d, id)| (id, d)).collect()
    }

    /// Write a companion file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        bincode::serialize_into(
            BufWriter::new(file),
            &(COMPANION_MAGIC, COMPANION_VERSION, self),
        )?;
        tracing::info!(path = %path.display(), nodes = self.len(), "ann companion written");
        Ok(())
    }

    /// Restore a companion file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            MnemoError::Config(format!("cannot open ann companion {}: {}", path.display(), e))
        })?;
        let (magic, version, graph): ([u8; 8], u32, HnswGraph) =
            bincode::deserialize_from(BufReader::new(file))?;
        if magic != COMPANION_MAGIC {
            return Err(MnemoError::Config(format!(
                "{} is not a mnemo ann companion",
                path.display()
            )));
        }
        if version != COMPANION_VERSION {
            return Err(MnemoError::Config(format!(
                "unsupported ann companion version {} (expected {})",
                version, COMPANION_VERSION
            )));
        }
        Ok(graph)
    }
}

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::coalesce::types::VertexRecord;
use crate::sim::config::{GraphConfig, Workload};

/// Largest vertex count an edge list may imply.
pub const MAX_VERTICES: usize = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub neighbor: u32,
    pub weight: u32,
}

/// Directed graph in compressed sparse row form: vertex `v`'s edges are
/// `edges[offsets[v]..offsets[v + 1]]`.
#[derive(Debug, Clone)]
pub struct GraphImage {
    offsets: Vec<u32>,
    edges: Vec<Edge>,
}

impl GraphImage {
    /// Build from `(src, dst, weight)` triples; vertices are `0..num_vertices`.
    pub fn from_edges(num_vertices: usize, mut triples: Vec<(u32, u32, u32)>) -> Self {
        triples.sort_by_key(|&(src, dst, _)| (src, dst));
        let mut offsets = vec![0u32; num_vertices + 1];
        for &(src, dst, _) in &triples {
            assert!(
                (src as usize) < num_vertices && (dst as usize) < num_vertices,
                "edge {src} -> {dst} outside {num_vertices} vertices"
            );
            offsets[src as usize + 1] += 1;
        }
        for v in 0..num_vertices {
            offsets[v + 1] += offsets[v];
        }
        let edges = triples
            .into_iter()
            .map(|(_, neighbor, weight)| Edge { neighbor, weight })
            .collect();
        Self { offsets, edges }
    }

    /// Whitespace-separated `src dst [weight]` lines; `#` starts a comment, weight defaults to 1.
    pub fn parse_edge_list(text: &str) -> Result<Self> {
        let mut triples = Vec::new();
        let mut max_vertex = None;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 || fields.len() > 3 {
                bail!("line {}: expected 'src dst [weight]', got '{}'", lineno + 1, line);
            }
            let parse = |field: &str| -> Result<u32> {
                field
                    .parse::<u32>()
                    .with_context(|| format!("line {}: bad number '{}'", lineno + 1, field))
            };
            let src = parse(fields[0])?;
            let dst = parse(fields[1])?;
            ensure!(
                (src.max(dst) as usize) < MAX_VERTICES,
                "line {}: vertex id {} exceeds the {} vertex limit",
                lineno + 1,
                src.max(dst),
                MAX_VERTICES
            );
            let weight = fields.get(2).map(|&field| parse(field)).transpose()?.unwrap_or(1);
            max_vertex = max_vertex.max(Some(src.max(dst)));
            triples.push((src, dst, weight));
        }
        let num_vertices = max_vertex.map_or(0, |max| max as usize + 1);
        Ok(Self::from_edges(num_vertices, triples))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read edge list {}", path.display()))?;
        let graph = Self::parse_edge_list(&text)
            .with_context(|| format!("failed to parse edge list {}", path.display()))?;
        info!(
            "loaded {}: {} vertices, {} edges",
            path.display(),
            graph.num_vertices(),
            graph.num_edges()
        );
        Ok(graph)
    }

    /// Uniform random out-edges, `avg_degree` per vertex on average.
    pub fn random(num_vertices: usize, avg_degree: usize, max_weight: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut triples = Vec::with_capacity(num_vertices * avg_degree);
        if num_vertices > 0 {
            for src in 0..num_vertices as u32 {
                let degree = rng.gen_range(0..=2 * avg_degree);
                for _ in 0..degree {
                    let dst = rng.gen_range(0..num_vertices as u32);
                    let weight = rng.gen_range(1..=max_weight.max(1));
                    triples.push((src, dst, weight));
                }
            }
        }
        Self::from_edges(num_vertices, triples)
    }

    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        let graph = match &config.path {
            Some(path) => Self::load(path)?,
            None => Self::random(
                config.num_vertices,
                config.avg_degree,
                config.max_weight,
                config.seed,
            ),
        };
        ensure!(
            config.root < graph.num_vertices(),
            "root {} outside graph of {} vertices",
            config.root,
            graph.num_vertices()
        );
        Ok(graph)
    }

    pub fn num_vertices(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn neighbors(&self, vertex: usize) -> &[Edge] {
        &self.edges[self.offsets[vertex] as usize..self.offsets[vertex + 1] as usize]
    }

    /// Initial work-list record for `vertex`.
    pub fn record(&self, vertex: usize) -> VertexRecord {
        let start = self.offsets[vertex];
        VertexRecord::unreached(self.offsets[vertex + 1] - start, start)
    }

    /// Reference result: best value per vertex from `root`, `u32::MAX` when unreachable.
    pub fn solve(&self, root: usize, workload: Workload) -> Vec<u32> {
        let mut best = vec![u32::MAX; self.num_vertices()];
        let mut heap = BinaryHeap::new();
        best[root] = 0;
        heap.push(Reverse((0u32, root)));
        while let Some(Reverse((value, vertex))) = heap.pop() {
            if value > best[vertex] {
                continue;
            }
            for edge in self.neighbors(vertex) {
                let next = workload.propagate(value, edge.weight);
                let neighbor = edge.neighbor as usize;
                if next < best[neighbor] {
                    best[neighbor] = next;
                    heap.push(Reverse((next, neighbor)));
                }
            }
        }
        best
    }
}

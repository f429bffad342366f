//! Inverted multi-index over LOPQ codes
//!
//! Entries are bucketed by coarse cell pair. A query visits cells in order of
//! increasing coarse distance using the multi-sequence algorithm: both halves'
//! centroids are sorted by distance to the query, and a min-heap walks the
//! `(i, j)` grid of sorted positions outward from `(0, 0)`.

use crate::quantize::lopq::{LopqCode, LopqQuantizer};
use crate::{Neighbor, Result};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone)]
struct Entry {
    row: usize,
    fine: Vec<u8>,
}

/// Cell pair waiting to be visited, ordered so the heap pops the closest
#[derive(Debug, Clone, Copy)]
struct Probe {
    distance: f32,
    i: usize,
    j: usize,
}

impl PartialEq for Probe {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Probe {}

impl PartialOrd for Probe {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Probe {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.i.cmp(&self.i))
            .then_with(|| other.j.cmp(&self.j))
    }
}

/// Searchable collection of encoded rows
#[derive(Debug, Clone, Default)]
pub struct LopqSearcher {
    cells: HashMap<(u32, u32), Vec<Entry>>,
    len: usize,
}

impl LopqSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a searcher from codes whose row is their position
    pub fn from_codes<'a, I>(codes: I) -> Self
    where
        I: IntoIterator<Item = &'a LopqCode>,
    {
        let mut searcher = Self::new();
        for (row, code) in codes.into_iter().enumerate() {
            searcher.add(row, code.clone());
        }
        searcher
    }

    pub fn add(&mut self, row: usize, code: LopqCode) {
        self.cells.entry(code.coarse).or_default().push(Entry {
            row,
            fine: code.fine,
        });
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of non-empty coarse cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Up to `quota` rows ranked by approximate distance to `x`.
    ///
    /// Cells are visited nearest-first until at least `quota` candidates have
    /// been gathered (or every cell is exhausted). The returned distance is the
    /// square root of the asymmetric fine distance and only orders results.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `x` does not match the quantizer.
    pub fn search(&self, quantizer: &LopqQuantizer, x: &[f32], quota: usize) -> Result<Vec<Neighbor>> {
        let [d0, d1] = quantizer.coarse_distances(x)?;
        if quota == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let order0 = argsort(&d0);
        let order1 = argsort(&d1);

        let mut heap = BinaryHeap::new();
        let mut seen = HashSet::new();
        heap.push(Probe {
            distance: d0[order0[0]] + d1[order1[0]],
            i: 0,
            j: 0,
        });
        seen.insert((0, 0));

        let mut candidates: Vec<(usize, f32)> = Vec::new();

        while let Some(Probe { i, j, .. }) = heap.pop() {
            let cell = (order0[i] as u32, order1[j] as u32);
            if let Some(entries) = self.cells.get(&cell) {
                let query = quantizer.cell_query(x, cell);
                candidates.extend(
                    entries
                        .iter()
                        .map(|e| (e.row, quantizer.fine_score(&query, &e.fine))),
                );
            }

            if candidates.len() >= quota {
                break;
            }

            for (ni, nj) in [(i + 1, j), (i, j + 1)] {
                if ni < order0.len() && nj < order1.len() && seen.insert((ni, nj)) {
                    heap.push(Probe {
                        distance: d0[order0[ni]] + d1[order1[nj]],
                        i: ni,
                        j: nj,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(quota);

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(rank, (row, score))| Neighbor {
                row,
                distance: score.max(0.0).sqrt(),
                rank: rank + 1,
            })
            .collect())
    }
}

fn argsort(values: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then_with(|| a.cmp(&b)));
    order
}

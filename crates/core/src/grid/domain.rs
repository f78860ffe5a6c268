//! Decomposition of the computation envelope into square-ish cells.
//!
//! The envelope is split into `grid_dim × grid_dim` cells. `grid_dim` is the
//! smallest power of two keeping the propagation distance above a fixed
//! fraction of the cell size, so that a cell plus its propagation margin stays
//! a bounded working set.
//!
//! Cell edges are computed from a shared boundary formula so that two
//! neighbouring cells agree bit for bit on the edge between them.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core_types::Envelope;
use crate::error::DomainError;

/// Deepest subdivision whose cell count still fits a `usize`.
///
/// Only populated cells are ever visited, so a deep grid over a sparse
/// receiver set costs no more than a shallow one.
pub const MAX_SUBDIVISION_LEVEL: u32 = usize::BITS / 2 - 1;

/// Index of one grid cell. `i` runs along x (longitude), `j` along y (latitude).
///
/// Cells order by row then column, which is the order the driver visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub i: usize,
    pub j: usize,
}

impl CellIndex {
    #[must_use]
    pub const fn new(i: usize, j: usize) -> Self {
        Self { i, j }
    }
}

impl Ord for CellIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.j, self.i).cmp(&(other.j, other.i))
    }
}

impl PartialOrd for CellIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Smallest power-of-two grid dimension such that
/// `max_propagation_distance / (envelope.max_extent / grid_dim) >= minimal_buffer_ratio`.
///
/// # Errors
///
/// Fails on a null envelope, a non-positive distance, or when the cell count
/// of the required grid would not fit a `usize` (see [`MAX_SUBDIVISION_LEVEL`]).
pub fn compute_grid_dim(
    envelope: &Envelope,
    max_propagation_distance: f64,
    minimal_buffer_ratio: f64,
) -> Result<usize, DomainError> {
    if envelope.is_null() {
        return Err(DomainError::EmptyEnvelope);
    }
    if !(max_propagation_distance > 0.0 && max_propagation_distance.is_finite()) {
        return Err(DomainError::NonPositiveDistance(max_propagation_distance));
    }
    let extent = envelope.max_extent();
    let mut level = 0;
    loop {
        let grid_dim = 1usize << level;
        #[allow(clippy::cast_precision_loss)]
        let cell_size = extent / grid_dim as f64;
        if cell_size <= 0.0 || max_propagation_distance / cell_size >= minimal_buffer_ratio {
            return Ok(grid_dim);
        }
        level += 1;
        if level > MAX_SUBDIVISION_LEVEL {
            return Err(DomainError::SubdivisionOverflow(MAX_SUBDIVISION_LEVEL));
        }
    }
}

/// Position of the `k`-th of `n + 1` evenly spaced edges between `min` and `max`.
#[allow(clippy::cast_precision_loss)]
fn edge(min: f64, max: f64, k: usize, n: usize) -> f64 {
    if k >= n {
        max
    } else {
        min + (max - min) * (k as f64) / (n as f64)
    }
}

/// Envelope of cell `(i, j)` of a `grid_dim × grid_dim` decomposition.
///
/// Cells are `width / grid_dim` wide and `height / grid_dim` high, starting at
/// the envelope minimum corner.
#[must_use]
pub fn cell_envelope(main_envelope: &Envelope, i: usize, j: usize, grid_dim: usize) -> Envelope {
    let n = grid_dim.max(1);
    Envelope {
        min_x: edge(main_envelope.min_x, main_envelope.max_x, i, n),
        max_x: edge(main_envelope.min_x, main_envelope.max_x, i + 1, n),
        min_y: edge(main_envelope.min_y, main_envelope.max_y, j, n),
        max_y: edge(main_envelope.min_y, main_envelope.max_y, j + 1, n),
    }
}

/// Column (or row) candidates that may hold `value` on one axis.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn axis_candidates(value: f64, min: f64, max: f64, n: usize) -> std::ops::RangeInclusive<usize> {
    let span = max - min;
    let guess = if span > 0.0 {
        (((value - min) / span) * n as f64).floor().max(0.0) as usize
    } else {
        0
    };
    let guess = guess.min(n - 1);
    guess.saturating_sub(1)..=(guess + 1).min(n - 1)
}

/// Count the points falling in each cell. Cells without points are absent.
///
/// A point on a shared edge counts for every cell touching it.
pub fn populated_cells<I>(
    main_envelope: &Envelope,
    grid_dim: usize,
    points: I,
) -> BTreeMap<CellIndex, usize>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let n = grid_dim.max(1);
    let mut cells = BTreeMap::new();
    for (x, y) in points {
        if !main_envelope.contains_point(x, y) {
            continue;
        }
        for i in axis_candidates(x, main_envelope.min_x, main_envelope.max_x, n) {
            for j in axis_candidates(y, main_envelope.min_y, main_envelope.max_y, n) {
                if cell_envelope(main_envelope, i, j, n).contains_point(x, y) {
                    *cells.entry(CellIndex::new(i, j)).or_insert(0) += 1;
                }
            }
        }
    }
    cells
}

/// The computation domain of one run and its cell decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainGrid {
    envelope: Envelope,
    grid_dim: usize,
}

impl DomainGrid {
    /// Size a grid over `envelope`.
    ///
    /// # Errors
    ///
    /// See [`compute_grid_dim`].
    pub fn new(
        envelope: Envelope,
        max_propagation_distance: f64,
        minimal_buffer_ratio: f64,
    ) -> Result<Self, DomainError> {
        let grid_dim = compute_grid_dim(&envelope, max_propagation_distance, minimal_buffer_ratio)?;
        Ok(Self { envelope, grid_dim })
    }

    #[must_use]
    pub const fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    #[must_use]
    pub const fn grid_dim(&self) -> usize {
        self.grid_dim
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.grid_dim * self.grid_dim
    }

    #[must_use]
    pub fn cell_envelope(&self, cell: CellIndex) -> Envelope {
        cell_envelope(&self.envelope, cell.i, cell.j, self.grid_dim)
    }

    /// Every cell in visiting order.
    pub fn cells(&self) -> impl Iterator<Item = CellIndex> + '_ {
        (0..self.grid_dim).flat_map(move |j| (0..self.grid_dim).map(move |i| CellIndex::new(i, j)))
    }

    /// See [`populated_cells`].
    pub fn populated_cells<I>(&self, points: I) -> BTreeMap<CellIndex, usize>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        populated_cells(&self.envelope, self.grid_dim, points)
    }
}

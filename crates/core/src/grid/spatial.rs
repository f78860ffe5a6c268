//! Hash-grid spatial index for envelope queries.

use rustc_hash::FxHashMap;

use crate::core_types::Envelope;

/// Spatial index bucketing items by the grid cells their envelope covers.
///
/// Items are identified by their position in the caller's storage. Queries
/// return candidates whose envelope shares a bucket with the query window;
/// callers refine with an exact test.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    buckets: FxHashMap<u64, Vec<usize>>,
    cell_size: f64,
    origin: (f64, f64),
    len: usize,
}

impl SpatialIndex {
    /// Create an empty index.
    ///
    /// # Arguments
    /// * `origin` - Any point near the indexed data, used to keep bucket keys small
    /// * `cell_size` - Bucket side in metres, must be positive
    #[must_use]
    pub fn new(origin: (f64, f64), cell_size: f64) -> Self {
        Self {
            buckets: FxHashMap::default(),
            cell_size: if cell_size > 0.0 { cell_size } else { 1.0 },
            origin,
            len: 0,
        }
    }

    /// Build an index over items given by their envelopes.
    ///
    /// The bucket size adapts to the data so that each item covers few buckets.
    pub fn from_envelopes<I>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = Envelope>,
    {
        let envelopes: Vec<Envelope> = envelopes.into_iter().collect();
        let mut bounds = Envelope::null();
        let mut item_extent: f64 = 0.0;
        for envelope in &envelopes {
            bounds.expand_to_include(envelope);
            item_extent = item_extent.max(envelope.max_extent());
        }
        let data_cell = if envelopes.is_empty() {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let count = envelopes.len() as f64;
            bounds.max_extent() / count.sqrt()
        };
        let cell_size = data_cell.max(item_extent).max(1.0);
        let origin = if bounds.is_null() {
            (0.0, 0.0)
        } else {
            (bounds.min_x, bounds.min_y)
        };
        let mut index = Self::new(origin, cell_size);
        for (id, envelope) in envelopes.iter().enumerate() {
            index.insert(id, envelope);
        }
        index
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cell_coord(&self, value: f64, origin: f64) -> i32 {
        ((value - origin) / self.cell_size)
            .floor()
            .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
    }

    fn cell_range(&self, envelope: &Envelope) -> ((i32, i32), (i32, i32)) {
        (
            (
                self.cell_coord(envelope.min_x, self.origin.0),
                self.cell_coord(envelope.max_x, self.origin.0),
            ),
            (
                self.cell_coord(envelope.min_y, self.origin.1),
                self.cell_coord(envelope.max_y, self.origin.1),
            ),
        )
    }

    /// Insert an item in every bucket its envelope covers.
    pub fn insert(&mut self, id: usize, envelope: &Envelope) {
        if envelope.is_null() {
            return;
        }
        let ((x0, x1), (y0, y1)) = self.cell_range(envelope);
        for ix in x0..=x1 {
            for iy in y0..=y1 {
                self.buckets
                    .entry(morton_encode(ix, iy))
                    .or_default()
                    .push(id);
            }
        }
        self.len += 1;
    }

    /// Insert a point item.
    pub fn insert_point(&mut self, id: usize, x: f64, y: f64) {
        self.insert(id, &Envelope::from_point(x, y));
    }

    /// Candidate items whose buckets overlap `envelope`, sorted and deduplicated.
    #[must_use]
    pub fn query(&self, envelope: &Envelope) -> Vec<usize> {
        if envelope.is_null() || self.buckets.is_empty() {
            return Vec::new();
        }
        let ((x0, x1), (y0, y1)) = self.cell_range(envelope);
        let bucket_count = (i64::from(x1) - i64::from(x0) + 1) * (i64::from(y1) - i64::from(y0) + 1);

        let mut results = Vec::new();
        if usize::try_from(bucket_count).map_or(true, |count| count > self.buckets.len()) {
            // Window larger than the populated area, scan buckets instead.
            for (&key, ids) in &self.buckets {
                let (ix, iy) = morton_decode(key);
                if (x0..=x1).contains(&ix) && (y0..=y1).contains(&iy) {
                    results.extend(ids);
                }
            }
        } else {
            for ix in x0..=x1 {
                for iy in y0..=y1 {
                    if let Some(ids) = self.buckets.get(&morton_encode(ix, iy)) {
                        results.extend(ids);
                    }
                }
            }
        }
        results.sort_unstable();
        results.dedup();
        results
    }

    /// Get number of buckets in the index
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Get number of items in the index
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Morton encode 2D coordinates into a single 64-bit integer
/// This provides spatial locality for hash lookups
fn morton_encode(x: i32, y: i32) -> u64 {
    // Reinterpret as unsigned to handle negative coordinates
    #[allow(clippy::cast_sign_loss)]
    let (x, y) = (u64::from(x as u32), u64::from(y as u32));

    let mut result = 0u64;
    for i in 0..32 {
        result |= ((x >> i) & 1) << (2 * i);
        result |= ((y >> i) & 1) << (2 * i + 1);
    }
    result
}

#[allow(clippy::cast_possible_wrap)]
fn morton_decode(code: u64) -> (i32, i32) {
    let mut x = 0u32;
    let mut y = 0u32;
    for i in 0..32 {
        if (code >> (2 * i)) & 1 == 1 {
            x |= 1 << i;
        }
        if (code >> (2 * i + 1)) & 1 == 1 {
            y |= 1 << i;
        }
    }
    (x as i32, y as i32)
}

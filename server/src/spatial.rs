//! Uniform spatial hash grid over the (x, z) plane.
//!
//! The grid is the authoritative position store for broadcast purposes.
//! Cells are squares of `cell_size` world units keyed by
//! `(floor(x / cell_size), floor(z / cell_size))`; y is carried along for
//! precise 3D range filtering but does not affect cell placement.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Integer cell coordinate on the (x, z) plane.
pub type Cell = (i32, i32);

#[derive(Debug, Clone, Copy)]
struct EntityRecord {
    cell: Cell,
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Default)]
struct GridInner {
    /// Cell -> entity ids inside it.
    cells: HashMap<Cell, HashSet<u32>>,
    /// Entity id -> its cell and exact position. Always agrees with `cells`.
    records: HashMap<u32, EntityRecord>,
}

/// Internally synchronized spatial grid; `&self` operations are safe from
/// any task.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    inner: RwLock<GridInner>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inner: RwLock::new(GridInner::default()),
        }
    }

    fn cell_for(&self, x: f32, z: f32) -> Cell {
        (
            (x / self.cell_size).floor() as i32,
            (z / self.cell_size).floor() as i32,
        )
    }

    /// Registers an entity at the given position. Re-adding an existing id
    /// behaves like [`SpatialGrid::update`].
    pub fn add(&self, id: u32, x: f32, y: f32, z: f32) {
        let cell = self.cell_for(x, z);
        let mut inner = self.inner.write().expect("grid lock poisoned");
        if let Some(prev) = inner.records.insert(id, EntityRecord { cell, x, y, z }) {
            if prev.cell != cell {
                Self::detach(&mut inner.cells, prev.cell, id);
            }
        }
        inner.cells.entry(cell).or_default().insert(id);
    }

    /// Rewrites an entity's position, moving it between cell sets when the
    /// cell changed. The move and the position rewrite happen under one
    /// lock, so readers never observe them apart.
    pub fn update(&self, id: u32, x: f32, y: f32, z: f32) {
        self.add(id, x, y, z);
    }

    /// Removes an entity from both indexes. Unknown ids are a no-op.
    pub fn remove(&self, id: u32) {
        let mut inner = self.inner.write().expect("grid lock poisoned");
        if let Some(record) = inner.records.remove(&id) {
            Self::detach(&mut inner.cells, record.cell, id);
        }
    }

    /// Drops an id from a cell set, discarding the set once empty.
    fn detach(cells: &mut HashMap<Cell, HashSet<u32>>, cell: Cell, id: u32) {
        let now_empty = match cells.get_mut(&cell) {
            Some(set) => {
                set.remove(&id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            cells.remove(&cell);
        }
    }

    /// The cell currently holding an entity, if it is registered.
    pub fn cell_of(&self, id: u32) -> Option<Cell> {
        self.inner
            .read()
            .expect("grid lock poisoned")
            .records
            .get(&id)
            .map(|r| r.cell)
    }

    /// Exact position of an entity, if it is registered.
    pub fn position_of(&self, id: u32) -> Option<(f32, f32, f32)> {
        self.inner
            .read()
            .expect("grid lock poisoned")
            .records
            .get(&id)
            .map(|r| (r.x, r.y, r.z))
    }

    /// All entity ids within Euclidean (3D) distance `r` of the point.
    ///
    /// Scans the square of cells covering `[x - r, x + r] x [z - r, z + r]`
    /// and filters each candidate by precise distance.
    pub fn range(&self, x: f32, y: f32, z: f32, r: f32) -> Vec<u32> {
        let min_cx = ((x - r) / self.cell_size).floor() as i32;
        let max_cx = ((x + r) / self.cell_size).floor() as i32;
        let min_cz = ((z - r) / self.cell_size).floor() as i32;
        let max_cz = ((z + r) / self.cell_size).floor() as i32;
        let r_sq = r * r;

        let inner = self.inner.read().expect("grid lock poisoned");
        let mut hits = Vec::new();
        for cx in min_cx..=max_cx {
            for cz in min_cz..=max_cz {
                let Some(ids) = inner.cells.get(&(cx, cz)) else {
                    continue;
                };
                for &id in ids {
                    let rec = &inner.records[&id];
                    let dx = rec.x - x;
                    let dy = rec.y - y;
                    let dz = rec.z - z;
                    if dx * dx + dy * dy + dz * dz <= r_sq {
                        hits.push(id);
                    }
                }
            }
        }
        hits
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.inner.read().expect("grid lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

use glam::{IVec3, Vec3};

/// FNV-1a over the coordinates of a cell.
///
/// Cell coordinates are small and regular; the xor-multiply fold spreads
/// them well enough to keep buckets short, and the fixed seed keeps bucket
/// layout identical for a given insertion sequence.
#[derive(Clone, Debug)]
pub struct CellHasher(u64);

impl Default for CellHasher {
    #[inline]
    fn default() -> Self {
        Self(2166136261)
    }
}

impl Hasher for CellHasher {
    #[inline]
    fn write_i32(&mut self, i: i32) {
        self.0 = (self.0 ^ i as u32 as u64).wrapping_mul(16777619);
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 = (self.0 ^ u64::from(byte)).wrapping_mul(16777619);
        }
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }
}

type Buckets = HashMap<IVec3, Vec<usize>, BuildHasherDefault<CellHasher>>;

/// Buckets body indices into fixed-size cubic cells.
///
/// The grid is cleared and rebuilt from scratch every substep, never updated
/// incrementally, so its buckets are only meaningful between a rebuild and
/// the next mutation of the positions it indexed. With a cell edge of at
/// least the largest body diameter, all collision partners of a body sit in
/// the 3x3x3 block around its cell.
#[derive(Debug)]
pub struct SpatialHashGrid {
    cell_size: f32,
    buckets: Buckets,
}

impl SpatialHashGrid {
    /// Creates an empty grid of cubic cells with the given edge length.
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            buckets: Buckets::default(),
        }
    }

    /// Edge length of the grid's cells.
    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Cell containing `position`, flooring each scaled component.
    ///
    /// Flooring keeps cells half-open on both sides of zero; truncating
    /// would fold the cells around each axis plane into one double-width
    /// cell.
    #[inline]
    pub fn cell_of(&self, position: Vec3) -> IVec3 {
        (position / self.cell_size).floor().as_ivec3()
    }

    /// Empties every bucket.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    /// Files a body index under the cell containing `position`.
    pub fn insert(&mut self, index: usize, position: Vec3) {
        let cell = self.cell_of(position);
        self.buckets.entry(cell).or_default().push(index);
    }

    /// Body indices bucketed in exactly `cell`.
    pub fn bucket(&self, cell: IVec3) -> &[usize] {
        self.buckets.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates every occupied cell and its bucket, in no particular order.
    pub fn cells(&self) -> impl Iterator<Item = (IVec3, &[usize])> {
        self.buckets
            .iter()
            .map(|(cell, bucket)| (*cell, bucket.as_slice()))
    }

    /// Number of occupied cells.
    pub fn cell_count(&self) -> usize {
        self.buckets.len()
    }

    /// Every body index in the 3x3x3 block of cells centered on `cell`,
    /// including the occupants of `cell` itself.
    pub fn neighbors_of_cell(&self, cell: IVec3) -> Vec<usize> {
        let mut neighbors = Vec::new();
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    neighbors.extend_from_slice(self.bucket(cell + IVec3::new(x, y, z)));
                }
            }
        }
        neighbors
    }

    /// Every body index in the block around the body's own cell, excluding
    /// the body itself.
    pub fn neighbors_of_body(&self, index: usize, position: Vec3) -> Vec<usize> {
        let mut neighbors = self.neighbors_of_cell(self.cell_of(position));
        neighbors.retain(|&other| other != index);
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_floor_their_coordinates() {
        let grid = SpatialHashGrid::new(0.3);

        assert_eq!(grid.cell_of(Vec3::new(0.35, 0.0, 0.0)), IVec3::new(1, 0, 0));
        assert_eq!(grid.cell_of(Vec3::new(0.95, 0.0, 0.0)), IVec3::new(3, 0, 0));
        assert_eq!(
            grid.cell_of(Vec3::new(-0.1, -0.35, 0.1)),
            IVec3::new(-1, -2, 0)
        );
    }

    #[test]
    fn negative_side_cells_are_single_width() {
        let grid = SpatialHashGrid::new(1.0);

        assert_eq!(grid.cell_of(Vec3::new(-0.5, 0.0, 0.0)), IVec3::new(-1, 0, 0));
        assert_eq!(grid.cell_of(Vec3::new(0.5, 0.0, 0.0)), IVec3::ZERO);
        assert_ne!(
            grid.cell_of(Vec3::new(-0.5, 0.0, 0.0)),
            grid.cell_of(Vec3::new(0.5, 0.0, 0.0))
        );
    }

    #[test]
    fn neighbors_cover_the_surrounding_block() {
        let mut grid = SpatialHashGrid::new(1.0);
        grid.insert(0, Vec3::splat(0.5));
        grid.insert(1, Vec3::new(1.5, 0.5, 0.5));
        grid.insert(2, Vec3::new(-0.5, -0.5, 0.5));
        grid.insert(3, Vec3::new(3.5, 0.5, 0.5));

        let mut neighbors = grid.neighbors_of_cell(IVec3::ZERO);
        neighbors.sort_unstable();

        assert_eq!(neighbors, vec![0, 1, 2]);
    }

    #[test]
    fn neighbors_of_body_excludes_the_body_itself() {
        let mut grid = SpatialHashGrid::new(1.0);
        let position = Vec3::splat(0.5);
        grid.insert(0, position);
        grid.insert(1, position);
        grid.insert(2, Vec3::new(1.5, 0.5, 0.5));

        let mut neighbors = grid.neighbors_of_body(0, position);
        neighbors.sort_unstable();

        assert_eq!(neighbors, vec![1, 2]);
    }

    #[test]
    fn clear_rebuilds_from_empty_buckets() {
        let mut grid = SpatialHashGrid::new(1.0);
        grid.insert(0, Vec3::splat(0.5));
        grid.insert(1, Vec3::splat(7.5));
        assert_eq!(grid.cell_count(), 2);

        grid.clear();

        assert_eq!(grid.cell_count(), 0);
        assert!(grid.bucket(IVec3::ZERO).is_empty());
        assert!(grid.neighbors_of_cell(IVec3::ZERO).is_empty());
    }

    #[test]
    fn far_apart_bodies_do_not_see_each_other() {
        let mut grid = SpatialHashGrid::new(0.3);
        grid.insert(0, Vec3::ZERO);
        grid.insert(1, Vec3::splat(10.0));

        assert!(grid.neighbors_of_body(0, Vec3::ZERO).is_empty());
        assert!(grid.neighbors_of_body(1, Vec3::splat(10.0)).is_empty());
    }

    #[test]
    fn bodies_on_neighboring_cells_see_each_other() {
        let mut grid = SpatialHashGrid::new(0.3);
        let left = Vec3::new(0.29, 0.0, 0.0);
        let right = Vec3::new(0.31, 0.0, 0.0);
        grid.insert(0, left);
        grid.insert(1, right);

        assert_ne!(grid.cell_of(left), grid.cell_of(right));
        assert_eq!(grid.neighbors_of_body(0, left), vec![1]);
        assert_eq!(grid.neighbors_of_body(1, right), vec![0]);
    }
}

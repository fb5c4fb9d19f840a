//! A grid with vertex coordinates.
//!
//! [`Domain`] bundles a [`MultiGrid`] with a position attachment, the world
//! dimension of the coordinates and a flag telling whether adaptive
//! (hanging-node) refinement may be used on it.

use crate::data::attachment::Attachment;
use crate::mesh_error::GridError;
use crate::topology::grid::MultiGrid;
use crate::topology::point::{EdgeId, GeomObj, VertexId};

/// Vertex coordinates; unused trailing components are zero.
pub type Position = [f64; 3];

/// Converts stored coordinates to `dim` components.
pub fn coords_of(p: &Position, dim: usize) -> Vec<f64> {
    (0..dim).map(|i| p.get(i).copied().unwrap_or(0.0)).collect()
}

/// Builds a position from any number of coordinates, truncating extra and
/// zero-padding missing components.
pub fn position_from(coords: &[f64]) -> Position {
    let mut p = [0.0; 3];
    for (dst, src) in p.iter_mut().zip(coords) {
        *dst = *src;
    }
    p
}

pub(crate) fn distance(a: &Position, b: &Position) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Barycenter of the corners of `obj`.
pub fn center_of(
    grid: &MultiGrid,
    position: Attachment<VertexId, Position>,
    obj: GeomObj,
) -> Result<Position, GridError> {
    let acc = grid.accessor(position)?;
    let corners = grid.vertices_of(obj)?;
    let mut c = [0.0; 3];
    for &v in &corners {
        for (ci, pi) in c.iter_mut().zip(&acc[v]) {
            *ci += pi;
        }
    }
    let n = corners.len().max(1) as f64;
    Ok(c.map(|x| x / n))
}

/// A multigrid with coordinates.
#[derive(Debug)]
pub struct Domain {
    grid: MultiGrid,
    position: Attachment<VertexId, Position>,
    dim: usize,
    adaptive: bool,
}

impl Domain {
    /// Creates an empty domain in `dim` (1..=3) dimensional space.
    pub fn new(dim: usize, adaptive: bool) -> Self {
        let mut grid = MultiGrid::new();
        let position = grid.attach([0.0; 3]);
        Self {
            grid,
            position,
            dim: dim.clamp(1, 3),
            adaptive,
        }
    }

    /// The multigrid of the domain.
    pub fn grid(&self) -> &MultiGrid {
        &self.grid
    }

    /// Mutable access to the multigrid.
    pub fn grid_mut(&mut self) -> &mut MultiGrid {
        &mut self.grid
    }

    /// The position attachment of the grid's vertices.
    pub fn position(&self) -> Attachment<VertexId, Position> {
        self.position
    }

    /// World dimension (1, 2 or 3).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// `true` if the domain supports hanging-node refinement.
    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Coordinates of vertex `v`, padded with zeros beyond the world
    /// dimension.
    ///
    /// ```
    /// use ug_grid::data::domain::Domain;
    ///
    /// let mut dom = Domain::new(2, false);
    /// let v = dom.create_vertex_at(&[1.0, 2.0]).unwrap();
    /// dom.set_position(v, [3.0, 4.0, 0.0]).unwrap();
    /// assert_eq!(dom.position_of(v).unwrap(), [3.0, 4.0, 0.0]);
    /// assert_eq!(dom.grid().num_levels(), 1);
    /// ```
    pub fn position_of(&self, v: VertexId) -> Result<Position, GridError> {
        self.grid.vertex(v)?;
        Ok(self.grid.accessor(self.position)?[v])
    }

    /// Moves vertex `v` to `p`.
    pub fn set_position(&mut self, v: VertexId, p: Position) -> Result<(), GridError> {
        self.grid.vertex(v)?;
        self.grid.accessor_mut(self.position)?[v] = p;
        Ok(())
    }

    /// Creates a level-0 vertex at `coords`.
    pub fn create_vertex_at(&mut self, coords: &[f64]) -> Result<VertexId, GridError> {
        let v = self.grid.create_vertex(None)?;
        self.set_position(v, position_from(coords))?;
        Ok(v)
    }

    /// Distance between the corners of an edge.
    pub fn edge_length(&self, e: EdgeId) -> Result<f64, GridError> {
        let [a, b] = self.grid.edge(e)?.vertices();
        Ok(distance(&self.position_of(a)?, &self.position_of(b)?))
    }

    /// Barycenter of an element.
    pub fn center(&self, obj: GeomObj) -> Result<Position, GridError> {
        center_of(&self.grid, self.position, obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_padded_and_truncated() {
        assert_eq!(position_from(&[1.0]), [1.0, 0.0, 0.0]);
        assert_eq!(position_from(&[1.0, 2.0, 3.0, 4.0]), [1.0, 2.0, 3.0]);
        assert_eq!(coords_of(&[1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
    }

    #[test]
    fn edge_length_and_center() {
        let mut dom = Domain::new(2, true);
        let a = dom.create_vertex_at(&[0.0, 0.0]).unwrap();
        let b = dom.create_vertex_at(&[3.0, 4.0]).unwrap();
        let e = dom.grid_mut().create_edge([a, b], None).unwrap();
        assert!((dom.edge_length(e).unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(dom.center(e.into()).unwrap(), [1.5, 2.0, 0.0]);
    }
}

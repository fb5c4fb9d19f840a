//! Vertex placement during refinement.
//!
//! Refiners only create topology. Every new vertex is handed to a
//! [`RefinementCallback`] together with its parent so the callback can
//! compute coordinates (or any other per-vertex data) from the parent level.

use crate::data::attachment::Attachment;
use crate::data::domain::{Position, center_of};
use crate::mesh_error::GridError;
use crate::topology::grid::MultiGrid;
use crate::topology::iter::ElemFilter;
use crate::topology::point::{EdgeId, FaceId, GeomObj, VertexId};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;

/// Receives every vertex created by a refiner.
pub trait RefinementCallback {
    /// Called once for `vertex`, a new child of `parent`.
    fn new_vertex(
        &mut self,
        grid: &mut MultiGrid,
        vertex: VertexId,
        parent: GeomObj,
    ) -> Result<(), GridError>;
}

fn write(
    grid: &mut MultiGrid,
    position: Attachment<VertexId, Position>,
    v: VertexId,
    p: Position,
) -> Result<(), GridError> {
    grid.accessor_mut(position)?[v] = p;
    Ok(())
}

fn norm(p: &Position) -> f64 {
    p.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn sub(a: &Position, b: &Position) -> Position {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn axpy(acc: &mut Position, w: f64, p: &Position) {
    for (a, x) in acc.iter_mut().zip(p) {
        *a += w * x;
    }
}

/// Places new vertices at the barycenter of their parent.
#[derive(Clone, Copy, Debug)]
pub struct LinearProjector {
    position: Attachment<VertexId, Position>,
}

impl LinearProjector {
    pub fn new(position: Attachment<VertexId, Position>) -> Self {
        Self { position }
    }
}

impl RefinementCallback for LinearProjector {
    fn new_vertex(
        &mut self,
        grid: &mut MultiGrid,
        vertex: VertexId,
        parent: GeomObj,
    ) -> Result<(), GridError> {
        let p = center_of(grid, self.position, parent)?;
        write(grid, self.position, vertex, p)
    }
}

/// Projects new vertices onto a sphere. Copies of vertices keep the parent
/// position.
#[derive(Clone, Copy, Debug)]
pub struct SphereProjector {
    position: Attachment<VertexId, Position>,
    center: Position,
    radius: f64,
}

impl SphereProjector {
    pub fn new(position: Attachment<VertexId, Position>, center: Position, radius: f64) -> Self {
        Self {
            position,
            center,
            radius,
        }
    }
}

impl RefinementCallback for SphereProjector {
    fn new_vertex(
        &mut self,
        grid: &mut MultiGrid,
        vertex: VertexId,
        parent: GeomObj,
    ) -> Result<(), GridError> {
        let mut p = center_of(grid, self.position, parent)?;
        if !matches!(parent, GeomObj::Vertex(_)) {
            let dir = sub(&p, &self.center);
            let len = norm(&dir);
            if len > f64::EPSILON {
                p = self.center;
                axpy(&mut p, self.radius / len, &dir);
            }
        }
        write(grid, self.position, vertex, p)
    }
}

/// Projects new vertices radially onto the mantle of an infinite cylinder.
#[derive(Clone, Copy, Debug)]
pub struct CylinderProjector {
    position: Attachment<VertexId, Position>,
    center: Position,
    axis: Position,
    radius: f64,
}

impl CylinderProjector {
    /// `axis` need not be normalized.
    pub fn new(
        position: Attachment<VertexId, Position>,
        center: Position,
        axis: Position,
        radius: f64,
    ) -> Self {
        let len = norm(&axis);
        let axis = if len > 0.0 {
            axis.map(|x| x / len)
        } else {
            [0.0, 0.0, 1.0]
        };
        Self {
            position,
            center,
            axis,
            radius,
        }
    }
}

impl RefinementCallback for CylinderProjector {
    fn new_vertex(
        &mut self,
        grid: &mut MultiGrid,
        vertex: VertexId,
        parent: GeomObj,
    ) -> Result<(), GridError> {
        let mut p = center_of(grid, self.position, parent)?;
        if !matches!(parent, GeomObj::Vertex(_)) {
            let rel = sub(&p, &self.center);
            let along: f64 = rel.iter().zip(&self.axis).map(|(a, b)| a * b).sum();
            let mut foot = self.center;
            axpy(&mut foot, along, &self.axis);
            let radial = sub(&p, &foot);
            let len = norm(&radial);
            if len > f64::EPSILON {
                p = foot;
                axpy(&mut p, self.radius / len, &radial);
            }
        }
        write(grid, self.position, vertex, p)
    }
}

/// Weights of piecewise smooth Loop subdivision (with creases).
///
/// The beta table for small valences is computed on first use and shared by
/// every projector holding the same rules object.
#[derive(Debug, Default)]
pub struct LoopSubdivisionRules {
    betas: OnceCell<Vec<f64>>,
}

const CACHED_VALENCES: usize = 16;

impl LoopSubdivisionRules {
    pub fn new() -> Self {
        Self::default()
    }

    fn calculate_beta(valence: usize) -> f64 {
        if valence == 0 {
            return 0.0;
        }
        let n = valence as f64;
        let t = 0.375 + 0.25 * (2.0 * PI / n).cos();
        (0.625 - t * t) / n
    }

    /// Loop's beta for an inner vertex of the given valence.
    pub fn beta(&self, valence: usize) -> f64 {
        let table = self
            .betas
            .get_or_init(|| (0..CACHED_VALENCES).map(Self::calculate_beta).collect());
        table
            .get(valence)
            .copied()
            .unwrap_or_else(|| Self::calculate_beta(valence))
    }

    pub fn even_inner_center_weight(&self, valence: usize) -> f64 {
        1.0 - valence as f64 * self.beta(valence)
    }

    pub fn even_inner_nbr_weight(&self, valence: usize) -> f64 {
        self.beta(valence)
    }

    /// Center and the two crease neighbours.
    pub fn even_crease_weights(&self) -> [f64; 3] {
        [0.75, 0.125, 0.125]
    }

    /// Two edge corners and the two opposite vertices.
    pub fn odd_inner_weights(&self) -> [f64; 4] {
        [0.375, 0.375, 0.125, 0.125]
    }

    /// Odd weights next to a crease vertex with `crease_valence` edges: the
    /// crease corner, the inner corner and the two opposite vertices.
    pub fn odd_inner_weights_at_crease(&self, crease_valence: usize) -> [f64; 4] {
        if crease_valence <= 2 || crease_valence == 4 {
            return self.odd_inner_weights();
        }
        let gamma = 0.5 - 0.25 * (PI / (crease_valence - 1) as f64).cos();
        [0.75 - gamma, gamma, 0.125, 0.125]
    }

    pub fn odd_crease_weights(&self) -> [f64; 2] {
        [0.5, 0.5]
    }

    /// Weight of the vertex itself when projecting an inner vertex to the
    /// limit surface.
    pub fn proj_inner_center_weight(&self, valence: usize) -> f64 {
        let v = valence as f64;
        1.0 - v / (0.375 / self.beta(valence) + v)
    }

    pub fn proj_inner_nbr_weight(&self, valence: usize) -> f64 {
        1.0 / (0.375 / self.beta(valence) + valence as f64)
    }

    pub fn proj_crease_weights(&self) -> [f64; 3] {
        [2.0 / 3.0, 1.0 / 6.0, 1.0 / 6.0]
    }
}

/// Neighbourhood of a vertex on a triangulated surface.
struct VertexStar {
    neighbours: Vec<VertexId>,
    crease_neighbours: Vec<VertexId>,
    has_faces: bool,
}

fn is_crease_edge(grid: &MultiGrid, e: EdgeId) -> Result<bool, GridError> {
    Ok(grid.edge(e)?.faces().len() != 2)
}

fn star(grid: &MultiGrid, v: VertexId) -> Result<VertexStar, GridError> {
    let mut star = VertexStar {
        neighbours: Vec::new(),
        crease_neighbours: Vec::new(),
        has_faces: false,
    };
    for &e in grid.vertex(v)?.edges() {
        let rec = grid.edge(e)?;
        let [a, b] = rec.vertices();
        let other = if a == v { b } else { a };
        star.neighbours.push(other);
        star.has_faces |= !rec.faces().is_empty();
        if is_crease_edge(grid, e)? {
            star.crease_neighbours.push(other);
        }
    }
    Ok(star)
}

/// Vertex of triangle `f` opposite to edge `[a, b]`.
fn opposite(
    grid: &MultiGrid,
    f: FaceId,
    a: VertexId,
    b: VertexId,
) -> Result<Option<VertexId>, GridError> {
    let rec = grid.face(f)?;
    if rec.vertices().len() != 3 {
        return Ok(None);
    }
    Ok(rec.vertices().iter().copied().find(|&x| x != a && x != b))
}

/// Places new vertices of a triangulated surface by piecewise smooth Loop
/// subdivision. Boundary edges are treated as creases. Parents that are
/// neither vertices nor edges fall back to linear placement.
#[derive(Clone, Debug)]
pub struct SubdivisionLoopProjector {
    position: Attachment<VertexId, Position>,
    rules: Arc<LoopSubdivisionRules>,
}

impl SubdivisionLoopProjector {
    pub fn new(position: Attachment<VertexId, Position>, rules: Arc<LoopSubdivisionRules>) -> Self {
        Self { position, rules }
    }

    fn even(&self, grid: &MultiGrid, v: VertexId) -> Result<Position, GridError> {
        let acc = grid.accessor(self.position)?;
        let star = star(grid, v)?;
        let center = acc[v];
        if !star.has_faces {
            return Ok(center);
        }
        match star.crease_neighbours.len() {
            0 => {
                let n = star.neighbours.len();
                let mut p = [0.0; 3];
                axpy(&mut p, self.rules.even_inner_center_weight(n), &center);
                let w = self.rules.even_inner_nbr_weight(n);
                for &nb in &star.neighbours {
                    axpy(&mut p, w, &acc[nb]);
                }
                Ok(p)
            }
            2 => {
                let [wc, w1, w2] = self.rules.even_crease_weights();
                let mut p = [0.0; 3];
                axpy(&mut p, wc, &center);
                axpy(&mut p, w1, &acc[star.crease_neighbours[0]]);
                axpy(&mut p, w2, &acc[star.crease_neighbours[1]]);
                Ok(p)
            }
            // corners of the crease graph stay in place
            _ => Ok(center),
        }
    }

    fn odd(&self, grid: &MultiGrid, e: EdgeId) -> Result<Position, GridError> {
        let acc = grid.accessor(self.position)?;
        let rec = grid.edge(e)?;
        let [a, b] = rec.vertices();
        if is_crease_edge(grid, e)? {
            let [wa, wb] = self.rules.odd_crease_weights();
            let mut p = [0.0; 3];
            axpy(&mut p, wa, &acc[a]);
            axpy(&mut p, wb, &acc[b]);
            return Ok(p);
        }
        let faces = rec.faces();
        let (Some(c), Some(d)) = (
            opposite(grid, faces[0], a, b)?,
            opposite(grid, faces[1], a, b)?,
        ) else {
            return center_of(grid, self.position, e.into());
        };
        let crease_valence = |v: VertexId| -> Result<Option<usize>, GridError> {
            let s = star(grid, v)?;
            Ok((!s.crease_neighbours.is_empty()).then_some(s.neighbours.len()))
        };
        let (first, second, weights) = match (crease_valence(a)?, crease_valence(b)?) {
            (Some(k), None) => (a, b, self.rules.odd_inner_weights_at_crease(k)),
            (None, Some(k)) => (b, a, self.rules.odd_inner_weights_at_crease(k)),
            _ => (a, b, self.rules.odd_inner_weights()),
        };
        let mut p = [0.0; 3];
        axpy(&mut p, weights[0], &acc[first]);
        axpy(&mut p, weights[1], &acc[second]);
        axpy(&mut p, weights[2], &acc[c]);
        axpy(&mut p, weights[3], &acc[d]);
        Ok(p)
    }

    /// Moves the vertices of `level` onto the limit surface of the
    /// subdivision scheme.
    pub fn project_to_limit(&self, grid: &mut MultiGrid, level: usize) -> Result<(), GridError> {
        let mut moved = Vec::new();
        {
            let acc = grid.accessor(self.position)?;
            for v in grid.iter::<VertexId>(ElemFilter::level(level)) {
                let star = star(grid, v)?;
                if !star.has_faces {
                    continue;
                }
                let center = acc[v];
                let mut p = [0.0; 3];
                match star.crease_neighbours.len() {
                    0 => {
                        let n = star.neighbours.len();
                        axpy(&mut p, self.rules.proj_inner_center_weight(n), &center);
                        let w = self.rules.proj_inner_nbr_weight(n);
                        for &nb in &star.neighbours {
                            axpy(&mut p, w, &acc[nb]);
                        }
                    }
                    2 => {
                        let [wc, w1, w2] = self.rules.proj_crease_weights();
                        axpy(&mut p, wc, &center);
                        axpy(&mut p, w1, &acc[star.crease_neighbours[0]]);
                        axpy(&mut p, w2, &acc[star.crease_neighbours[1]]);
                    }
                    _ => continue,
                }
                moved.push((v, p));
            }
        }
        let mut acc = grid.accessor_mut(self.position)?;
        for (v, p) in moved {
            acc[v] = p;
        }
        Ok(())
    }
}

impl RefinementCallback for SubdivisionLoopProjector {
    fn new_vertex(
        &mut self,
        grid: &mut MultiGrid,
        vertex: VertexId,
        parent: GeomObj,
    ) -> Result<(), GridError> {
        let p = match parent {
            GeomObj::Vertex(v) => self.even(grid, v)?,
            GeomObj::Edge(e) => self.odd(grid, e)?,
            _ => center_of(grid, self.position, parent)?,
        };
        write(grid, self.position, vertex, p)
    }
}

/// Dispatches new vertices to a callback chosen by the subset of their
/// parent; parents in other subsets use the default callback.
pub struct ProjectionHandler {
    default: Box<dyn RefinementCallback>,
    by_subset: BTreeMap<i32, Box<dyn RefinementCallback>>,
}

impl ProjectionHandler {
    pub fn new(default: Box<dyn RefinementCallback>) -> Self {
        Self {
            default,
            by_subset: BTreeMap::new(),
        }
    }

    /// Uses `callback` for children of elements in `subset`.
    pub fn set_projector(&mut self, subset: i32, callback: Box<dyn RefinementCallback>) {
        self.by_subset.insert(subset, callback);
    }
}

impl RefinementCallback for ProjectionHandler {
    fn new_vertex(
        &mut self,
        grid: &mut MultiGrid,
        vertex: VertexId,
        parent: GeomObj,
    ) -> Result<(), GridError> {
        let subset = grid.subset(parent)?;
        match self.by_subset.get_mut(&subset) {
            Some(cb) => cb.new_vertex(grid, vertex, parent),
            None => self.default.new_vertex(grid, vertex, parent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::domain::Domain;
    use crate::topology::cell_type::CellType;

    #[test]
    fn beta_matches_loop_formula() {
        let rules = LoopSubdivisionRules::new();
        // regular valence 6: beta = 1/16
        assert!((rules.beta(6) - 0.0625).abs() < 1e-12);
        assert!((rules.beta(40) - LoopSubdivisionRules::calculate_beta(40)).abs() < 1e-15);
        let w = rules.even_inner_center_weight(6) + 6.0 * rules.even_inner_nbr_weight(6);
        assert!((w - 1.0).abs() < 1e-12);
        assert_eq!(rules.odd_inner_weights_at_crease(4), rules.odd_inner_weights());
        let gamma = rules.odd_inner_weights_at_crease(3);
        assert!((gamma.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let proj = rules.proj_inner_center_weight(6) + 6.0 * rules.proj_inner_nbr_weight(6);
        assert!((proj - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sphere_projector_moves_midpoints_to_the_surface() {
        let mut dom = Domain::new(2, true);
        let a = dom.create_vertex_at(&[1.0, 0.0]).unwrap();
        let b = dom.create_vertex_at(&[0.0, 1.0]).unwrap();
        let pos = dom.position();
        let grid = dom.grid_mut();
        let e = grid.create_edge([a, b], None).unwrap();
        let m = grid.create_vertex(Some(e.into())).unwrap();
        let mut proj = SphereProjector::new(pos, [0.0; 3], 1.0);
        proj.new_vertex(grid, m, e.into()).unwrap();
        let p = grid.accessor(pos).unwrap()[m];
        assert!((norm(&p) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn handler_dispatches_by_parent_subset() {
        let mut dom = Domain::new(2, true);
        let a = dom.create_vertex_at(&[2.0, 0.0]).unwrap();
        let b = dom.create_vertex_at(&[0.0, 2.0]).unwrap();
        let pos = dom.position();
        let grid = dom.grid_mut();
        let e = grid.create_edge([a, b], None).unwrap();
        grid.set_subset(e.into(), 1).unwrap();
        let mut handler = ProjectionHandler::new(Box::new(LinearProjector::new(pos)));
        handler.set_projector(1, Box::new(SphereProjector::new(pos, [0.0; 3], 2.0)));
        let m = grid.create_vertex(Some(e.into())).unwrap();
        handler.new_vertex(grid, m, e.into()).unwrap();
        let p = grid.accessor(pos).unwrap()[m];
        assert!((norm(&p) - 2.0).abs() < 1e-12);

        let c = grid.create_vertex(Some(a.into())).unwrap();
        handler.new_vertex(grid, c, a.into()).unwrap();
        assert_eq!(grid.accessor(pos).unwrap()[c], [2.0, 0.0, 0.0]);
    }

    #[test]
    fn loop_odd_rule_on_interior_edge() {
        let mut dom = Domain::new(3, true);
        let a = dom.create_vertex_at(&[0.0, 0.0]).unwrap();
        let b = dom.create_vertex_at(&[1.0, 0.0]).unwrap();
        let c = dom.create_vertex_at(&[0.5, 1.0]).unwrap();
        let d = dom.create_vertex_at(&[0.5, -1.0]).unwrap();
        let pos = dom.position();
        let grid = dom.grid_mut();
        grid.create_face(CellType::Triangle, &[a, b, c], None).unwrap();
        grid.create_face(CellType::Triangle, &[b, a, d], None).unwrap();
        let e = grid.find_edge(a, b).unwrap();
        let m = grid.create_vertex(Some(e.into())).unwrap();
        let mut proj = SubdivisionLoopProjector::new(pos, Arc::new(LoopSubdivisionRules::new()));
        proj.new_vertex(grid, m, e.into()).unwrap();
        let p = grid.accessor(pos).unwrap()[m];
        // both corners touch the boundary, so the plain odd weights apply
        assert!((p[1]).abs() < 1e-12);
        assert!(p[0] > 0.0 && p[0] < 1.0);
    }
}

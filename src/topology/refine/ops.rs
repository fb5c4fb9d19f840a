//! Element-level refinement steps shared by the refiners.

use crate::mesh_error::GridError;
use crate::topology::cell_type::CellType;
use crate::topology::grid::MultiGrid;
use crate::topology::iter::ElemFilter;
use crate::topology::point::{EdgeId, ElemKind, FaceId, GeomObj, VertexId, VolumeId};
use crate::topology::refine::projectors::RefinementCallback;
use crate::topology::refine::templates::{
    hexahedron_subdivision, prism_subdivision, pyramid_subdivision, quadrilateral_pair_split,
    quadrilateral_subdivision, tetrahedron_subdivision, triangle_bisection,
    triangle_subdivision, triangle_two_edge_split,
};
use smallvec::SmallVec;
use std::collections::BTreeSet;

/// How a face is split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum FacePattern {
    /// All edges split (1→4).
    Regular,
    /// Triangle split through the midpoint of one edge.
    Bisect { edge: usize },
    /// Triangle with all edges but `unsplit` split.
    TwoEdges { unsplit: usize },
    /// Quad split through the midpoints of edges `first` and `first + 2`.
    QuadPair { first: usize },
}

impl FacePattern {
    /// Pattern for a face whose edges `split[i]` are refined; `None` if no
    /// edge is refined. Quad patterns without a template become regular.
    pub(crate) fn from_split_edges(cell_type: CellType, split: &[bool]) -> Option<Self> {
        let count = split.iter().filter(|&&s| s).count();
        match (cell_type, count) {
            (_, 0) => None,
            (CellType::Triangle, 1) => split.iter().position(|&s| s).map(|edge| FacePattern::Bisect { edge }),
            (CellType::Triangle, 2) => split
                .iter()
                .position(|&s| !s)
                .map(|unsplit| FacePattern::TwoEdges { unsplit }),
            (CellType::Quadrilateral, 2) if split[0] && split[2] => {
                Some(FacePattern::QuadPair { first: 0 })
            }
            (CellType::Quadrilateral, 2) if split[1] && split[3] => {
                Some(FacePattern::QuadPair { first: 1 })
            }
            _ => Some(FacePattern::Regular),
        }
    }

    /// Local edges that this pattern splits.
    pub(crate) fn split_edges(self, cell_type: CellType) -> SmallVec<[usize; 4]> {
        let n = cell_type.ref_edges().len();
        match self {
            FacePattern::Regular => (0..n).collect(),
            FacePattern::Bisect { edge } => SmallVec::from_slice(&[edge]),
            FacePattern::TwoEdges { unsplit } => {
                SmallVec::from_slice(&[(unsplit + 1) % 3, (unsplit + 2) % 3])
            }
            FacePattern::QuadPair { first } => SmallVec::from_slice(&[first, first + 2]),
        }
    }
}

fn unsupported(elem: GeomObj, reason: &str) -> GridError {
    GridError::UnsupportedRefinement {
        elem,
        reason: reason.to_string(),
    }
}

/// `true` if the edge has a midpoint child.
pub(crate) fn is_split(grid: &MultiGrid, e: EdgeId) -> Result<bool, GridError> {
    Ok(grid.child_vertex(e.into())?.is_some())
}

/// The copy child of an edge that was kept whole by anisotropic refinement.
pub(crate) fn copy_child(grid: &MultiGrid, e: EdgeId) -> Result<Option<EdgeId>, GridError> {
    if is_split(grid, e)? {
        return Ok(None);
    }
    Ok(grid.child_edges(e.into())?.first().copied())
}

/// Creates children through a grid while reporting new vertices.
pub(crate) struct RefineOps<'a> {
    pub(crate) grid: &'a mut MultiGrid,
    callback: Option<&'a mut Box<dyn RefinementCallback>>,
    pub(crate) refined: usize,
}

impl<'a> RefineOps<'a> {
    pub(crate) fn new(
        grid: &'a mut MultiGrid,
        callback: Option<&'a mut Box<dyn RefinementCallback>>,
    ) -> Self {
        Self {
            grid,
            callback,
            refined: 0,
        }
    }

    fn new_vertex(&mut self, parent: GeomObj) -> Result<VertexId, GridError> {
        let v = self.grid.create_vertex(Some(parent))?;
        if let Some(cb) = self.callback.as_deref_mut() {
            cb.new_vertex(self.grid, v, parent)?;
        }
        Ok(v)
    }

    /// The copy of `v` on the next level, created on first use.
    pub(crate) fn vertex_child(&mut self, v: VertexId) -> Result<VertexId, GridError> {
        match self.grid.child_vertex(v.into())? {
            Some(c) => Ok(c),
            None => self.new_vertex(v.into()),
        }
    }

    /// Splits `e` at a new midpoint and returns the midpoint. Already split
    /// edges return their existing midpoint.
    pub(crate) fn split_edge(&mut self, e: EdgeId) -> Result<VertexId, GridError> {
        if let Some(m) = self.grid.child_vertex(e.into())? {
            return Ok(m);
        }
        if self.grid.has_children(e.into())? {
            return Err(unsupported(e.into(), "edge was copied and cannot be split"));
        }
        let [a, b] = self.grid.edge(e)?.vertices();
        let ca = self.vertex_child(a)?;
        let cb = self.vertex_child(b)?;
        let m = self.new_vertex(e.into())?;
        self.grid.create_edge([ca, m], Some(e.into()))?;
        self.grid.create_edge([m, cb], Some(e.into()))?;
        self.refined += 1;
        Ok(m)
    }

    /// Copies an unsplit edge to the next level.
    pub(crate) fn copy_edge(&mut self, e: EdgeId) -> Result<EdgeId, GridError> {
        if is_split(self.grid, e)? {
            return Err(unsupported(e.into(), "split edge cannot be copied"));
        }
        if let Some(c) = copy_child(self.grid, e)? {
            return Ok(c);
        }
        let [a, b] = self.grid.edge(e)?.vertices();
        let ca = self.vertex_child(a)?;
        let cb = self.vertex_child(b)?;
        self.grid.create_edge([ca, cb], Some(e.into()))
    }

    /// Refines a face with the given pattern.
    pub(crate) fn refine_face(&mut self, f: FaceId, pattern: FacePattern) -> Result<(), GridError> {
        if self.grid.has_children(f.into())? {
            return Ok(());
        }
        let rec = self.grid.face(f)?;
        let cell_type = rec.cell_type();
        let vertices: SmallVec<[VertexId; 4]> = SmallVec::from_slice(rec.vertices());
        let edges: SmallVec<[EdgeId; 4]> = SmallVec::from_slice(rec.edges());
        let parent = Some(GeomObj::from(f));

        let splits = pattern.split_edges(cell_type);
        let mut mids: SmallVec<[Option<VertexId>; 4]> = SmallVec::from_elem(None, edges.len());
        for &i in &splits {
            mids[i] = Some(self.split_edge(edges[i])?);
        }
        for (i, &e) in edges.iter().enumerate() {
            if mids[i].is_none() {
                self.copy_edge(e)?;
            }
        }
        let mut corners: SmallVec<[VertexId; 4]> = SmallVec::new();
        for &v in &vertices {
            corners.push(self.vertex_child(v)?);
        }
        let mid = |i: usize| mids[i].ok_or_else(|| unsupported(f.into(), "missing edge midpoint"));

        match (cell_type, pattern) {
            (CellType::Triangle, FacePattern::Regular) => {
                let kids = triangle_subdivision(
                    [corners[0], corners[1], corners[2]],
                    [mid(0)?, mid(1)?, mid(2)?],
                );
                for k in kids {
                    self.grid.create_face(CellType::Triangle, &k, parent)?;
                }
            }
            (CellType::Quadrilateral, FacePattern::Regular) => {
                let mids = [mid(0)?, mid(1)?, mid(2)?, mid(3)?];
                let center = self.new_vertex(f.into())?;
                let kids = quadrilateral_subdivision(
                    [corners[0], corners[1], corners[2], corners[3]],
                    mids,
                    center,
                );
                for k in kids {
                    self.grid.create_face(CellType::Quadrilateral, &k, parent)?;
                }
            }
            (CellType::Triangle, FacePattern::Bisect { edge }) => {
                let kids =
                    triangle_bisection([corners[0], corners[1], corners[2]], edge, mid(edge)?);
                for k in kids {
                    self.grid.create_face(CellType::Triangle, &k, parent)?;
                }
            }
            (CellType::Triangle, FacePattern::TwoEdges { unsplit }) => {
                let p = mid((unsplit + 1) % 3)?;
                let q = mid((unsplit + 2) % 3)?;
                let kids =
                    triangle_two_edge_split([corners[0], corners[1], corners[2]], unsplit, [p, q]);
                for k in kids {
                    self.grid.create_face(CellType::Triangle, &k, parent)?;
                }
            }
            (CellType::Quadrilateral, FacePattern::QuadPair { first }) => {
                let kids = quadrilateral_pair_split(
                    [corners[0], corners[1], corners[2], corners[3]],
                    first,
                    [mid(first)?, mid(first + 2)?],
                );
                for k in kids {
                    self.grid.create_face(CellType::Quadrilateral, &k, parent)?;
                }
            }
            _ => return Err(unsupported(f.into(), "no template for this face pattern")),
        }
        self.refined += 1;
        Ok(())
    }

    /// Center vertex of a regularly refined quadrilateral side.
    fn face_center(&mut self, f: FaceId) -> Result<VertexId, GridError> {
        if !self.grid.has_children(f.into())? {
            self.refine_face(f, FacePattern::Regular)?;
        }
        self.grid
            .child_vertex(f.into())?
            .ok_or_else(|| unsupported(f.into(), "side face is not regularly refined"))
    }

    /// Regular refinement of a volume. All sides are refined first.
    pub(crate) fn refine_volume(&mut self, c: VolumeId) -> Result<(), GridError> {
        if self.grid.has_children(c.into())? {
            return Ok(());
        }
        let rec = self.grid.volume(c)?;
        let cell_type = rec.cell_type();
        let vertices: SmallVec<[VertexId; 8]> = SmallVec::from_slice(rec.vertices());
        let edges: SmallVec<[EdgeId; 12]> = SmallVec::from_slice(rec.edges());
        let faces: SmallVec<[FaceId; 6]> = SmallVec::from_slice(rec.faces());
        let parent = Some(GeomObj::from(c));

        for &f in &faces {
            if !self.grid.has_children(f.into())? {
                self.refine_face(f, FacePattern::Regular)?;
            }
        }
        let mut mids: SmallVec<[VertexId; 12]> = SmallVec::new();
        for &e in &edges {
            mids.push(self.split_edge(e)?);
        }
        let mut corners: SmallVec<[VertexId; 8]> = SmallVec::new();
        for &v in &vertices {
            corners.push(self.vertex_child(v)?);
        }
        let mut children: Vec<(CellType, SmallVec<[VertexId; 8]>)> = Vec::new();

        match cell_type {
            CellType::Tetrahedron => {
                let kids = tetrahedron_subdivision(
                    [corners[0], corners[1], corners[2], corners[3]],
                    [mids[0], mids[1], mids[2], mids[3], mids[4], mids[5]],
                );
                children.extend(
                    kids.iter()
                        .map(|k| (CellType::Tetrahedron, SmallVec::from_slice(k))),
                );
            }
            CellType::Hexahedron => {
                let mut centers = [corners[0]; 6];
                for (i, &f) in faces.iter().enumerate() {
                    centers[i] = self.face_center(f)?;
                }
                let center = self.new_vertex(c.into())?;
                let mut hex_corners = [corners[0]; 8];
                hex_corners.copy_from_slice(&corners[..8]);
                let mut hex_mids = [mids[0]; 12];
                hex_mids.copy_from_slice(&mids[..12]);
                let kids = hexahedron_subdivision(hex_corners, hex_mids, centers, center);
                children.extend(
                    kids.iter()
                        .map(|k| (CellType::Hexahedron, SmallVec::from_slice(k))),
                );
            }
            CellType::Prism => {
                let centers = [
                    self.face_center(faces[2])?,
                    self.face_center(faces[3])?,
                    self.face_center(faces[4])?,
                ];
                let mut prism_corners = [corners[0]; 6];
                prism_corners.copy_from_slice(&corners[..6]);
                let mut prism_mids = [mids[0]; 9];
                prism_mids.copy_from_slice(&mids[..9]);
                let kids = prism_subdivision(prism_corners, prism_mids, centers);
                children.extend(
                    kids.iter()
                        .map(|k| (CellType::Prism, SmallVec::from_slice(k))),
                );
            }
            CellType::Pyramid => {
                let base = self.face_center(faces[0])?;
                let mut pyr_corners = [corners[0]; 5];
                pyr_corners.copy_from_slice(&corners[..5]);
                let mut pyr_mids = [mids[0]; 8];
                pyr_mids.copy_from_slice(&mids[..8]);
                let (pyramids, tets) = pyramid_subdivision(pyr_corners, pyr_mids, base);
                children.extend(
                    pyramids
                        .iter()
                        .map(|k| (CellType::Pyramid, SmallVec::from_slice(k))),
                );
                children.extend(
                    tets.iter()
                        .map(|k| (CellType::Tetrahedron, SmallVec::from_slice(k))),
                );
            }
            _ => return Err(unsupported(c.into(), "not a volume cell type")),
        }
        for (ct, verts) in children {
            self.grid.create_volume(ct, &verts, parent)?;
        }
        self.refined += 1;
        Ok(())
    }
}

/// Children of `obj` that a constraining `obj` constrains, with the local
/// coordinates used for hanging vertices.
fn constrained_children(
    grid: &MultiGrid,
    obj: GeomObj,
) -> Result<Vec<(GeomObj, [f64; 2])>, GridError> {
    let local = match obj.kind() {
        ElemKind::Edge => [0.5, 0.0],
        _ => [0.5, 0.5],
    };
    Ok(grid
        .children(obj)?
        .iter()
        .map(|&c| (c, if c.kind() == ElemKind::Vertex { local } else { [0.0; 2] }))
        .collect())
}

fn needs_constraining(grid: &MultiGrid, obj: GeomObj, top: ElemKind) -> Result<bool, GridError> {
    let split = match obj {
        GeomObj::Edge(e) => is_split(grid, e)?,
        GeomObj::Face(f) => grid.child_faces(f.into())?.len() > 1,
        _ => false,
    };
    if !split {
        return Ok(false);
    }
    for n in grid.associated(obj, top)? {
        if !grid.has_children(n)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Recomputes which sides are constraining.
///
/// A split edge (or a split face of a volume grid) is constraining while at
/// least one adjacent element of the top dimension is still a leaf; its
/// children are then constrained by it. All other sides are released.
pub(crate) fn update_constraints(grid: &mut MultiGrid) -> Result<(), GridError> {
    let Some(top) = grid.top_kind() else {
        return Ok(());
    };
    if top < ElemKind::Face {
        return Ok(());
    }
    let mut candidates: Vec<GeomObj> = grid.objects_of_kind(ElemKind::Edge, ElemFilter::all());
    if top == ElemKind::Volume {
        candidates.extend(grid.objects_of_kind(ElemKind::Face, ElemFilter::all()));
    }

    let mut wanted = BTreeSet::new();
    for &obj in &candidates {
        if needs_constraining(grid, obj, top)? {
            wanted.insert(obj);
        }
    }
    for &obj in &candidates {
        if grid.is_constraining(obj) && !wanted.contains(&obj) {
            grid.make_unconstrained(obj)?;
        }
    }
    for &obj in &wanted {
        if grid.constraining_object(obj)?.is_some() || grid.is_constrained(obj) {
            log::warn!("{obj} is constrained and split; releasing its constraint");
        }
        grid.make_constraining(obj)?;
        grid.clear_constrained_objects(obj)?;
        for (child, local) in constrained_children(grid, obj)? {
            if grid.is_constraining(child) {
                log::warn!("{child} constrains other objects and stays unconstrained by {obj}");
                continue;
            }
            grid.make_constrained(child, Some(obj), local)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_from_split_edges() {
        use FacePattern::*;
        let tri = CellType::Triangle;
        let quad = CellType::Quadrilateral;
        assert_eq!(FacePattern::from_split_edges(tri, &[false; 3]), None);
        assert_eq!(
            FacePattern::from_split_edges(tri, &[false, true, false]),
            Some(Bisect { edge: 1 })
        );
        assert_eq!(
            FacePattern::from_split_edges(tri, &[true, false, true]),
            Some(TwoEdges { unsplit: 1 })
        );
        assert_eq!(FacePattern::from_split_edges(tri, &[true; 3]), Some(Regular));
        assert_eq!(
            FacePattern::from_split_edges(quad, &[false, true, false, true]),
            Some(QuadPair { first: 1 })
        );
        assert_eq!(
            FacePattern::from_split_edges(quad, &[true, true, false, false]),
            Some(Regular)
        );
        assert_eq!(
            FacePattern::from_split_edges(quad, &[true, false, false, false]),
            Some(Regular)
        );
        assert_eq!(
            QuadPair { first: 1 }.split_edges(quad).as_slice(),
            &[1, 3]
        );
    }
}

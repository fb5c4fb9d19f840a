//! Adaptive refinement with hanging nodes.
//!
//! Marked elements are refined without forcing their neighbours to follow.
//! The closure only adds what the templates and the 2:1 rule require:
//! - refined volumes refine all their faces regularly and split all edges,
//! - regularly refined faces split all their edges,
//! - anisotropically marked faces pick a template from their split edges
//!   (quadrilateral patterns without a template become regular),
//! - an element whose side or corner hangs on a coarser constraining element
//!   forces the unrefined neighbours of that element to refine regularly.
//!
//! An edge that an earlier anisotropic step only copied can still be split:
//! the adjacent anisotropically refined faces are un-refined and refined
//! again with the combined pattern, provided their children are leaves.
//! All of this is checked before the grid is touched.

use super::ops::{FacePattern, RefineOps, copy_child, is_split, update_constraints};
use super::{
    RefineReport, Refiner, RefinerCore, RefinerState, RefinementMark, element_counts,
};
use crate::debug_invariants;
use crate::mesh_error::GridError;
use crate::topology::grid::MultiGrid;
use crate::topology::point::{EdgeId, ElemKind, FaceId, GeomObj, VertexId, VolumeId};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Refiner producing non-conforming grids with constrained (hanging) objects.
#[derive(Debug)]
pub struct HangingNodeRefiner {
    core: RefinerCore,
}

impl HangingNodeRefiner {
    /// Creates a refiner bound to `grid`.
    pub fn new(grid: &MultiGrid) -> Self {
        Self {
            core: RefinerCore::new(grid),
        }
    }
}

fn unsupported(elem: GeomObj, reason: &str) -> GridError {
    GridError::UnsupportedRefinement {
        elem,
        reason: reason.to_string(),
    }
}

/// Pattern an already refined face was split with.
fn current_pattern(grid: &MultiGrid, f: FaceId) -> Result<Option<FacePattern>, GridError> {
    if !grid.has_children(f.into())? {
        return Ok(None);
    }
    let rec = grid.face(f)?;
    let mut split: SmallVec<[bool; 4]> = SmallVec::new();
    for &e in rec.edges() {
        split.push(is_split(grid, e)?);
    }
    Ok(FacePattern::from_split_edges(rec.cell_type(), &split))
}

/// Everything a refine step will create.
#[derive(Debug, Default)]
struct Closure {
    copies: BTreeSet<VertexId>,
    edges: BTreeSet<EdgeId>,
    faces: BTreeMap<FaceId, FacePattern>,
    anisotropic: BTreeSet<FaceId>,
    volumes: BTreeSet<VolumeId>,
}

impl Closure {
    fn will_split(&self, grid: &MultiGrid, e: EdgeId) -> Result<bool, GridError> {
        Ok(self.edges.contains(&e) || is_split(grid, e)?)
    }

    fn require_split(&mut self, grid: &MultiGrid, e: EdgeId) -> Result<bool, GridError> {
        if is_split(grid, e)? {
            return Ok(false);
        }
        Ok(self.edges.insert(e))
    }

    /// Records `pattern` for `f`. Regular is never downgraded.
    fn set_face_pattern(
        &mut self,
        grid: &MultiGrid,
        f: FaceId,
        pattern: FacePattern,
    ) -> Result<bool, GridError> {
        let old = self.faces.get(&f).copied();
        if old == Some(FacePattern::Regular) || old == Some(pattern) {
            return Ok(false);
        }
        if current_pattern(grid, f)? == Some(pattern) {
            return Ok(self.faces.remove(&f).is_some());
        }
        self.faces.insert(f, pattern);
        Ok(true)
    }

    fn require_regular(&mut self, grid: &MultiGrid, obj: GeomObj) -> Result<bool, GridError> {
        match obj {
            GeomObj::Vertex(v) => Ok(self.copies.insert(v)),
            GeomObj::Edge(e) => self.require_split(grid, e),
            GeomObj::Face(f) => self.set_face_pattern(grid, f, FacePattern::Regular),
            GeomObj::Volume(c) => Ok(self.volumes.insert(c)),
        }
    }

    fn scheduled(&self) -> Vec<GeomObj> {
        self.edges
            .iter()
            .map(|&e| GeomObj::from(e))
            .chain(self.faces.keys().map(|&f| GeomObj::from(f)))
            .chain(self.volumes.iter().map(|&c| GeomObj::from(c)))
            .collect()
    }

    fn from_marks(
        grid: &MultiGrid,
        marks: &BTreeMap<GeomObj, RefinementMark>,
    ) -> Result<Self, GridError> {
        let mut closure = Closure::default();
        for (&obj, &mark) in marks {
            if !mark.is_refinement() {
                continue;
            }
            let copied_edge = match obj {
                GeomObj::Edge(e) => copy_child(grid, e)?.is_some(),
                _ => false,
            };
            if grid.has_children(obj)? && !copied_edge {
                log::debug!("{obj} already has children; mark ignored");
                continue;
            }
            match obj {
                GeomObj::Vertex(v) => {
                    closure.copies.insert(v);
                }
                GeomObj::Edge(e) => {
                    closure.require_split(grid, e)?;
                }
                GeomObj::Face(f) if mark == RefinementMark::Regular => {
                    closure.set_face_pattern(grid, f, FacePattern::Regular)?;
                }
                GeomObj::Face(f) => {
                    closure.anisotropic.insert(f);
                }
                GeomObj::Volume(c) => {
                    if mark == RefinementMark::Anisotropic {
                        log::debug!("{obj}: anisotropic volume refinement falls back to regular");
                    }
                    closure.volumes.insert(c);
                }
            }
        }
        Ok(closure)
    }

    /// One sweep over all closure rules; returns `true` if anything was added.
    fn sweep(&mut self, grid: &MultiGrid) -> Result<bool, GridError> {
        let mut changed = false;

        for c in self.volumes.clone() {
            let rec = grid.volume(c)?;
            for &f in rec.faces() {
                changed |= self.set_face_pattern(grid, f, FacePattern::Regular)?;
            }
            for &e in rec.edges() {
                changed |= self.require_split(grid, e)?;
            }
        }

        let regular: Vec<FaceId> = self
            .faces
            .iter()
            .filter(|&(_, p)| *p == FacePattern::Regular)
            .map(|(&f, _)| f)
            .collect();
        for f in regular {
            for &e in grid.face(f)?.edges() {
                changed |= self.require_split(grid, e)?;
            }
        }

        for f in self.anisotropic.clone() {
            let rec = grid.face(f)?;
            let mut split: SmallVec<[bool; 4]> = SmallVec::new();
            for &e in rec.edges() {
                split.push(self.will_split(grid, e)?);
            }
            if let Some(p) = FacePattern::from_split_edges(rec.cell_type(), &split) {
                changed |= self.set_face_pattern(grid, f, p)?;
            }
        }

        // faces that copied an edge we now split are refined again
        for e in self.edges.clone() {
            if copy_child(grid, e)?.is_none() {
                continue;
            }
            for &f in grid.edge(e)?.faces() {
                if grid.has_children(f.into())? {
                    changed |= self.anisotropic.insert(f);
                }
            }
        }

        for x in self.scheduled() {
            let mut objs = grid.sides_of(x)?;
            objs.push(x);
            for s in objs {
                let Some(c) = grid.constraining_object(s)? else {
                    continue;
                };
                for n in grid.top_neighbours(c)? {
                    if !grid.has_children(n)? {
                        changed |= self.require_regular(grid, n)?;
                    }
                }
            }
        }
        Ok(changed)
    }

    /// Faces that must lose their current children before refinement.
    fn promoted(&self, grid: &MultiGrid) -> Result<BTreeSet<FaceId>, GridError> {
        let mut promoted = BTreeSet::new();
        for &f in self.faces.keys() {
            if !grid.has_children(f.into())? {
                continue;
            }
            for &child in grid.children(f.into())? {
                if grid.has_children(child)? {
                    return Err(unsupported(f.into(), "children of the face are refined"));
                }
                if let GeomObj::Face(cf) = child {
                    if !grid.face(cf)?.volumes().is_empty() {
                        return Err(unsupported(f.into(), "children of the face bound volumes"));
                    }
                }
            }
            promoted.insert(f);
        }
        for &e in &self.edges {
            let Some(copy) = copy_child(grid, e)? else {
                continue;
            };
            if grid.has_children(copy.into())? {
                return Err(unsupported(e.into(), "copy of the edge is refined"));
            }
            for &user in grid.edge(copy)?.faces() {
                let parent = grid.parent(user.into())?;
                let released = matches!(parent, Some(GeomObj::Face(p)) if promoted.contains(&p));
                if !released {
                    return Err(unsupported(e.into(), "copy of the edge stays in use"));
                }
            }
        }
        Ok(promoted)
    }
}

fn erase_descending(grid: &mut MultiGrid, mut objs: Vec<GeomObj>) -> Result<(), GridError> {
    objs.sort_by_key(|o| Reverse(o.kind()));
    for o in objs {
        grid.erase(o)?;
    }
    Ok(())
}

fn is_unused(grid: &MultiGrid, obj: GeomObj) -> Result<bool, GridError> {
    if grid.has_children(obj)? {
        return Ok(false);
    }
    Ok(match obj {
        GeomObj::Vertex(v) => grid.vertex(v)?.edges().is_empty(),
        GeomObj::Edge(e) => grid.edge(e)?.faces().is_empty(),
        GeomObj::Face(f) => grid.face(f)?.volumes().is_empty(),
        GeomObj::Volume(_) => true,
    })
}

/// `true` if all top-kind children of `parent` are marked leaves and no
/// grandchild exists below the parent or its edges and faces.
fn is_coarsenable(
    grid: &MultiGrid,
    parent: GeomObj,
    marked: &BTreeSet<GeomObj>,
) -> Result<bool, GridError> {
    for &c in grid.children(parent)? {
        if grid.has_children(c)? {
            return Ok(false);
        }
        if c.kind() == parent.kind() && !marked.contains(&c) {
            return Ok(false);
        }
    }
    for side in grid.sides_of(parent)? {
        if side.kind() == ElemKind::Vertex {
            continue;
        }
        for &sc in grid.children(side)? {
            if grid.has_children(sc)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn coarsen_family(grid: &mut MultiGrid, parent: GeomObj) -> Result<(), GridError> {
    erase_descending(grid, grid.children(parent)?.to_vec())?;
    let mut sides = grid.sides_of(parent)?;
    sides.sort_by_key(|s| Reverse(s.kind()));
    for side in sides {
        let mut kids = grid.children(side)?.to_vec();
        kids.sort_by_key(|k| Reverse(k.kind()));
        for k in kids {
            if is_unused(grid, k)? {
                grid.erase(k)?;
            }
        }
    }
    Ok(())
}

impl Refiner for HangingNodeRefiner {
    fn core(&self) -> &RefinerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RefinerCore {
        &mut self.core
    }

    fn coarsening_supported(&self) -> bool {
        true
    }

    fn refine(&mut self, grid: &mut MultiGrid) -> Result<RefineReport, GridError> {
        self.core.check_grid(grid)?;
        let mut closure = Closure::from_marks(grid, &self.core.marks)?;
        let mut sweeps = 0usize;
        while closure.sweep(grid)? {
            sweeps += 1;
        }
        let promoted = closure.promoted(grid)?;
        self.core.state = RefinerState::ClosureComputed;
        log::debug!(
            "closure after {sweeps} sweeps: {} edges, {} faces ({} re-refined), {} volumes",
            closure.edges.len(),
            closure.faces.len(),
            promoted.len(),
            closure.volumes.len()
        );

        self.core.state = RefinerState::Refining;
        let counts = element_counts(grid);
        for &f in &promoted {
            erase_descending(grid, grid.children(f.into())?.to_vec())?;
        }
        for &e in &closure.edges {
            if let Some(copy) = copy_child(grid, e)? {
                grid.erase(copy.into())?;
            }
        }

        let mut todo: Vec<(usize, GeomObj)> = Vec::new();
        for &v in &closure.copies {
            todo.push((grid.level(v.into())?, v.into()));
        }
        for obj in closure.scheduled() {
            todo.push((grid.level(obj)?, obj));
        }
        todo.sort_unstable();

        let mut ops = RefineOps::new(grid, self.core.callback.as_mut());
        for (_, obj) in todo {
            match obj {
                GeomObj::Vertex(v) => {
                    ops.vertex_child(v)?;
                }
                GeomObj::Edge(e) => {
                    ops.split_edge(e)?;
                }
                GeomObj::Face(f) => {
                    let pattern = closure
                        .faces
                        .get(&f)
                        .copied()
                        .unwrap_or(FacePattern::Regular);
                    ops.refine_face(f, pattern)?;
                }
                GeomObj::Volume(c) => ops.refine_volume(c)?,
            }
        }
        let refined = ops.refined;
        update_constraints(grid)?;
        let report = RefineReport::since(grid, counts, refined);
        self.core.finish();
        debug_invariants!(grid, "hanging node refine");
        Ok(report)
    }

    fn coarsen(&mut self, grid: &mut MultiGrid) -> Result<usize, GridError> {
        self.core.check_grid(grid)?;
        let Some(top) = grid.top_kind() else {
            self.core.finish();
            return Ok(0);
        };
        self.core.state = RefinerState::Coarsening;
        let marked: BTreeSet<GeomObj> = self
            .core
            .marks
            .iter()
            .filter(|&(o, m)| *m == RefinementMark::Coarsen && o.kind() == top)
            .map(|(&o, _)| o)
            .collect();
        let mut parents = BTreeSet::new();
        for &obj in &marked {
            if let Some(p) = grid.parent(obj)? {
                if p.kind() == top {
                    parents.insert(p);
                }
            }
        }
        let mut families = Vec::new();
        for p in parents {
            if is_coarsenable(grid, p, &marked)? {
                families.push(p);
            } else {
                log::debug!("family of {p} is incomplete or refined further; kept");
            }
        }
        for &p in &families {
            coarsen_family(grid, p)?;
        }
        update_constraints(grid)?;
        self.core.finish();
        log::debug!("coarsened {} families", families.len());
        debug_invariants!(grid, "hanging node coarsen");
        Ok(families.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::cell_type::CellType;
    use crate::topology::iter::ElemFilter;
    use crate::topology::validation::{ValidationOptions, validate_grid};

    /// Two triangles `(a, b, c)` and `(a, b, d)` sharing edge `ab`.
    fn two_triangles() -> (MultiGrid, [VertexId; 4], FaceId, FaceId) {
        let mut grid = MultiGrid::new();
        let v: Vec<VertexId> = (0..4).map(|_| grid.create_vertex(None).unwrap()).collect();
        let t0 = grid
            .create_face(CellType::Triangle, &[v[0], v[1], v[2]], None)
            .unwrap();
        let t1 = grid
            .create_face(CellType::Triangle, &[v[0], v[1], v[3]], None)
            .unwrap();
        (grid, [v[0], v[1], v[2], v[3]], t0, t1)
    }

    fn refine(
        grid: &mut MultiGrid,
        marks: &[(GeomObj, RefinementMark)],
    ) -> Result<RefineReport, GridError> {
        let mut refiner = HangingNodeRefiner::new(grid);
        for &(obj, mark) in marks {
            refiner.mark(grid, obj, mark).unwrap();
        }
        refiner.refine(grid)
    }

    #[test]
    fn refining_one_triangle_leaves_a_hanging_node() {
        let (mut grid, [a, b, ..], t0, _) = two_triangles();
        refine(&mut grid, &[(t0.into(), RefinementMark::Regular)]).unwrap();
        let ab = grid.find_edge(a, b).unwrap();
        let m = grid.child_vertex(ab.into()).unwrap().unwrap();
        assert!(grid.is_constraining(ab.into()));
        assert_eq!(grid.constraining_object(m.into()).unwrap(), Some(ab.into()));
        assert_eq!(grid.constrained_objects(ab.into()).unwrap().len(), 3);
        assert_eq!(grid.num_on_level::<FaceId>(1), 4);
        validate_grid(&grid, ValidationOptions::all()).unwrap();
    }

    #[test]
    fn refining_the_neighbour_releases_the_constraint() {
        let (mut grid, [a, b, ..], t0, t1) = two_triangles();
        refine(&mut grid, &[(t0.into(), RefinementMark::Regular)]).unwrap();
        refine(&mut grid, &[(t1.into(), RefinementMark::Regular)]).unwrap();
        let ab = grid.find_edge(a, b).unwrap();
        let m = grid.child_vertex(ab.into()).unwrap().unwrap();
        assert!(!grid.is_constraining(ab.into()));
        assert!(!grid.is_constrained(m.into()));
        assert_eq!(grid.num_on_level::<FaceId>(1), 8);
        validate_grid(&grid, ValidationOptions::all()).unwrap();
    }

    #[test]
    fn two_to_one_rule_refines_the_coarse_neighbour() {
        let mut grid = MultiGrid::new();
        let p: Vec<VertexId> = (0..6).map(|_| grid.create_vertex(None).unwrap()).collect();
        let q0 = grid
            .create_face(CellType::Quadrilateral, &[p[0], p[1], p[4], p[3]], None)
            .unwrap();
        let q1 = grid
            .create_face(CellType::Quadrilateral, &[p[1], p[2], p[5], p[4]], None)
            .unwrap();
        refine(&mut grid, &[(q0.into(), RefinementMark::Regular)]).unwrap();
        assert!(!grid.has_children(q1.into()).unwrap());

        let shared = grid.find_edge(p[1], p[4]).unwrap();
        let hanging = grid.child_vertex(shared.into()).unwrap().unwrap();
        let fine = grid
            .child_faces(q0.into())
            .unwrap()
            .into_iter()
            .find(|&f| grid.face(f).unwrap().vertices().contains(&hanging))
            .unwrap();
        refine(&mut grid, &[(fine.into(), RefinementMark::Regular)]).unwrap();

        assert!(grid.has_children(q1.into()).unwrap());
        assert!(grid.has_children(fine.into()).unwrap());
        assert_eq!(grid.num_levels(), 3);
        validate_grid(&grid, ValidationOptions::all()).unwrap();
    }

    #[test]
    fn anisotropic_triangle_is_bisected() {
        let (mut grid, [_, b, c, _], t0, _) = two_triangles();
        let bc = grid.find_edge(b, c).unwrap();
        refine(
            &mut grid,
            &[
                (t0.into(), RefinementMark::Anisotropic),
                (bc.into(), RefinementMark::Regular),
            ],
        )
        .unwrap();
        assert_eq!(grid.child_faces(t0.into()).unwrap().len(), 2);
        // midpoint and two halves
        assert_eq!(grid.children(bc.into()).unwrap().len(), 3);
        validate_grid(&grid, ValidationOptions::all()).unwrap();
    }

    #[test]
    fn copied_edge_is_split_by_re_refining_the_face() {
        let (mut grid, [a, b, c, _], t0, t1) = two_triangles();
        let bc = grid.find_edge(b, c).unwrap();
        refine(
            &mut grid,
            &[
                (t0.into(), RefinementMark::Anisotropic),
                (bc.into(), RefinementMark::Regular),
            ],
        )
        .unwrap();
        let ab = grid.find_edge(a, b).unwrap();
        assert!(copy_child(&grid, ab).unwrap().is_some());

        refine(&mut grid, &[(t1.into(), RefinementMark::Regular)]).unwrap();
        assert!(is_split(&grid, ab).unwrap());
        assert_eq!(
            current_pattern(&grid, t0).unwrap(),
            Some(FacePattern::TwoEdges { unsplit: 2 })
        );
        assert_eq!(grid.child_faces(t0.into()).unwrap().len(), 3);
        validate_grid(&grid, ValidationOptions::all()).unwrap();
    }

    #[test]
    fn unsupported_closure_leaves_the_grid_untouched() {
        let (mut grid, [a, b, c, _], t0, t1) = two_triangles();
        let bc = grid.find_edge(b, c).unwrap();
        refine(
            &mut grid,
            &[
                (t0.into(), RefinementMark::Anisotropic),
                (bc.into(), RefinementMark::Regular),
            ],
        )
        .unwrap();
        let ab = grid.find_edge(a, b).unwrap();
        let copy = copy_child(&grid, ab).unwrap().unwrap();
        let user = grid.edge(copy).unwrap().faces()[0];
        refine(&mut grid, &[(user.into(), RefinementMark::Regular)]).unwrap();

        let before = grid.num_elements();
        let err = refine(&mut grid, &[(t1.into(), RefinementMark::Regular)]).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedRefinement { .. }));
        assert_eq!(grid.num_elements(), before);
    }

    #[test]
    fn coarsening_restores_the_coarse_grid() {
        let (mut grid, [a, b, ..], t0, _) = two_triangles();
        let before = grid.num_elements();
        refine(&mut grid, &[(t0.into(), RefinementMark::Regular)]).unwrap();

        let mut refiner = HangingNodeRefiner::new(&grid);
        for f in grid.child_faces(t0.into()).unwrap() {
            refiner.mark(&grid, f.into(), RefinementMark::Coarsen).unwrap();
        }
        assert_eq!(refiner.coarsen(&mut grid).unwrap(), 1);
        assert_eq!(grid.num_elements(), before);
        assert_eq!(grid.num_levels(), 1);
        assert!(!grid.is_constraining(grid.find_edge(a, b).unwrap().into()));
        assert_eq!(refiner.num_marked(), 0);
    }

    #[test]
    fn incomplete_family_is_not_coarsened() {
        let (mut grid, _, t0, _) = two_triangles();
        refine(&mut grid, &[(t0.into(), RefinementMark::Regular)]).unwrap();
        let mut refiner = HangingNodeRefiner::new(&grid);
        let first = grid.child_faces(t0.into()).unwrap()[0];
        refiner.mark(&grid, first.into(), RefinementMark::Coarsen).unwrap();
        assert_eq!(refiner.coarsen(&mut grid).unwrap(), 0);
        assert_eq!(grid.num_on_level::<FaceId>(1), 4);
        let leaves = grid.iter::<FaceId>(ElemFilter::leaves()).count();
        assert_eq!(leaves, 5);
    }
}

//! Geometric marking strategies for refiners.
//!
//! Every function checks that the refiner is bound to the domain's grid
//! before recording anything.

use super::{Refiner, RefinementMark};
use crate::data::domain::{Domain, Position, distance, position_from};
use crate::mesh_error::GridError;
use crate::topology::iter::ElemFilter;
use crate::topology::point::{EdgeId, ElemKind, FaceId, GeomObj, VertexId};
use std::collections::{HashSet, VecDeque};

/// Data handed to marking callbacks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementSample {
    pub elem: GeomObj,
    pub center: Position,
    pub level: usize,
    pub subset: i32,
}

fn check_binding(refiner: &dyn Refiner, domain: &Domain) -> Result<(), GridError> {
    refiner.core().check_grid(domain.grid())
}

/// Marks every element of the grid for regular refinement. Elements with
/// children are skipped by the refiners.
pub fn mark_all(refiner: &mut dyn Refiner, domain: &Domain) -> Result<usize, GridError> {
    check_binding(refiner, domain)?;
    let grid = domain.grid();
    let mut n = 0;
    for obj in grid.objects(ElemFilter::leaves()) {
        refiner.mark(grid, obj, RefinementMark::Regular)?;
        n += 1;
    }
    Ok(n)
}

fn mark_associated(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    v: VertexId,
) -> Result<(), GridError> {
    let grid = domain.grid();
    for kind in [ElemKind::Edge, ElemKind::Face, ElemKind::Volume] {
        for obj in grid.associated(v.into(), kind)? {
            refiner.mark(grid, obj, RefinementMark::Regular)?;
        }
    }
    Ok(())
}

/// Marks all edges, faces and volumes touching a vertex inside the sphere.
pub fn mark_vertices_in_sphere(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    center: &[f64],
    radius: f64,
) -> Result<(), GridError> {
    check_binding(refiner, domain)?;
    let center = position_from(center);
    let inside: Vec<VertexId> = domain
        .grid()
        .all::<VertexId>()
        .filter(|&v| domain.position_of(v).is_ok_and(|p| distance(&p, &center) <= radius))
        .collect();
    for v in inside {
        mark_associated(refiner, domain, v)?;
    }
    Ok(())
}

/// Marks the elements of `kind` whose corners all lie inside the sphere.
pub fn mark_elements_in_sphere(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    kind: ElemKind,
    center: &[f64],
    radius: f64,
) -> Result<usize, GridError> {
    check_binding(refiner, domain)?;
    let grid = domain.grid();
    let center = position_from(center);
    let mut n = 0;
    for obj in grid.objects_of_kind(kind, ElemFilter::all()) {
        let mut inside = true;
        for v in grid.vertices_of(obj)? {
            if distance(&domain.position_of(v)?, &center) > radius {
                inside = false;
                break;
            }
        }
        if inside {
            refiner.mark(grid, obj, RefinementMark::Regular)?;
            n += 1;
        }
    }
    Ok(n)
}

/// Marks all elements touching a vertex inside the axis-aligned box
/// `[min, max]` (bounds inclusive, compared in the domain's dimension).
pub fn mark_vertices_in_cube(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    min: &[f64],
    max: &[f64],
) -> Result<(), GridError> {
    check_binding(refiner, domain)?;
    let (min, max) = (position_from(min), position_from(max));
    let dim = domain.dim();
    let mut inside = Vec::new();
    for v in domain.grid().all::<VertexId>() {
        let p = domain.position_of(v)?;
        if (0..dim).all(|d| min[d] <= p[d] && p[d] <= max[d]) {
            inside.push(v);
        }
    }
    for v in inside {
        mark_associated(refiner, domain, v)?;
    }
    Ok(())
}

fn leaf_samples(domain: &Domain) -> Result<Vec<ElementSample>, GridError> {
    let grid = domain.grid();
    let Some(top) = grid.top_kind() else {
        return Ok(Vec::new());
    };
    let mut samples = Vec::new();
    for elem in grid.objects_of_kind(top, ElemFilter::leaves()) {
        samples.push(ElementSample {
            elem,
            center: domain.center(elem)?,
            level: grid.level(elem)?,
            subset: grid.subset(elem)?,
        });
    }
    Ok(samples)
}

/// Marks leaves of the top dimension below `max_level` for which `callback`
/// returns `true`.
pub fn mark_by_callback<F>(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    max_level: usize,
    mut callback: F,
) -> Result<usize, GridError>
where
    F: FnMut(&ElementSample) -> bool,
{
    check_binding(refiner, domain)?;
    let mut n = 0;
    for s in leaf_samples(domain)? {
        if s.level < max_level && callback(&s) {
            refiner.mark(domain.grid(), s.elem, RefinementMark::Regular)?;
            n += 1;
        }
    }
    Ok(n)
}

/// Marks leaves of the top dimension for coarsening where `callback`
/// returns `true`. Refiners without coarsening support mark nothing.
pub fn mark_for_coarsen_by_callback<F>(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    mut callback: F,
) -> Result<usize, GridError>
where
    F: FnMut(&ElementSample) -> bool,
{
    check_binding(refiner, domain)?;
    if !refiner.coarsening_supported() {
        log::warn!("refiner does not support coarsening; no elements marked");
        return Ok(0);
    }
    let mut n = 0;
    for s in leaf_samples(domain)? {
        if callback(&s) {
            refiner.mark(domain.grid(), s.elem, RefinementMark::Coarsen)?;
            n += 1;
        }
    }
    Ok(n)
}

/// Edge lengths of a face and the length of its shortest edge.
fn edge_lengths(domain: &Domain, f: FaceId) -> Result<(Vec<(EdgeId, f64)>, f64), GridError> {
    let rec = domain.grid().face(f)?;
    let mut lengths = Vec::with_capacity(rec.edges().len());
    for &e in rec.edges() {
        lengths.push((e, domain.edge_length(e)?));
    }
    let min = lengths
        .iter()
        .map(|&(_, l)| l)
        .min_by(f64::total_cmp)
        .ok_or(GridError::MissingSide {
            elem: f.into(),
            kind: ElemKind::Edge,
        })?;
    Ok((lengths, min))
}

/// Marks the long edges of an anisotropic face.
///
/// Edge `e` is selected iff `min_len / len(e) <= size_ratio`; zero-length
/// edges are ignored. If any edge is selected, the face is marked
/// anisotropic and its associated volumes as well. Returns `true` if the
/// face was marked.
pub fn mark_if_anisotropic(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    f: FaceId,
    size_ratio: f64,
) -> Result<bool, GridError> {
    check_binding(refiner, domain)?;
    let grid = domain.grid();
    let (lengths, min) = edge_lengths(domain, f)?;
    let mut marked = false;
    for (e, len) in lengths {
        if len > 0.0 && min / len <= size_ratio {
            refiner.mark(grid, e.into(), RefinementMark::Regular)?;
            marked = true;
        }
    }
    if marked {
        refiner.mark(grid, f.into(), RefinementMark::Anisotropic)?;
        for c in grid.associated_volumes(f.into())? {
            refiner.mark(grid, c.into(), RefinementMark::Anisotropic)?;
        }
    }
    Ok(marked)
}

/// Marks the long edges of all anisotropic leaf faces and the faces
/// themselves as anisotropic.
///
/// Afterwards every anisotropic face on which both a long and a short edge
/// ended up selected gets all of its edges marked; anisotropic neighbours
/// across newly marked edges are revisited until nothing changes. Volumes
/// are not considered. Returns the number of faces marked anisotropic.
pub fn mark_anisotropic_elements(
    refiner: &mut dyn Refiner,
    domain: &Domain,
    size_ratio: f64,
) -> Result<usize, GridError> {
    check_binding(refiner, domain)?;
    let grid = domain.grid();
    let leaves: Vec<FaceId> = grid.iter::<FaceId>(ElemFilter::leaves()).collect();

    let mut anisotropic = 0;
    for &f in &leaves {
        let (lengths, min) = edge_lengths(domain, f)?;
        let mut marked = false;
        for (e, len) in lengths {
            if len > 0.0 && min / len <= size_ratio {
                refiner.mark(grid, e.into(), RefinementMark::Regular)?;
                marked = true;
            }
        }
        if marked {
            refiner.mark(grid, f.into(), RefinementMark::Anisotropic)?;
            anisotropic += 1;
        }
    }

    let mut queue: VecDeque<FaceId> = leaves.iter().copied().collect();
    let mut queued: HashSet<FaceId> = leaves.iter().copied().collect();
    while let Some(f) = queue.pop_front() {
        queued.remove(&f);
        if refiner.get_mark(f.into()) != RefinementMark::Anisotropic {
            continue;
        }
        let (lengths, min) = edge_lengths(domain, f)?;
        let (mut long, mut short) = (false, false);
        for &(e, len) in &lengths {
            if refiner.get_mark(e.into()) == RefinementMark::None || len <= 0.0 {
                continue;
            }
            if min / len <= size_ratio {
                long = true;
            } else {
                short = true;
            }
        }
        if !(long && short) {
            continue;
        }
        for &(e, _) in &lengths {
            if refiner.get_mark(e.into()) != RefinementMark::None {
                continue;
            }
            refiner.mark(grid, e.into(), RefinementMark::Regular)?;
            for &nbr in grid.edge(e)?.faces() {
                if !queued.contains(&nbr)
                    && refiner.get_mark(nbr.into()) == RefinementMark::Anisotropic
                {
                    queued.insert(nbr);
                    queue.push_back(nbr);
                }
            }
        }
    }
    log::debug!("{anisotropic} anisotropic faces marked (size ratio {size_ratio})");
    Ok(anisotropic)
}

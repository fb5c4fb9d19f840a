//! Adaptive and global refinement of a [`MultiGrid`].
//!
//! A refiner collects marks, computes a closure and then creates the
//! children of all elements scheduled for refinement, level by level and in
//! ascending dimension so that side children exist before the elements that
//! reuse them.
//!
//! # Expected invariants
//! - Marks are only recorded for elements of the grid the refiner is bound to;
//!   marking with another grid fails before anything is recorded.
//! - Elements that already have children are never refined a second time;
//!   marks on them are ignored.
//! - New vertices are reported to the [`RefinementCallback`] right after they
//!   are created, before any element using them exists.
//! - Marks are cleared after every `refine` / `coarsen` call.

pub mod global;
pub mod hanging;
pub mod marking;
pub(crate) mod ops;
pub mod projectors;
pub mod templates;

pub use global::GlobalRefiner;
pub use hanging::HangingNodeRefiner;
pub use projectors::{
    CylinderProjector, LinearProjector, LoopSubdivisionRules, ProjectionHandler,
    RefinementCallback, SphereProjector, SubdivisionLoopProjector,
};

use crate::algs::communicator::ProcessContext;
use crate::data::domain::Domain;
use crate::mesh_error::GridError;
use crate::topology::grid::{GridId, MultiGrid};
use crate::topology::point::{EdgeId, FaceId, GeomObj, VertexId, VolumeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Refinement intent recorded for an element.
///
/// Ordered by priority: when an element is marked twice, the higher mark
/// wins (`Regular` over `Anisotropic` over `Coarsen`).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RefinementMark {
    #[default]
    None,
    Coarsen,
    Anisotropic,
    Regular,
}

impl RefinementMark {
    /// Combination of two marks for the same element.
    pub fn merge(self, other: RefinementMark) -> RefinementMark {
        self.max(other)
    }

    /// `true` for marks that request new children.
    pub fn is_refinement(self) -> bool {
        matches!(self, RefinementMark::Regular | RefinementMark::Anisotropic)
    }
}

/// Lifecycle of a refiner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefinerState {
    #[default]
    Idle,
    Marking,
    ClosureComputed,
    Refining,
    Coarsening,
}

/// Element counts created by one `refine` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineReport {
    pub new_vertices: usize,
    pub new_edges: usize,
    pub new_faces: usize,
    pub new_volumes: usize,
    /// Elements that received children.
    pub refined: usize,
}

impl RefineReport {
    pub(crate) fn since(grid: &MultiGrid, counts: [usize; 4], refined: usize) -> Self {
        Self {
            new_vertices: grid.num::<VertexId>().saturating_sub(counts[0]),
            new_edges: grid.num::<EdgeId>().saturating_sub(counts[1]),
            new_faces: grid.num::<FaceId>().saturating_sub(counts[2]),
            new_volumes: grid.num::<VolumeId>().saturating_sub(counts[3]),
            refined,
        }
    }

    pub fn new_elements(&self) -> usize {
        self.new_vertices + self.new_edges + self.new_faces + self.new_volumes
    }
}

pub(crate) fn element_counts(grid: &MultiGrid) -> [usize; 4] {
    [
        grid.num::<VertexId>(),
        grid.num::<EdgeId>(),
        grid.num::<FaceId>(),
        grid.num::<VolumeId>(),
    ]
}

/// State shared by all refiners: grid binding, marks and vertex callback.
pub struct RefinerCore {
    grid: GridId,
    pub(crate) marks: BTreeMap<GeomObj, RefinementMark>,
    pub(crate) state: RefinerState,
    pub(crate) callback: Option<Box<dyn RefinementCallback>>,
    parallel: bool,
}

impl RefinerCore {
    pub fn new(grid: &MultiGrid) -> Self {
        Self {
            grid: grid.id(),
            marks: BTreeMap::new(),
            state: RefinerState::Idle,
            callback: None,
            parallel: false,
        }
    }

    pub(crate) fn check_grid(&self, grid: &MultiGrid) -> Result<(), GridError> {
        if grid.id() == self.grid {
            Ok(())
        } else {
            Err(GridError::RefinerGridMismatch)
        }
    }

    /// Ends a refine/coarsen step.
    pub(crate) fn finish(&mut self) {
        self.marks.clear();
        self.state = RefinerState::Idle;
    }
}

impl std::fmt::Debug for RefinerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinerCore")
            .field("grid", &self.grid)
            .field("marks", &self.marks.len())
            .field("state", &self.state)
            .field("callback", &self.callback.is_some())
            .field("parallel", &self.parallel)
            .finish()
    }
}

/// Common interface of the global and the hanging-node refiner.
pub trait Refiner {
    fn core(&self) -> &RefinerCore;
    fn core_mut(&mut self) -> &mut RefinerCore;

    /// `true` if [`Refiner::coarsen`] is implemented.
    fn coarsening_supported(&self) -> bool;

    /// Executes all refinement marks. Marks are cleared afterwards.
    fn refine(&mut self, grid: &mut MultiGrid) -> Result<RefineReport, GridError>;

    /// Removes all complete families marked for coarsening and returns the
    /// number of removed families.
    fn coarsen(&mut self, grid: &mut MultiGrid) -> Result<usize, GridError>;

    /// Identity of the grid the refiner was created for.
    fn grid_id(&self) -> GridId {
        self.core().grid
    }

    /// Records `mark` for `obj`; marking twice keeps the higher priority mark.
    /// `RefinementMark::None` removes the mark.
    fn mark(
        &mut self,
        grid: &MultiGrid,
        obj: GeomObj,
        mark: RefinementMark,
    ) -> Result<(), GridError> {
        let core = self.core_mut();
        core.check_grid(grid)?;
        if !grid.contains(obj) {
            return Err(GridError::InvalidElement(obj));
        }
        if mark == RefinementMark::None {
            core.marks.remove(&obj);
        } else {
            let entry = core.marks.entry(obj).or_default();
            *entry = entry.merge(mark);
        }
        core.state = RefinerState::Marking;
        Ok(())
    }

    fn get_mark(&self, obj: GeomObj) -> RefinementMark {
        self.core().marks.get(&obj).copied().unwrap_or_default()
    }

    fn clear_marks(&mut self) {
        let core = self.core_mut();
        core.marks.clear();
        core.state = RefinerState::Idle;
    }

    fn num_marked(&self) -> usize {
        self.core().marks.len()
    }

    /// Marked elements in handle order.
    fn marked(&self) -> Vec<(GeomObj, RefinementMark)> {
        self.core().marks.iter().map(|(&o, &m)| (o, m)).collect()
    }

    fn state(&self) -> RefinerState {
        self.core().state
    }

    /// `true` if the refiner was created for a multi-process run.
    ///
    /// The flag is informational: the refiner never communicates and
    /// refines only the local part. In a parallel run the caller exchanges
    /// marks across the process interfaces (see
    /// [`GridLayoutMap`](crate::algs::wire::GridLayoutMap)) before calling
    /// [`Refiner::refine`].
    fn is_parallel(&self) -> bool {
        self.core().parallel
    }

    /// Records whether the refiner is used in a multi-process run. Does not
    /// change how marks are closed or elements refined.
    fn set_parallel(&mut self, parallel: bool) {
        self.core_mut().parallel = parallel;
    }

    /// Installs the callback that places new vertices.
    fn set_callback(&mut self, callback: Box<dyn RefinementCallback>) {
        self.core_mut().callback = Some(callback);
    }
}

/// Global refiner for `domain` with linear vertex placement.
///
/// The refiner is flagged parallel (see [`Refiner::is_parallel`]) when `proc`
/// reports more than one process.
pub fn global_domain_refiner(domain: &Domain, proc: &dyn ProcessContext) -> GlobalRefiner {
    let mut refiner = GlobalRefiner::new(domain.grid());
    refiner.set_callback(Box::new(LinearProjector::new(domain.position())));
    refiner.set_parallel(proc.num_procs() > 1);
    log::debug!(
        "created global refiner (parallel: {}) for {}-d domain",
        refiner.is_parallel(),
        domain.dim()
    );
    refiner
}

/// Hanging-node refiner for an adaptive `domain`, flagged parallel like
/// [`global_domain_refiner`].
///
/// # Errors
/// [`GridError::NonAdaptiveDomain`] if the domain was created without
/// adaptive refinement support.
pub fn hanging_node_domain_refiner(
    domain: &Domain,
    proc: &dyn ProcessContext,
) -> Result<HangingNodeRefiner, GridError> {
    if !domain.is_adaptive() {
        log::error!("{}", GridError::NonAdaptiveDomain);
        return Err(GridError::NonAdaptiveDomain);
    }
    let mut refiner = HangingNodeRefiner::new(domain.grid());
    refiner.set_callback(Box::new(LinearProjector::new(domain.position())));
    refiner.set_parallel(proc.num_procs() > 1);
    log::debug!(
        "created hanging node refiner (parallel: {}) for {}-d domain",
        refiner.is_parallel(),
        domain.dim()
    );
    Ok(refiner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalProcessGroup, SerialProcess};
    use crate::topology::cell_type::CellType;

    #[test]
    fn regular_wins_over_anisotropic() {
        use RefinementMark::*;
        assert_eq!(Anisotropic.merge(Regular), Regular);
        assert_eq!(Regular.merge(Anisotropic), Regular);
        assert_eq!(Coarsen.merge(Anisotropic), Anisotropic);
        assert!(!Coarsen.is_refinement());
    }

    #[test]
    fn marking_a_foreign_grid_fails() {
        let g1 = MultiGrid::new();
        let mut g2 = MultiGrid::new();
        let v = g2.create_vertex(None).unwrap();
        let mut refiner = HangingNodeRefiner::new(&g1);
        assert_eq!(
            refiner.mark(&g2, v.into(), RefinementMark::Regular),
            Err(GridError::RefinerGridMismatch)
        );
        assert_eq!(refiner.num_marked(), 0);
    }

    #[test]
    fn marks_merge_and_clear() {
        let mut grid = MultiGrid::new();
        let v = grid.create_vertex(None).unwrap();
        let mut refiner = GlobalRefiner::new(&grid);
        refiner
            .mark(&grid, v.into(), RefinementMark::Anisotropic)
            .unwrap();
        refiner
            .mark(&grid, v.into(), RefinementMark::Regular)
            .unwrap();
        assert_eq!(refiner.get_mark(v.into()), RefinementMark::Regular);
        assert_eq!(refiner.state(), RefinerState::Marking);
        refiner.mark(&grid, v.into(), RefinementMark::None).unwrap();
        assert_eq!(refiner.num_marked(), 0);
    }

    #[test]
    fn factories_respect_domain_and_process_count() {
        let rigid = Domain::new(2, false);
        assert_eq!(
            hanging_node_domain_refiner(&rigid, &SerialProcess).err(),
            Some(GridError::NonAdaptiveDomain)
        );
        let adaptive = Domain::new(2, true);
        let serial = hanging_node_domain_refiner(&adaptive, &SerialProcess).unwrap();
        assert!(!serial.is_parallel());
        assert!(serial.coarsening_supported());
        let group = LocalProcessGroup::new(4, 1);
        let global = global_domain_refiner(&adaptive, &group);
        assert!(global.is_parallel());
        assert!(!global.coarsening_supported());
    }

    #[test]
    fn parallel_flag_does_not_change_refinement() {
        let build = || {
            let mut dom = Domain::new(2, true);
            let v: Vec<VertexId> = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [2.0, 0.0]]
                .iter()
                .map(|p| dom.create_vertex_at(p).unwrap())
                .collect();
            let q = dom
                .grid_mut()
                .create_face(CellType::Quadrilateral, &v[..4], None)
                .unwrap();
            dom.grid_mut()
                .create_face(CellType::Triangle, &[v[1], v[4], v[2]], None)
                .unwrap();
            (dom, q)
        };
        let mut counts = Vec::new();
        for proc in [LocalProcessGroup::new(1, 0), LocalProcessGroup::new(3, 2)] {
            let (mut dom, q) = build();
            let mut refiner = hanging_node_domain_refiner(&dom, &proc).unwrap();
            assert_eq!(refiner.is_parallel(), proc.num_procs() > 1);
            refiner
                .mark(dom.grid(), q.into(), RefinementMark::Regular)
                .unwrap();
            let report = refiner.refine(dom.grid_mut()).unwrap();
            counts.push((report, dom.grid().num_elements()));
        }
        assert_eq!(counts[0], counts[1]);
    }
}

//! Regular refinement without closure.
//!
//! Every marked leaf is split with its regular template, together with all of
//! its sides. No hanging nodes are tracked, so the result is only conforming
//! when the marked set is (e.g. after [`mark_all`](super::marking::mark_all)).

use super::ops::{FacePattern, RefineOps};
use super::{RefineReport, Refiner, RefinerCore, RefinerState, element_counts};
use crate::debug_invariants;
use crate::mesh_error::GridError;
use crate::topology::grid::MultiGrid;
use crate::topology::point::GeomObj;

/// Refiner that splits all marked elements regularly.
#[derive(Debug)]
pub struct GlobalRefiner {
    core: RefinerCore,
}

impl GlobalRefiner {
    /// Creates a refiner bound to `grid`.
    pub fn new(grid: &MultiGrid) -> Self {
        Self {
            core: RefinerCore::new(grid),
        }
    }

    /// Marked leaves sorted by level and dimension. Marks on refined
    /// elements are dropped.
    fn scheduled(&self, grid: &MultiGrid) -> Result<Vec<GeomObj>, GridError> {
        let mut todo = Vec::new();
        for (&obj, &mark) in &self.core.marks {
            if !mark.is_refinement() {
                continue;
            }
            if grid.has_children(obj)? {
                log::debug!("{obj} already has children; mark ignored");
                continue;
            }
            todo.push((grid.level(obj)?, obj));
        }
        todo.sort_unstable();
        Ok(todo.into_iter().map(|(_, obj)| obj).collect())
    }
}

impl Refiner for GlobalRefiner {
    fn core(&self) -> &RefinerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RefinerCore {
        &mut self.core
    }

    fn coarsening_supported(&self) -> bool {
        false
    }

    fn refine(&mut self, grid: &mut MultiGrid) -> Result<RefineReport, GridError> {
        self.core.check_grid(grid)?;
        let todo = self.scheduled(grid)?;
        self.core.state = RefinerState::Refining;
        let counts = element_counts(grid);
        let mut ops = RefineOps::new(grid, self.core.callback.as_mut());
        for obj in todo {
            match obj {
                GeomObj::Vertex(v) => {
                    ops.vertex_child(v)?;
                }
                GeomObj::Edge(e) => {
                    ops.split_edge(e)?;
                }
                GeomObj::Face(f) => ops.refine_face(f, FacePattern::Regular)?,
                GeomObj::Volume(c) => ops.refine_volume(c)?,
            }
        }
        let refined = ops.refined;
        let report = RefineReport::since(grid, counts, refined);
        self.core.finish();
        log::debug!(
            "global refinement: {} elements refined, {} levels",
            report.refined,
            grid.num_levels()
        );
        debug_invariants!(grid, "global refine");
        Ok(report)
    }

    fn coarsen(&mut self, grid: &mut MultiGrid) -> Result<usize, GridError> {
        self.core.check_grid(grid)?;
        log::warn!("{}", GridError::CoarseningUnsupported);
        self.core.finish();
        Err(GridError::CoarseningUnsupported)
    }
}

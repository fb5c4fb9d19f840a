//! Structural validation of a multigrid.
//!
//! Checks the level invariant, parent/child consistency, corner levels and
//! the constraint graph (kinds, dangling references, bijection of lists and
//! back-references).

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::GridError;
use crate::topology::constraints::may_constrain;
use crate::topology::grid::{ElementStore, MultiGrid};
use crate::topology::iter::ElemFilter;
use crate::topology::point::GeomObj;

/// Optional validation toggles for grid checks.
#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    /// How to handle constraint graph problems.
    pub constraint_handling: InvariantHandling,
    /// Accept elements without parent above level 0. Grids received from
    /// another process may lack the coarse ancestors of their elements.
    pub allow_parentless_levels: bool,
}

impl ValidationOptions {
    /// Enable all checks, failing on the first problem.
    pub fn all() -> Self {
        Self {
            constraint_handling: InvariantHandling::Error,
            allow_parentless_levels: false,
        }
    }
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self::all()
    }
}

/// Behavior for detected problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantHandling {
    /// Skip the check.
    Ignore,
    /// Log a warning per problem and continue.
    Warn,
    /// Return the first problem as an error.
    Error,
}

/// Validate the genealogy and constraint graph of `grid`.
pub fn validate_grid(grid: &ElementStore, options: ValidationOptions) -> Result<(), GridError> {
    for obj in grid.objects(ElemFilter::all()) {
        validate_genealogy(grid, obj, options.allow_parentless_levels)?;
    }
    validate_constraints(grid, options.constraint_handling).map(|_| ())
}

fn validate_genealogy(
    grid: &ElementStore,
    obj: GeomObj,
    allow_parentless: bool,
) -> Result<(), GridError> {
    let info = grid.info(obj)?;
    let level = info.level();
    match info.parent() {
        Some(parent) => {
            let pinfo = grid.info(parent).map_err(|_| GridError::BrokenGenealogy {
                child: obj,
                parent,
            })?;
            if pinfo.level() + 1 != level {
                return Err(GridError::LevelInvariant {
                    elem: obj,
                    level,
                    parent_level: Some(pinfo.level()),
                });
            }
            if pinfo.children().iter().filter(|c| **c == obj).count() != 1 {
                return Err(GridError::BrokenGenealogy { child: obj, parent });
            }
        }
        None if level != 0 && !allow_parentless => {
            return Err(GridError::LevelInvariant {
                elem: obj,
                level,
                parent_level: None,
            });
        }
        None => {}
    }
    for &child in info.children() {
        if grid.parent(child).ok().flatten() != Some(obj) {
            return Err(GridError::BrokenGenealogy { child, parent: obj });
        }
    }
    for v in grid.vertices_of(obj)? {
        let vertex_level = grid.level(v.into())?;
        if vertex_level != level {
            return Err(GridError::LevelMismatch {
                vertex: v.into(),
                vertex_level,
                elem_level: level,
            });
        }
    }
    Ok(())
}

/// Check every constraint link. Returns the number of problems found; with
/// [`InvariantHandling::Error`] the first problem is returned instead.
pub fn validate_constraints(
    grid: &ElementStore,
    handling: InvariantHandling,
) -> Result<usize, GridError> {
    if handling == InvariantHandling::Ignore {
        return Ok(0);
    }
    let mut problems = 0;
    let mut report = |err: GridError| -> Result<(), GridError> {
        match handling {
            InvariantHandling::Error => Err(err),
            _ => {
                log::warn!("constraint check: {err}");
                problems += 1;
                Ok(())
            }
        }
    };

    for obj in grid.objects(ElemFilter::all()) {
        if grid.is_constrained(obj) {
            if let Err(e) = check_constrained(grid, obj) {
                report(e)?;
            }
        }
        if grid.is_constraining(obj) {
            for &child in grid.constrained_objects(obj)? {
                let back = grid.constraining_object(child).ok().flatten();
                if back != Some(obj) {
                    report(GridError::ConstraintNotBijective {
                        constrained: child,
                        constraining: obj,
                    })?;
                }
            }
        }
    }
    Ok(problems)
}

fn check_constrained(grid: &ElementStore, obj: GeomObj) -> Result<(), GridError> {
    let dangling = |constraining| GridError::DanglingConstraint {
        constrained: obj,
        constraining,
    };
    let Some(parent) = grid.constraining_object(obj)? else {
        return Err(dangling(None));
    };
    if !grid.contains(parent) {
        return Err(dangling(Some(parent)));
    }
    if !may_constrain(parent.kind(), obj.kind()) {
        return Err(GridError::ConstraintKindMismatch {
            constraining: parent,
            constrained: obj,
        });
    }
    if !grid.is_constraining(parent) {
        return Err(dangling(Some(parent)));
    }
    let hits = grid
        .constrained_objects(parent)?
        .iter()
        .filter(|c| **c == obj)
        .count();
    if hits != 1 {
        return Err(GridError::ConstraintNotBijective {
            constrained: obj,
            constraining: parent,
        });
    }
    Ok(())
}

impl DebugInvariants for MultiGrid {
    fn validate_invariants(&self) -> Result<(), GridError> {
        validate_grid(
            self,
            ValidationOptions {
                allow_parentless_levels: true,
                ..ValidationOptions::all()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::cell_type::CellType;
    use crate::topology::point::VertexId;

    fn triangle() -> (MultiGrid, Vec<VertexId>) {
        let mut grid = MultiGrid::new();
        let v: Vec<VertexId> = (0..3).map(|_| grid.create_vertex(None).unwrap()).collect();
        grid.create_face(CellType::Triangle, &v, None).unwrap();
        (grid, v)
    }

    #[test]
    fn fresh_grid_is_valid() {
        let (grid, _) = triangle();
        validate_grid(&grid, ValidationOptions::all()).unwrap();
        grid.debug_assert_invariants();
    }

    #[test]
    fn dangling_hanging_vertex_is_reported() {
        let (mut grid, v) = triangle();
        let e = grid.find_edge(v[0], v[1]).unwrap();
        let m = grid.create_vertex(Some(e.into())).unwrap();
        grid.make_constrained(m.into(), None, [0.5, 0.0]).unwrap();
        let err = validate_grid(&grid, ValidationOptions::all()).unwrap_err();
        assert_eq!(
            err,
            GridError::DanglingConstraint {
                constrained: m.into(),
                constraining: None
            }
        );
        let warned = validate_constraints(&grid, InvariantHandling::Warn).unwrap();
        assert_eq!(warned, 1);
        assert_eq!(
            validate_constraints(&grid, InvariantHandling::Ignore).unwrap(),
            0
        );
    }

    #[test]
    fn one_sided_link_breaks_bijection() {
        let (mut grid, v) = triangle();
        let e = grid.find_edge(v[0], v[1]).unwrap();
        let m = grid.create_vertex(Some(e.into())).unwrap();
        grid.add_constrained_object(e.into(), m.into()).unwrap();
        assert!(matches!(
            validate_constraints(&grid, InvariantHandling::Error),
            Err(GridError::ConstraintNotBijective { .. })
        ));
    }

    #[test]
    fn parentless_fine_elements_need_opt_in() {
        let mut grid = MultiGrid::new();
        grid.create_vertex_on_level(2);
        assert!(matches!(
            validate_grid(&grid, ValidationOptions::all()),
            Err(GridError::LevelInvariant { level: 2, .. })
        ));
        validate_grid(
            &grid,
            ValidationOptions {
                allow_parentless_levels: true,
                ..ValidationOptions::all()
            },
        )
        .unwrap();
    }
}

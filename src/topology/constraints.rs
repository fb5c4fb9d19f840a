//! Constraining / constrained relations of non-conforming grids.
//!
//! A constraining edge or face keeps the list of objects it constrains; every
//! constrained object keeps a single back-reference. Edges constrain vertices
//! and edges; faces constrain vertices, edges and faces. Hanging vertices
//! additionally record their local coordinates inside the constraining
//! element.

use crate::mesh_error::GridError;
use crate::topology::element::{Constraint, VertexConstraint};
use crate::topology::grid::{ElementStore, MultiGrid};
use crate::topology::point::{ElemHandle, ElemKind, GeomObj};
use smallvec::SmallVec;

/// `true` if elements of kind `constraining` may constrain `constrained`.
pub fn may_constrain(constraining: ElemKind, constrained: ElemKind) -> bool {
    matches!(
        (constraining, constrained),
        (ElemKind::Edge, ElemKind::Vertex | ElemKind::Edge)
            | (ElemKind::Face, ElemKind::Vertex | ElemKind::Edge | ElemKind::Face)
    )
}

impl ElementStore {
    /// Objects constrained by `obj`; empty if `obj` is not constraining.
    pub fn constrained_objects(&self, obj: GeomObj) -> Result<&[GeomObj], GridError> {
        Ok(match self.constraint(obj)? {
            Some(Constraint::Constraining(list)) => list,
            _ => &[],
        })
    }

    /// The element constraining `obj`, if `obj` is constrained and linked.
    pub fn constraining_object(&self, obj: GeomObj) -> Result<Option<GeomObj>, GridError> {
        Ok(match obj {
            GeomObj::Vertex(v) => match self.vertex(v)?.constraint {
                VertexConstraint::Hanging { constraining, .. } => constraining,
                VertexConstraint::Free => None,
            },
            _ => match self.constraint(obj)? {
                Some(Constraint::Constrained(c)) => *c,
                _ => None,
            },
        })
    }

    /// `true` for hanging vertices and constrained edges/faces.
    pub fn is_constrained(&self, obj: GeomObj) -> bool {
        match obj {
            GeomObj::Vertex(v) => self.vertex(v).is_ok_and(|r| r.is_hanging()),
            _ => matches!(self.constraint(obj), Ok(Some(c)) if c.is_constrained()),
        }
    }

    /// `true` for constraining edges/faces.
    pub fn is_constraining(&self, obj: GeomObj) -> bool {
        matches!(self.constraint(obj), Ok(Some(c)) if c.is_constraining())
    }

    /// Local coordinates of a hanging vertex inside its constraining element.
    pub fn hanging_local_coords(&self, obj: GeomObj) -> Result<Option<[f64; 2]>, GridError> {
        match obj {
            GeomObj::Vertex(v) => Ok(match self.vertex(v)?.constraint {
                VertexConstraint::Hanging { local, .. } => Some(local),
                VertexConstraint::Free => None,
            }),
            _ => self.info(obj).map(|_| None),
        }
    }

    fn constraint_mut(&mut self, obj: GeomObj) -> Result<&mut Constraint, GridError> {
        let rec = match obj {
            GeomObj::Edge(e) => self.edges.get_mut(e).map(|r| &mut r.constraint),
            GeomObj::Face(f) => self.faces.get_mut(f).map(|r| &mut r.constraint),
            _ => None,
        };
        rec.ok_or(GridError::InvalidElement(obj))
    }

    fn remove_from_list(&mut self, constraining: GeomObj, constrained: GeomObj) {
        if let Ok(Constraint::Constraining(list)) = self.constraint_mut(constraining) {
            list.retain(|o| *o != constrained);
        }
    }

    /// Overwrite the back-reference of `obj` without touching any list.
    fn set_back_reference(
        &mut self,
        obj: GeomObj,
        constraining: Option<GeomObj>,
        local: Option<[f64; 2]>,
    ) -> Result<(), GridError> {
        match obj {
            GeomObj::Vertex(v) => {
                let rec = self
                    .vertices
                    .get_mut(v)
                    .ok_or(GridError::InvalidElement(obj))?;
                let local = local.unwrap_or(match rec.constraint {
                    VertexConstraint::Hanging { local, .. } => local,
                    VertexConstraint::Free => [0.0; 2],
                });
                rec.constraint = VertexConstraint::Hanging {
                    constraining,
                    local,
                };
            }
            GeomObj::Edge(_) | GeomObj::Face(_) => {
                let c = self.constraint_mut(obj)?;
                *c = Constraint::Constrained(constraining);
            }
            GeomObj::Volume(_) => {
                return Err(GridError::ConstraintKindMismatch {
                    constraining: constraining.unwrap_or(obj),
                    constrained: obj,
                });
            }
        }
        Ok(())
    }

    fn check_pair(&self, constraining: GeomObj, constrained: GeomObj) -> Result<(), GridError> {
        self.info(constraining)?;
        self.info(constrained)?;
        if !may_constrain(constraining.kind(), constrained.kind()) {
            return Err(GridError::ConstraintKindMismatch {
                constraining,
                constrained,
            });
        }
        if self.is_constraining(constrained) {
            return Err(GridError::ConstraintCycle {
                elem: constrained,
                constraining,
            });
        }
        Ok(())
    }
}

impl MultiGrid {
    /// Turns an edge or face into a constraining element with an empty list.
    /// Already constraining elements keep their list.
    pub fn make_constraining(&mut self, obj: GeomObj) -> Result<(), GridError> {
        if !matches!(obj.kind(), ElemKind::Edge | ElemKind::Face) {
            self.info(obj)?;
            return Err(GridError::ConstraintKindMismatch {
                constraining: obj,
                constrained: obj,
            });
        }
        if let Some(parent) = self.constraining_object(obj)? {
            if self.level(parent)? == self.level(obj)? {
                return Err(GridError::ConstraintCycle {
                    elem: obj,
                    constraining: parent,
                });
            }
            self.make_unconstrained(obj)?;
        } else if self.is_constrained(obj) {
            self.make_unconstrained(obj)?;
        }
        let c = self.store_mut().constraint_mut(obj)?;
        if !c.is_constraining() {
            *c = Constraint::Constraining(SmallVec::new());
        }
        Ok(())
    }

    /// Links `constrained` to `constraining` in both directions. Vertices
    /// store `local` as their position inside the constraining element.
    ///
    /// `constraining == None` marks the object constrained without a partner,
    /// which is only valid transiently (e.g. while a file is being read).
    pub fn make_constrained(
        &mut self,
        constrained: GeomObj,
        constraining: Option<GeomObj>,
        local: [f64; 2],
    ) -> Result<(), GridError> {
        match constraining {
            Some(c) => {
                self.check_pair(c, constrained)?;
                self.set_constraining_object(constrained, Some(c))?;
                self.store_mut()
                    .set_back_reference(constrained, Some(c), Some(local))?;
                self.add_constrained_object(c, constrained)
            }
            None => {
                self.info(constrained)?;
                if self.is_constraining(constrained) {
                    return Err(GridError::DanglingConstraint {
                        constrained,
                        constraining: None,
                    });
                }
                self.detach_from_constraining(constrained)?;
                self.store_mut()
                    .set_back_reference(constrained, None, Some(local))
            }
        }
    }

    /// Adds `constrained` to the list of `constraining`, promoting it to a
    /// constraining element if needed. The back-reference is not touched.
    pub fn add_constrained_object(
        &mut self,
        constraining: GeomObj,
        constrained: GeomObj,
    ) -> Result<(), GridError> {
        self.check_pair(constraining, constrained)?;
        self.make_constraining(constraining)?;
        if let Constraint::Constraining(list) = self.store_mut().constraint_mut(constraining)? {
            if !list.contains(&constrained) {
                list.push(constrained);
            }
        }
        Ok(())
    }

    /// Sets the back-reference of a constrained object, removing it from
    /// the list of its previous constraining element. The new constraining
    /// element's list is not touched.
    pub fn set_constraining_object(
        &mut self,
        constrained: GeomObj,
        constraining: Option<GeomObj>,
    ) -> Result<(), GridError> {
        if let Some(c) = constraining {
            self.check_pair(c, constrained)?;
        }
        self.detach_from_constraining(constrained)?;
        self.store_mut()
            .set_back_reference(constrained, constraining, None)
    }

    fn detach_from_constraining(&mut self, constrained: GeomObj) -> Result<(), GridError> {
        if let Some(old) = self.constraining_object(constrained)? {
            self.store_mut().remove_from_list(old, constrained);
        }
        Ok(())
    }

    /// Releases every object constrained by `constraining`; the element
    /// itself stays constraining with an empty list.
    pub fn clear_constrained_objects(&mut self, constraining: GeomObj) -> Result<(), GridError> {
        let list: SmallVec<[GeomObj; 4]> =
            SmallVec::from_slice(self.constrained_objects(constraining)?);
        for obj in list {
            if self.constraining_object(obj)? == Some(constraining) {
                self.release(obj)?;
            }
        }
        if let Constraint::Constraining(list) = self.store_mut().constraint_mut(constraining)? {
            list.clear();
        }
        Ok(())
    }

    /// Dissolves every constraint relation `obj` takes part in. Objects it
    /// constrained become regular.
    pub fn make_unconstrained(&mut self, obj: GeomObj) -> Result<(), GridError> {
        self.info(obj)?;
        if self.is_constraining(obj) {
            self.clear_constrained_objects(obj)?;
        }
        self.detach_from_constraining(obj)?;
        self.release(obj)
    }

    fn release(&mut self, obj: GeomObj) -> Result<(), GridError> {
        let store = self.store_mut();
        match obj {
            GeomObj::Vertex(v) => {
                if let Some(rec) = store.vertices.get_mut(v) {
                    rec.constraint = VertexConstraint::Free;
                }
            }
            GeomObj::Edge(_) | GeomObj::Face(_) => *store.constraint_mut(obj)? = Constraint::None,
            GeomObj::Volume(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::cell_type::CellType;
    use crate::topology::point::{EdgeId, VertexId};

    fn split_edge_grid() -> (MultiGrid, EdgeId, VertexId, [EdgeId; 2]) {
        let mut grid = MultiGrid::new();
        let a = grid.create_vertex(None).unwrap();
        let b = grid.create_vertex(None).unwrap();
        let e = grid.create_edge([a, b], None).unwrap();
        let ca = grid.create_vertex(Some(a.into())).unwrap();
        let cb = grid.create_vertex(Some(b.into())).unwrap();
        let m = grid.create_vertex(Some(e.into())).unwrap();
        let e0 = grid.create_edge([ca, m], Some(e.into())).unwrap();
        let e1 = grid.create_edge([m, cb], Some(e.into())).unwrap();
        (grid, e, m, [e0, e1])
    }

    #[test]
    fn links_are_bidirectional() {
        let (mut grid, e, m, [e0, e1]) = split_edge_grid();
        grid.make_constraining(e.into()).unwrap();
        grid.make_constrained(m.into(), Some(e.into()), [0.5, 0.0])
            .unwrap();
        grid.make_constrained(e0.into(), Some(e.into()), [0.0; 2])
            .unwrap();
        grid.make_constrained(e1.into(), Some(e.into()), [0.0; 2])
            .unwrap();

        assert!(grid.is_constraining(e.into()));
        assert_eq!(
            grid.constrained_objects(e.into()).unwrap(),
            &[m.into(), e0.into(), e1.into()]
        );
        assert_eq!(grid.constraining_object(m.into()).unwrap(), Some(e.into()));
        assert_eq!(
            grid.hanging_local_coords(m.into()).unwrap(),
            Some([0.5, 0.0])
        );
    }

    #[test]
    fn relinking_moves_the_object() {
        let (mut grid, e, m, [e0, _]) = split_edge_grid();
        grid.make_constrained(m.into(), Some(e.into()), [0.5, 0.0])
            .unwrap();
        grid.make_constraining(e0.into()).unwrap();
        grid.make_constrained(m.into(), Some(e0.into()), [0.0; 2])
            .unwrap();
        assert!(grid.constrained_objects(e.into()).unwrap().is_empty());
        assert_eq!(grid.constrained_objects(e0.into()).unwrap(), &[m.into()]);
    }

    #[test]
    fn kind_rules_are_enforced() {
        let mut grid = MultiGrid::new();
        let v: Vec<VertexId> = (0..3).map(|_| grid.create_vertex(None).unwrap()).collect();
        let f = grid.create_face(CellType::Triangle, &v, None).unwrap();
        let e = grid.face(f).unwrap().edges()[0];
        assert!(matches!(
            grid.make_constrained(f.into(), Some(e.into()), [0.0; 2]),
            Err(GridError::ConstraintKindMismatch { .. })
        ));
        assert!(matches!(
            grid.make_constraining(v[0].into()),
            Err(GridError::ConstraintKindMismatch { .. })
        ));
        assert!(!may_constrain(ElemKind::Edge, ElemKind::Face));
        assert!(may_constrain(ElemKind::Face, ElemKind::Face));
    }

    #[test]
    fn unconstraining_a_constraining_edge_frees_children() {
        let (mut grid, e, m, [e0, _]) = split_edge_grid();
        grid.make_constrained(m.into(), Some(e.into()), [0.5, 0.0])
            .unwrap();
        grid.make_constrained(e0.into(), Some(e.into()), [0.0; 2])
            .unwrap();
        grid.make_unconstrained(e.into()).unwrap();
        assert!(!grid.is_constraining(e.into()));
        assert!(!grid.is_constrained(m.into()));
        assert!(!grid.is_constrained(e0.into()));
    }

    #[test]
    fn constraining_element_cannot_be_constrained() {
        let (mut grid, e, _, [e0, _]) = split_edge_grid();
        grid.make_constraining(e0.into()).unwrap();
        assert!(matches!(
            grid.make_constrained(e0.into(), Some(e.into()), [0.0; 2]),
            Err(GridError::ConstraintCycle { .. })
        ));
    }
}

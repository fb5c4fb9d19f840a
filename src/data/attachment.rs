//! Attachments: runtime-extensible, per-kind element side storage.
//!
//! An [`Attachment<H, T>`] is a typed handle to a column of `T` values, one
//! per slot of element kind `H`. Columns are registered per kind, grow together
//! with the element arena, and are dropped on detach. Element records never
//! change when an algorithm needs scratch data; it attaches a column instead.
//!
//! Accessors borrow the column; the borrow checker therefore enforces the
//! "no attach/detach while an accessor is alive" discipline at compile time.

use crate::mesh_error::GridError;
use crate::topology::grid::GridId;
use crate::topology::point::{ElemHandle, ElemKind, GeomObj};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Typed handle of an attached column.
pub struct Attachment<H, T> {
    id: u32,
    grid: GridId,
    _marker: PhantomData<fn() -> (H, T)>,
}

impl<H: ElemHandle, T> Attachment<H, T> {
    /// Registry id of the column.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Kind of element the column belongs to.
    pub fn kind(&self) -> ElemKind {
        H::KIND
    }
}

impl<H, T> Clone for Attachment<H, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H, T> Copy for Attachment<H, T> {}

impl<H, T> PartialEq for Attachment<H, T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.grid == other.grid
    }
}

impl<H, T> Eq for Attachment<H, T> {}

impl<H, T> Hash for Attachment<H, T> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.id.hash(state);
        self.grid.hash(state);
    }
}

impl<H: ElemHandle, T> fmt::Debug for Attachment<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("id", &self.id)
            .field("kind", &H::KIND)
            .field("value", &std::any::type_name::<T>())
            .finish()
    }
}

trait AnyColumn: Any {
    fn resize(&mut self, len: usize);
    fn reset(&mut self, index: usize);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Column<T> {
    default: T,
    values: Vec<T>,
}

impl<T: Clone + 'static> AnyColumn for Column<T> {
    fn resize(&mut self, len: usize) {
        self.values.resize(len, self.default.clone());
    }

    fn reset(&mut self, index: usize) {
        if let Some(v) = self.values.get_mut(index) {
            *v = self.default.clone();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Columns of one element kind.
#[derive(Default)]
struct AttachmentTable {
    columns: BTreeMap<u32, Box<dyn AnyColumn>>,
}

/// All attachment columns of a grid, keyed by (kind, id).
pub(crate) struct AttachmentRegistry {
    grid: GridId,
    tables: [AttachmentTable; 4],
    next_id: u32,
}

impl AttachmentRegistry {
    pub(crate) fn new(grid: GridId) -> Self {
        Self {
            grid,
            tables: Default::default(),
            next_id: 0,
        }
    }

    pub(crate) fn attach<H: ElemHandle, T: Clone + 'static>(
        &mut self,
        default: T,
        len: usize,
    ) -> Attachment<H, T> {
        let id = self.next_id;
        self.next_id += 1;
        let column = Column {
            values: vec![default.clone(); len],
            default,
        };
        self.tables[H::KIND.dim()]
            .columns
            .insert(id, Box::new(column));
        Attachment {
            id,
            grid: self.grid,
            _marker: PhantomData,
        }
    }

    pub(crate) fn detach<H: ElemHandle, T>(&mut self, att: Attachment<H, T>) -> bool {
        att.grid == self.grid && self.tables[H::KIND.dim()].columns.remove(&att.id).is_some()
    }

    pub(crate) fn is_attached<H: ElemHandle, T: 'static>(&self, att: Attachment<H, T>) -> bool {
        self.column(att).is_ok()
    }

    fn column<H: ElemHandle, T: 'static>(
        &self,
        att: Attachment<H, T>,
    ) -> Result<&Column<T>, GridError> {
        let not_attached = GridError::AttachmentNotAttached {
            kind: H::KIND,
            id: att.id,
        };
        if att.grid != self.grid {
            return Err(not_attached);
        }
        self.tables[H::KIND.dim()]
            .columns
            .get(&att.id)
            .and_then(|c| c.as_any().downcast_ref::<Column<T>>())
            .ok_or(not_attached)
    }

    fn column_mut<H: ElemHandle, T: 'static>(
        &mut self,
        att: Attachment<H, T>,
    ) -> Result<&mut Column<T>, GridError> {
        let not_attached = GridError::AttachmentNotAttached {
            kind: H::KIND,
            id: att.id,
        };
        if att.grid != self.grid {
            return Err(not_attached);
        }
        self.tables[H::KIND.dim()]
            .columns
            .get_mut(&att.id)
            .and_then(|c| c.as_any_mut().downcast_mut::<Column<T>>())
            .ok_or(not_attached)
    }

    pub(crate) fn accessor<H: ElemHandle, T: 'static>(
        &self,
        att: Attachment<H, T>,
    ) -> Result<Accessor<'_, H, T>, GridError> {
        Ok(Accessor {
            values: &self.column(att)?.values,
            _marker: PhantomData,
        })
    }

    pub(crate) fn accessor_mut<H: ElemHandle, T: 'static>(
        &mut self,
        att: Attachment<H, T>,
    ) -> Result<AccessorMut<'_, H, T>, GridError> {
        Ok(AccessorMut {
            values: &mut self.column_mut(att)?.values,
            _marker: PhantomData,
        })
    }

    /// Grow every column of `kind` to `len` slots.
    pub(crate) fn grow(&mut self, kind: ElemKind, len: usize) {
        for column in self.tables[kind.dim()].columns.values_mut() {
            column.resize(len);
        }
    }

    /// Restore the default value of slot `index` in every column of `kind`.
    pub(crate) fn reset(&mut self, kind: ElemKind, index: usize) {
        for column in self.tables[kind.dim()].columns.values_mut() {
            column.reset(index);
        }
    }

    pub(crate) fn num_attached(&self, kind: ElemKind) -> usize {
        self.tables[kind.dim()].columns.len()
    }
}

/// Read view of an attached column.
///
/// Indexing with a handle of this grid always succeeds; indexing with a
/// handle from another grid may panic like an out-of-bounds slice access.
pub struct Accessor<'a, H, T> {
    values: &'a [T],
    _marker: PhantomData<fn() -> H>,
}

impl<'a, H: ElemHandle, T> Accessor<'a, H, T> {
    /// Value of `h`, or `None` for a handle outside the column.
    pub fn get(&self, h: H) -> Option<&'a T> {
        self.values.get(h.index())
    }

    /// Value of a dynamically typed element; fails on a kind mismatch.
    pub fn get_obj(&self, obj: GeomObj) -> Result<&'a T, GridError> {
        let h = H::from_obj(obj).ok_or(GridError::AttachmentKindMismatch {
            expected: H::KIND,
            found: obj.kind(),
        })?;
        self.get(h).ok_or(GridError::InvalidElement(obj))
    }
}

impl<H, T> Clone for Accessor<'_, H, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H, T> Copy for Accessor<'_, H, T> {}

impl<H: ElemHandle, T> Index<H> for Accessor<'_, H, T> {
    type Output = T;

    fn index(&self, h: H) -> &T {
        &self.values[h.index()]
    }
}

/// Write view of an attached column.
pub struct AccessorMut<'a, H, T> {
    values: &'a mut [T],
    _marker: PhantomData<fn() -> H>,
}

impl<H: ElemHandle, T> AccessorMut<'_, H, T> {
    /// Value of `h`, or `None` for a handle outside the column.
    pub fn get(&self, h: H) -> Option<&T> {
        self.values.get(h.index())
    }

    /// Mutable value of `h`.
    pub fn get_mut(&mut self, h: H) -> Option<&mut T> {
        self.values.get_mut(h.index())
    }

    /// Value of a dynamically typed element; fails on a kind mismatch.
    pub fn get_obj_mut(&mut self, obj: GeomObj) -> Result<&mut T, GridError> {
        let h = H::from_obj(obj).ok_or(GridError::AttachmentKindMismatch {
            expected: H::KIND,
            found: obj.kind(),
        })?;
        self.values
            .get_mut(h.index())
            .ok_or(GridError::InvalidElement(obj))
    }

    /// Reborrow as a read view.
    pub fn as_accessor(&self) -> Accessor<'_, H, T> {
        Accessor {
            values: &*self.values,
            _marker: PhantomData,
        }
    }
}

impl<H: ElemHandle, T> Index<H> for AccessorMut<'_, H, T> {
    type Output = T;

    fn index(&self, h: H) -> &T {
        &self.values[h.index()]
    }
}

impl<H: ElemHandle, T> IndexMut<H> for AccessorMut<'_, H, T> {
    fn index_mut(&mut self, h: H) -> &mut T {
        &mut self.values[h.index()]
    }
}

#[cfg(test)]
mod tests {
    use crate::mesh_error::GridError;
    use crate::topology::grid::MultiGrid;
    use crate::topology::point::{EdgeId, ElemKind, GeomObj, VertexId};

    #[test]
    fn attach_grows_existing_and_new_elements() {
        let mut grid = MultiGrid::new();
        let a = grid.create_vertex(None).unwrap();
        let att = grid.attach::<VertexId, f64>(1.5);
        let b = grid.create_vertex(None).unwrap();
        let acc = grid.accessor(att).unwrap();
        assert_eq!(acc[a], 1.5);
        assert_eq!(acc[b], 1.5);
    }

    #[test]
    fn values_survive_growth() {
        let mut grid = MultiGrid::new();
        let a = grid.create_vertex(None).unwrap();
        let att = grid.attach::<VertexId, i32>(0);
        grid.accessor_mut(att).unwrap()[a] = 7;
        for _ in 0..100 {
            grid.create_vertex(None).unwrap();
        }
        assert_eq!(grid.accessor(att).unwrap()[a], 7);
    }

    #[test]
    fn detached_access_fails_fast() {
        let mut grid = MultiGrid::new();
        let att = grid.attach::<EdgeId, u8>(0);
        assert!(grid.is_attached(att));
        assert!(grid.detach(att));
        assert!(!grid.is_attached(att));
        assert_eq!(
            grid.accessor(att).err(),
            Some(GridError::AttachmentNotAttached {
                kind: ElemKind::Edge,
                id: att.id()
            })
        );
    }

    #[test]
    fn foreign_grid_attachment_is_rejected() {
        let mut g1 = MultiGrid::new();
        let g2 = MultiGrid::new();
        let att = g1.attach::<VertexId, u8>(0);
        assert!(g2.accessor(att).is_err());
    }

    #[test]
    fn dynamic_lookup_checks_kind() {
        let mut grid = MultiGrid::new();
        let v0 = grid.create_vertex(None).unwrap();
        let v1 = grid.create_vertex(None).unwrap();
        let e = grid.create_edge([v0, v1], None).unwrap();
        let att = grid.attach::<VertexId, u8>(3);
        let acc = grid.accessor(att).unwrap();
        assert_eq!(acc.get_obj(GeomObj::from(v1)), Ok(&3));
        assert_eq!(
            acc.get_obj(e.into()),
            Err(GridError::AttachmentKindMismatch {
                expected: ElemKind::Vertex,
                found: ElemKind::Edge
            })
        );
    }

    #[test]
    fn erase_restores_default() {
        let mut grid = MultiGrid::new();
        let v = grid.create_vertex(None).unwrap();
        let att = grid.attach::<VertexId, u32>(0);
        grid.accessor_mut(att).unwrap()[v] = 9;
        grid.erase(v.into()).unwrap();
        assert_eq!(grid.accessor(att).unwrap().get(v), Some(&0));
    }
}

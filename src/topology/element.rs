//! Element records stored in the grid arena.
//!
//! Records hold only non-owning relations: the parent, the children, the
//! constraint partner(s) and the adjacent elements are all handles resolved
//! through the owning [`ElementStore`](crate::topology::grid::ElementStore).

use crate::topology::cell_type::CellType;
use crate::topology::point::{EdgeId, FaceId, GeomObj, VertexId, VolumeId};
use smallvec::SmallVec;

/// Child list of an element. Regular refinement of a hexahedron yields the
/// largest list (8 volumes, 12 faces, 6 edges and 1 vertex).
pub type Children = SmallVec<[GeomObj; 4]>;

/// Fields shared by all element kinds.
#[derive(Clone, Debug, PartialEq)]
pub struct ElemInfo {
    pub(crate) level: usize,
    pub(crate) parent: Option<GeomObj>,
    pub(crate) children: Children,
    pub(crate) subset: i32,
}

impl ElemInfo {
    pub(crate) fn new(level: usize, parent: Option<GeomObj>, subset: i32) -> Self {
        Self {
            level,
            parent,
            children: Children::new(),
            subset,
        }
    }

    /// Refinement level (0 = coarsest).
    pub fn level(&self) -> usize {
        self.level
    }

    /// Parent element, if any.
    pub fn parent(&self) -> Option<GeomObj> {
        self.parent
    }

    /// Children in creation order.
    pub fn children(&self) -> &[GeomObj] {
        &self.children
    }

    /// `true` once the element has been refined (or copied).
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Subset index, `-1` when unassigned.
    pub fn subset(&self) -> i32 {
        self.subset
    }
}

/// Constraint role of a vertex.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VertexConstraint {
    /// Regular vertex.
    Free,
    /// Hanging vertex sitting on `constraining` at local coordinates `local`.
    Hanging {
        constraining: Option<GeomObj>,
        local: [f64; 2],
    },
}

/// Constraint role of an edge or face.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Constraint {
    /// Regular element.
    #[default]
    None,
    /// Constraining element with its constrained objects.
    Constraining(SmallVec<[GeomObj; 4]>),
    /// Constrained element and its constraining partner.
    Constrained(Option<GeomObj>),
}

impl Constraint {
    pub fn is_constraining(&self) -> bool {
        matches!(self, Constraint::Constraining(_))
    }

    pub fn is_constrained(&self) -> bool {
        matches!(self, Constraint::Constrained(_))
    }
}

/// A vertex record.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexRecord {
    pub(crate) info: ElemInfo,
    pub(crate) constraint: VertexConstraint,
    pub(crate) edges: SmallVec<[EdgeId; 6]>,
}

impl VertexRecord {
    pub fn info(&self) -> &ElemInfo {
        &self.info
    }

    pub fn constraint(&self) -> VertexConstraint {
        self.constraint
    }

    /// Edges using this vertex.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn is_hanging(&self) -> bool {
        matches!(self.constraint, VertexConstraint::Hanging { .. })
    }
}

/// An edge record.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRecord {
    pub(crate) info: ElemInfo,
    pub(crate) vertices: [VertexId; 2],
    pub(crate) constraint: Constraint,
    pub(crate) faces: SmallVec<[FaceId; 4]>,
}

impl EdgeRecord {
    pub fn info(&self) -> &ElemInfo {
        &self.info
    }

    pub fn vertices(&self) -> [VertexId; 2] {
        self.vertices
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    /// Faces using this edge.
    pub fn faces(&self) -> &[FaceId] {
        &self.faces
    }
}

/// A face record.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceRecord {
    pub(crate) info: ElemInfo,
    pub(crate) cell_type: CellType,
    pub(crate) vertices: SmallVec<[VertexId; 4]>,
    pub(crate) edges: SmallVec<[EdgeId; 4]>,
    pub(crate) constraint: Constraint,
    pub(crate) volumes: SmallVec<[VolumeId; 2]>,
}

impl FaceRecord {
    pub fn info(&self) -> &ElemInfo {
        &self.info
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn vertices(&self) -> &[VertexId] {
        &self.vertices
    }

    /// Edges in reference order (`edges()[i]` joins corners `i` and `i + 1`).
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    /// Volumes using this face.
    pub fn volumes(&self) -> &[VolumeId] {
        &self.volumes
    }
}

/// A volume record.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeRecord {
    pub(crate) info: ElemInfo,
    pub(crate) cell_type: CellType,
    pub(crate) vertices: SmallVec<[VertexId; 8]>,
    pub(crate) edges: SmallVec<[EdgeId; 12]>,
    pub(crate) faces: SmallVec<[FaceId; 6]>,
}

impl VolumeRecord {
    pub fn info(&self) -> &ElemInfo {
        &self.info
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn vertices(&self) -> &[VertexId] {
        &self.vertices
    }

    /// Edges in the order of [`CellType::ref_edges`].
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// Faces in the order of [`CellType::ref_faces`].
    pub fn faces(&self) -> &[FaceId] {
        &self.faces
    }
}

/// Access to the shared header of any record.
pub trait ElemRecord {
    fn info(&self) -> &ElemInfo;
    fn info_mut(&mut self) -> &mut ElemInfo;
}

macro_rules! impl_record {
    ($($rec:ty),*) => {$(
        impl ElemRecord for $rec {
            #[inline]
            fn info(&self) -> &ElemInfo {
                &self.info
            }
            #[inline]
            fn info_mut(&mut self) -> &mut ElemInfo {
                &mut self.info
            }
        }
    )*};
}

impl_record!(VertexRecord, EdgeRecord, FaceRecord, VolumeRecord);

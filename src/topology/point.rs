//! Element handles: strong, zero-cost identities for grid elements
//!
//! Every element of a [`MultiGrid`](crate::topology::grid::MultiGrid) is
//! addressed by a typed handle, one newtype per element kind. Handles pack a
//! slot number and the slot's generation into a non-zero `u64`, so
//! `Option<VertexId>` is as small as a `VertexId`. Slots of erased elements
//! are reused, but with a new generation: a handle kept past the erasure of
//! its element never resolves to the slot's next occupant.
//!
//! This module provides:
//! - [`ElemKind`], the closed set of element kinds (vertex, edge, face, volume).
//! - [`VertexId`], [`EdgeId`], [`FaceId`], [`VolumeId`] and the [`ElemHandle`]
//!   trait that lets algorithms be written once over all four kinds.
//! - [`GeomObj`], the sum type over the four handles used wherever a relation
//!   may point to an element of any kind (parents, children, constraints).

use serde::{Deserialize, Serialize};
use std::{fmt, hash::Hash, num::NonZeroU64};

/// The four element kinds, ordered by topological dimension.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ElemKind {
    Vertex,
    Edge,
    Face,
    Volume,
}

impl ElemKind {
    /// All kinds in ascending dimension.
    pub const ALL: [ElemKind; 4] = [
        ElemKind::Vertex,
        ElemKind::Edge,
        ElemKind::Face,
        ElemKind::Volume,
    ];

    /// Topological dimension of the kind.
    #[inline]
    pub const fn dim(self) -> usize {
        self as usize
    }

    /// Kind with the given topological dimension.
    pub fn from_dim(dim: usize) -> Option<Self> {
        Self::ALL.get(dim).copied()
    }

    /// Lower-case name used in messages and file sections.
    pub const fn name(self) -> &'static str {
        match self {
            ElemKind::Vertex => "vertex",
            ElemKind::Edge => "edge",
            ElemKind::Face => "face",
            ElemKind::Volume => "volume",
        }
    }
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared behaviour of the four typed handles.
pub trait ElemHandle:
    Copy + Eq + Ord + Hash + fmt::Debug + Into<GeomObj> + Send + Sync + 'static
{
    /// Kind of element this handle addresses.
    const KIND: ElemKind;

    /// Handle for the zero-based slot `index` in its `generation`.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit the 32-bit slot space.
    fn from_parts(index: usize, generation: u32) -> Self;

    /// Handle for the first generation of slot `index`.
    #[inline]
    fn from_index(index: usize) -> Self {
        Self::from_parts(index, 0)
    }

    /// Zero-based slot of this handle.
    fn index(self) -> usize;

    /// How often the slot had been released before this handle was issued.
    fn generation(self) -> u32;

    /// Narrow a [`GeomObj`] to this kind.
    fn from_obj(obj: GeomObj) -> Option<Self>;
}

macro_rules! elem_handle {
    ($(#[$doc:meta])* $name:ident, $kind:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl ElemHandle for $name {
            const KIND: ElemKind = ElemKind::$kind;

            #[inline]
            fn from_parts(index: usize, generation: u32) -> Self {
                u32::try_from(index)
                    .ok()
                    .and_then(|i| i.checked_add(1))
                    .and_then(|slot| {
                        NonZeroU64::new((u64::from(slot) << 32) | u64::from(generation))
                    })
                    .map($name)
                    .expect("element handle space exhausted")
            }

            #[inline]
            fn index(self) -> usize {
                ((self.0.get() >> 32) - 1) as usize
            }

            #[inline]
            fn generation(self) -> u32 {
                self.0.get() as u32
            }

            #[inline]
            fn from_obj(obj: GeomObj) -> Option<Self> {
                match obj {
                    GeomObj::$kind(h) => Some(h),
                    _ => None,
                }
            }
        }

        impl From<$name> for GeomObj {
            #[inline]
            fn from(h: $name) -> GeomObj {
                GeomObj::$kind(h)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut t = f.debug_tuple(stringify!($name));
                t.field(&self.index());
                if self.generation() > 0 {
                    t.field(&self.generation());
                }
                t.finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.index())
            }
        }
    };
}

elem_handle!(
    /// Handle of a vertex (regular or hanging).
    VertexId, Vertex, "v"
);
elem_handle!(
    /// Handle of an edge (regular, constraining or constrained).
    EdgeId, Edge, "e"
);
elem_handle!(
    /// Handle of a face (triangle or quadrilateral).
    FaceId, Face, "f"
);
elem_handle!(
    /// Handle of a volume (tetrahedron, hexahedron, prism or pyramid).
    VolumeId, Volume, "c"
);

/// An element of any kind.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum GeomObj {
    Vertex(VertexId),
    Edge(EdgeId),
    Face(FaceId),
    Volume(VolumeId),
}

impl GeomObj {
    /// Kind of the wrapped handle.
    #[inline]
    pub const fn kind(self) -> ElemKind {
        match self {
            GeomObj::Vertex(_) => ElemKind::Vertex,
            GeomObj::Edge(_) => ElemKind::Edge,
            GeomObj::Face(_) => ElemKind::Face,
            GeomObj::Volume(_) => ElemKind::Volume,
        }
    }

    /// Slot index of the wrapped handle.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            GeomObj::Vertex(h) => h.index(),
            GeomObj::Edge(h) => h.index(),
            GeomObj::Face(h) => h.index(),
            GeomObj::Volume(h) => h.index(),
        }
    }

    /// Rebuild a handle from its kind and slot index.
    pub fn from_kind_index(kind: ElemKind, index: usize) -> Self {
        match kind {
            ElemKind::Vertex => GeomObj::Vertex(VertexId::from_index(index)),
            ElemKind::Edge => GeomObj::Edge(EdgeId::from_index(index)),
            ElemKind::Face => GeomObj::Face(FaceId::from_index(index)),
            ElemKind::Volume => GeomObj::Volume(VolumeId::from_index(index)),
        }
    }

    /// Narrow to a typed handle.
    #[inline]
    pub fn cast<H: ElemHandle>(self) -> Option<H> {
        H::from_obj(self)
    }
}

impl fmt::Display for GeomObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeomObj::Vertex(h) => h.fmt(f),
            GeomObj::Edge(h) => h.fmt(f),
            GeomObj::Face(h) => h.fmt(f),
            GeomObj::Volume(h) => h.fmt(f),
        }
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    // Niche optimisation keeps optional handles as small as the handle.
    assert_eq_size!(VertexId, u64);
    assert_eq_size!(Option<EdgeId>, u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trip() {
        let v = VertexId::from_index(0);
        assert_eq!(v.index(), 0);
        let f = FaceId::from_index(41);
        assert_eq!(f.index(), 41);
    }

    #[test]
    fn generations_tell_slot_occupants_apart() {
        let old = EdgeId::from_parts(5, 0);
        let new = EdgeId::from_parts(5, 1);
        assert_eq!((old.index(), new.index()), (5, 5));
        assert_eq!(new.generation(), 1);
        assert_ne!(old, new);
        // ordered by slot first
        assert!(new < EdgeId::from_parts(6, 0));
        assert_eq!(format!("{:?}", new), "EdgeId(5, 1)");
        assert_eq!(format!("{}", new), "e5");
    }

    #[test]
    fn debug_and_display() {
        let e = EdgeId::from_index(7);
        assert_eq!(format!("{:?}", e), "EdgeId(7)");
        assert_eq!(format!("{}", e), "e7");
        assert_eq!(format!("{}", GeomObj::from(e)), "e7");
    }

    #[test]
    fn geom_obj_cast_checks_kind() {
        let obj: GeomObj = VolumeId::from_index(3).into();
        assert_eq!(obj.kind(), ElemKind::Volume);
        assert_eq!(obj.cast::<VolumeId>(), Some(VolumeId::from_index(3)));
        assert_eq!(obj.cast::<FaceId>(), None);
        assert_eq!(GeomObj::from_kind_index(ElemKind::Volume, 3), obj);
    }

    #[test]
    fn ordering_groups_by_kind() {
        let a: GeomObj = VertexId::from_index(9).into();
        let b: GeomObj = EdgeId::from_index(0).into();
        assert!(a < b);
    }

    #[test]
    fn kind_dimension() {
        for (d, k) in ElemKind::ALL.iter().enumerate() {
            assert_eq!(k.dim(), d);
            assert_eq!(ElemKind::from_dim(d), Some(*k));
        }
        assert_eq!(ElemKind::from_dim(4), None);
    }
}

#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let obj: GeomObj = FaceId::from_index(123).into();
        let s = serde_json::to_string(&obj).unwrap();
        let back: GeomObj = serde_json::from_str(&s).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn bincode_roundtrip() {
        let v = VertexId::from_index(456);
        let bytes = bincode::serialize(&v).unwrap();
        let back: VertexId = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, v);
    }
}

//! Grid topology: element handles, the multi-level element store, subsets,
//! constraints and refinement.
//!
//! Most users work with [`grid::MultiGrid`], iterate it through
//! [`iter::ElemFilter`] and refine it with one of the refiners in
//! [`refine`].

pub mod cell_type;
pub mod constraints;
pub mod element;
pub mod grid;
pub mod iter;
pub mod point;
pub mod refine;
pub mod subsets;
pub mod validation;

pub use grid::{ElementStore, GridId, MultiGrid};
pub use iter::ElemFilter;
pub use point::{EdgeId, ElemHandle, ElemKind, FaceId, GeomObj, VertexId, VolumeId};

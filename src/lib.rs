#![cfg_attr(docsrs, feature(doc_cfg))]
//! # ug-grid
//!
//! ug-grid is a hierarchical multigrid mesh library for adaptive finite
//! element codes. It keeps every refinement level of an unstructured grid in
//! one element store, refines globally or with hanging nodes, and prepares
//! the per-process layouts needed to distribute such a grid.
//!
//! ## Features
//! - Arena-backed element store with typed handles for vertices, edges,
//!   faces and volumes, parent/child genealogy and subsets
//! - Runtime attachments (positions, indices, flags) per element kind
//! - Constraining/constrained elements for non-conforming grids
//! - Global and hanging-node refiners with closure, anisotropic marking and
//!   coarsening
//! - Distribution layouts with master/slave and vertical interfaces, plus a
//!   versioned binary stream for grid parts and their interfaces
//! - UGX (XML) reading and writing
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! ug-grid = "0.4"
//! # Optional features:
//! # features = ["check-invariants"]
//! ```
//!
//! ```
//! use ug_grid::prelude::*;
//!
//! let mut dom = Domain::new(2, true);
//! let a = dom.create_vertex_at(&[0.0, 0.0]).unwrap();
//! let b = dom.create_vertex_at(&[1.0, 0.0]).unwrap();
//! let c = dom.create_vertex_at(&[0.0, 1.0]).unwrap();
//! let tri = dom
//!     .grid_mut()
//!     .create_face(CellType::Triangle, &[a, b, c], None)
//!     .unwrap();
//!
//! let mut refiner = hanging_node_domain_refiner(&dom, &SerialProcess).unwrap();
//! refiner.mark(dom.grid(), tri.into(), RefinementMark::Regular).unwrap();
//! refiner.refine(dom.grid_mut()).unwrap();
//! assert_eq!(dom.grid().num_levels(), 2);
//! ```

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod io;
pub mod mesh_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{
        LocalProcessGroup, ProcessContext, SerialProcess, StandardDomainDecomposition,
    };
    pub use crate::algs::distribute::{
        DistributionLayout, DistributionLayouts, DistributionOptions, InterfaceEntry,
        InterfaceNodeType, check_interface_symmetry, create_distribution_layouts,
        test_distribution_layouts,
    };
    pub use crate::algs::wire::{deserialize_grid_and_layouts, serialize_grid_and_layouts};
    pub use crate::data::attachment::Attachment;
    pub use crate::data::domain::{Domain, Position};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::io::ugx::{UgxReadOptions, UgxReader, UgxWriter, load_domain, save_domain};
    pub use crate::io::{DomainReader, DomainWriter};
    pub use crate::mesh_error::GridError;
    pub use crate::topology::cell_type::CellType;
    pub use crate::topology::grid::MultiGrid;
    pub use crate::topology::iter::ElemFilter;
    pub use crate::topology::point::{EdgeId, ElemKind, FaceId, GeomObj, VertexId, VolumeId};
    pub use crate::topology::refine::{
        GlobalRefiner, HangingNodeRefiner, RefinementMark, Refiner, global_domain_refiner,
        hanging_node_domain_refiner,
    };
    pub use crate::topology::subsets::{GridSubsets, PartitionMap, SubsetAssignment};
}

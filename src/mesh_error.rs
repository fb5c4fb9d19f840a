//! GridError: Unified error type for ug-grid public APIs
//!
//! Every fallible operation of the element store, the attachment system, the
//! refiners, the distribution layout builder and the readers/writers reports
//! through this enum so callers can match on the failure class.

use crate::topology::point::{ElemKind, GeomObj};
use thiserror::Error;

/// Unified error type for grid operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    /// The handle does not refer to a live element of this grid.
    #[error("invalid element handle {0} (erased or never created)")]
    InvalidElement(GeomObj),
    /// An element with children cannot be erased.
    #[error("cannot erase element {0} with children")]
    ElementHasChildren(GeomObj),
    /// An element is still referenced as a side of a higher-dimensional element.
    #[error("cannot erase element {elem}: still used by {user}")]
    ElementInUse { elem: GeomObj, user: GeomObj },
    /// An element with the same vertices already exists.
    #[error("duplicate element: {0} already connects these vertices")]
    DuplicateElement(GeomObj),
    /// Element vertices live on a different level than the element itself.
    #[error("level mismatch: vertex {vertex} on level {vertex_level}, element on level {elem_level}")]
    LevelMismatch {
        vertex: GeomObj,
        vertex_level: usize,
        elem_level: usize,
    },
    /// A vertex list does not match the requested cell type.
    #[error("invalid vertex list for {cell}: expected {expected} vertices, got {found}")]
    InvalidVertexList {
        cell: &'static str,
        expected: usize,
        found: usize,
    },
    /// The attachment is not (or no longer) attached to the element kind.
    #[error("attachment #{id} is not attached to {kind} elements")]
    AttachmentNotAttached { kind: ElemKind, id: u32 },
    /// An attachment accessor was used with an element of another kind.
    #[error("attachment kind mismatch: attached to {expected}, accessed with {found}")]
    AttachmentKindMismatch { expected: ElemKind, found: ElemKind },
    /// A refiner was used with a grid it was not created for.
    #[error("refiner was not created for the specified grid")]
    RefinerGridMismatch,
    /// Adaptive refinement requested on a non-adaptive domain.
    #[error(
        "can't create an adaptive refiner for the given domain; construct the domain with adaptive refinement enabled"
    )]
    NonAdaptiveDomain,
    /// The refiner cannot coarsen.
    #[error("the refiner does not support coarsening")]
    CoarseningUnsupported,
    /// Refinement of the element is not supported in the requested configuration.
    #[error("unsupported refinement of {elem}: {reason}")]
    UnsupportedRefinement { elem: GeomObj, reason: String },
    /// A required side (edge/face) of an element is missing.
    #[error("missing associated {kind} of element {elem}")]
    MissingSide { elem: GeomObj, kind: ElemKind },
    /// The constraining/constrained kinds do not form an allowed pair.
    #[error("constraint kind mismatch: {constraining} cannot constrain {constrained}")]
    ConstraintKindMismatch {
        constraining: GeomObj,
        constrained: GeomObj,
    },
    /// A constrained element cannot become constraining at the same time.
    #[error("element {elem} is constrained by {constraining} and cannot constrain")]
    ConstraintCycle { elem: GeomObj, constraining: GeomObj },
    /// A constrained object references no (or a dead / non-constraining) element.
    #[error("dangling constraint: {constrained} references {constraining:?}")]
    DanglingConstraint {
        constrained: GeomObj,
        constraining: Option<GeomObj>,
    },
    /// Constraining and constrained lists disagree.
    #[error("constraint links of {constrained} and {constraining} are not bijective")]
    ConstraintNotBijective {
        constrained: GeomObj,
        constraining: GeomObj,
    },
    /// `level(child) != level(parent) + 1`, or a root element above level 0.
    #[error("level invariant violated by {elem}: level {level}, parent level {parent_level:?}")]
    LevelInvariant {
        elem: GeomObj,
        level: usize,
        parent_level: Option<usize>,
    },
    /// Parent and child lists are inconsistent.
    #[error("genealogy of {child} and {parent} is inconsistent")]
    BrokenGenealogy { child: GeomObj, parent: GeomObj },
    /// Master/slave counts of two processes do not match.
    #[error(
        "interface mismatch for {kind} on level {level}: {proc_a}->{proc_b} has {count_a} {role_a} entries, {proc_b}->{proc_a} has {count_b} {role_b} entries"
    )]
    InterfaceMismatch {
        kind: ElemKind,
        level: usize,
        proc_a: usize,
        proc_b: usize,
        role_a: &'static str,
        role_b: &'static str,
        count_a: usize,
        count_b: usize,
    },
    /// A subset / process index is out of range.
    #[error("invalid subset index {index} (have {num_subsets})")]
    InvalidSubset { index: i32, num_subsets: usize },
    /// A mesh file could not be found.
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// The document contains no `grid` element.
    #[error("file contains no grid")]
    NoGrid,
    /// XML or mesh section parse failure.
    #[error("mesh I/O parse error: {0}")]
    MeshIoParse(String),
    /// Generic I/O failure while reading or writing.
    #[error("I/O error: {0}")]
    Io(String),
    /// Malformed binary layout stream.
    #[error("wire format error: {0}")]
    WireFormat(String),
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::Io(err.to_string())
    }
}

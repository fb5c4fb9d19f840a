//! Cell type metadata and reference-element tables.
//!
//! The local numbering of edges and faces below is shared by element
//! creation (automatic side generation), the refinement templates and the
//! file readers, so it must not change.

use crate::topology::point::ElemKind;
use serde::{Deserialize, Serialize};

/// Shapes of grid elements.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum CellType {
    /// 0D vertex.
    #[default]
    Vertex,
    /// 1D segment/edge.
    Segment,
    /// 2D simplex (triangle).
    Triangle,
    /// 2D tensor-product cell (quad).
    Quadrilateral,
    /// 3D simplex (tet).
    Tetrahedron,
    /// 3D tensor-product cell (hex).
    Hexahedron,
    /// 3D wedge/prism.
    Prism,
    /// 3D pyramid.
    Pyramid,
}

const SEGMENT_EDGES: [[usize; 2]; 1] = [[0, 1]];
const TRIANGLE_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];
const QUAD_EDGES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];
const TET_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
const HEX_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];
const PRISM_EDGES: [[usize; 2]; 9] = [
    [0, 1],
    [1, 2],
    [2, 0],
    [3, 4],
    [4, 5],
    [5, 3],
    [0, 3],
    [1, 4],
    [2, 5],
];
const PYRAMID_EDGES: [[usize; 2]; 8] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [0, 4],
    [1, 4],
    [2, 4],
    [3, 4],
];

const TET_FACES: [&[usize]; 4] = [&[0, 1, 2], &[0, 1, 3], &[1, 2, 3], &[0, 2, 3]];
const HEX_FACES: [&[usize]; 6] = [
    &[0, 1, 2, 3],
    &[4, 5, 6, 7],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
];
const PRISM_FACES: [&[usize]; 5] = [
    &[0, 1, 2],
    &[3, 4, 5],
    &[0, 1, 4, 3],
    &[1, 2, 5, 4],
    &[2, 0, 3, 5],
];
const PYRAMID_FACES: [&[usize]; 5] = [
    &[0, 1, 2, 3],
    &[0, 1, 4],
    &[1, 2, 4],
    &[2, 3, 4],
    &[3, 0, 4],
];

impl CellType {
    /// Returns the topological dimension of the cell.
    pub fn dimension(self) -> u8 {
        match self {
            CellType::Vertex => 0,
            CellType::Segment => 1,
            CellType::Triangle | CellType::Quadrilateral => 2,
            CellType::Tetrahedron | CellType::Hexahedron | CellType::Prism | CellType::Pyramid => 3,
        }
    }

    /// Element kind that stores cells of this type.
    pub fn kind(self) -> ElemKind {
        match self.dimension() {
            0 => ElemKind::Vertex,
            1 => ElemKind::Edge,
            2 => ElemKind::Face,
            _ => ElemKind::Volume,
        }
    }

    /// Number of corner vertices.
    pub fn num_vertices(self) -> usize {
        match self {
            CellType::Vertex => 1,
            CellType::Segment => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral | CellType::Tetrahedron => 4,
            CellType::Pyramid => 5,
            CellType::Prism => 6,
            CellType::Hexahedron => 8,
        }
    }

    /// Local vertex pairs of the reference edges.
    pub fn ref_edges(self) -> &'static [[usize; 2]] {
        match self {
            CellType::Vertex => &[],
            CellType::Segment => &SEGMENT_EDGES,
            CellType::Triangle => &TRIANGLE_EDGES,
            CellType::Quadrilateral => &QUAD_EDGES,
            CellType::Tetrahedron => &TET_EDGES,
            CellType::Hexahedron => &HEX_EDGES,
            CellType::Prism => &PRISM_EDGES,
            CellType::Pyramid => &PYRAMID_EDGES,
        }
    }

    /// Local vertex lists of the reference faces (volumes only).
    pub fn ref_faces(self) -> &'static [&'static [usize]] {
        match self {
            CellType::Tetrahedron => &TET_FACES,
            CellType::Hexahedron => &HEX_FACES,
            CellType::Prism => &PRISM_FACES,
            CellType::Pyramid => &PYRAMID_FACES,
            _ => &[],
        }
    }

    /// Face type with `n` corners.
    pub fn face_with_corners(n: usize) -> Option<CellType> {
        match n {
            3 => Some(CellType::Triangle),
            4 => Some(CellType::Quadrilateral),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            CellType::Vertex => "vertex",
            CellType::Segment => "segment",
            CellType::Triangle => "triangle",
            CellType::Quadrilateral => "quadrilateral",
            CellType::Tetrahedron => "tetrahedron",
            CellType::Hexahedron => "hexahedron",
            CellType::Prism => "prism",
            CellType::Pyramid => "pyramid",
        }
    }
}

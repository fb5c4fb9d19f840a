//! Reference subdivision templates.
//!
//! Templates are generic over the corner type so they can be checked on plain
//! integers. Corner orderings follow [`CellType::ref_edges`] and
//! [`CellType::ref_faces`](crate::topology::cell_type::CellType::ref_faces):
//! child elements that lie on a side of the parent are exactly the children
//! the face templates produce for that side, so side children are shared.
//!
//! [`CellType::ref_edges`]: crate::topology::cell_type::CellType::ref_edges

/// Reference 1→4 subdivision of a triangle given vertices and mid-edge points.
pub fn triangle_subdivision<P: Copy>(vertices: [P; 3], midpoints: [P; 3]) -> [[P; 3]; 4] {
    let [v0, v1, v2] = vertices;
    let [m01, m12, m20] = midpoints;
    [
        [v0, m01, m20],
        [v1, m12, m01],
        [v2, m20, m12],
        [m01, m12, m20],
    ]
}

/// Reference 1→4 subdivision of a quad given vertices, mid-edge points, and a center point.
pub fn quadrilateral_subdivision<P: Copy>(
    vertices: [P; 4],
    midpoints: [P; 4],
    center: P,
) -> [[P; 4]; 4] {
    let [v0, v1, v2, v3] = vertices;
    let [m01, m12, m23, m30] = midpoints;
    [
        [v0, m01, center, m30],
        [m01, v1, m12, center],
        [center, m12, v2, m23],
        [m30, center, m23, v3],
    ]
}

/// Bisection of a triangle through the midpoint of edge `edge`
/// (joining corners `edge` and `edge + 1`).
pub fn triangle_bisection<P: Copy>(vertices: [P; 3], edge: usize, midpoint: P) -> [[P; 3]; 2] {
    let a = vertices[edge % 3];
    let b = vertices[(edge + 1) % 3];
    let opposite = vertices[(edge + 2) % 3];
    [[a, midpoint, opposite], [midpoint, b, opposite]]
}

/// Triangle with two refined edges; `unsplit` is the local index of the edge
/// that keeps its length. `midpoints` holds the midpoints of edges
/// `unsplit + 1` and `unsplit + 2`.
pub fn triangle_two_edge_split<P: Copy>(
    vertices: [P; 3],
    unsplit: usize,
    midpoints: [P; 2],
) -> [[P; 3]; 3] {
    let k0 = vertices[unsplit % 3];
    let k1 = vertices[(unsplit + 1) % 3];
    let tip = vertices[(unsplit + 2) % 3];
    let [p, q] = midpoints;
    [[tip, q, p], [k0, k1, p], [k0, p, q]]
}

/// Quad split into two quads through the midpoints of two opposite edges.
/// `first` selects the pair: `0` splits edges 0 and 2, `1` splits edges 1 and 3.
pub fn quadrilateral_pair_split<P: Copy>(
    vertices: [P; 4],
    first: usize,
    midpoints: [P; 2],
) -> [[P; 4]; 2] {
    let [v0, v1, v2, v3] = vertices;
    let [ma, mb] = midpoints;
    if first % 2 == 0 {
        [[v0, ma, mb, v3], [ma, v1, v2, mb]]
    } else {
        [[v0, v1, ma, mb], [mb, ma, v2, v3]]
    }
}

/// Reference 1→8 subdivision of a tetrahedron given vertices and mid-edge points.
pub fn tetrahedron_subdivision<P: Copy>(vertices: [P; 4], midpoints: [P; 6]) -> [[P; 4]; 8] {
    let [v0, v1, v2, v3] = vertices;
    let [m01, m12, m20, m03, m13, m23] = midpoints;
    [
        [v0, m01, m20, m03],
        [v1, m12, m01, m13],
        [v2, m20, m12, m23],
        [v3, m03, m13, m23],
        [m01, m12, m13, m23],
        [m01, m13, m03, m23],
        [m01, m03, m20, m23],
        [m01, m20, m12, m23],
    ]
}

/// Reference 1→8 subdivision of a hex using edge midpoints, face centers, and cell center.
pub fn hexahedron_subdivision<P: Copy>(
    vertices: [P; 8],
    edge_midpoints: [P; 12],
    face_centers: [P; 6],
    center: P,
) -> [[P; 8]; 8] {
    let [v0, v1, v2, v3, v4, v5, v6, v7] = vertices;
    let [m01, m12, m23, m30, m45, m56, m67, m74, m04, m15, m26, m37] = edge_midpoints;
    let [f0123, f4567, f0154, f1265, f2376, f3047] = face_centers;

    // lattice[z][y][x] over the 3x3x3 points of the subdivided cube
    let lattice = [
        [[v0, m01, v1], [m30, f0123, m12], [v3, m23, v2]],
        [[m04, f0154, m15], [f3047, center, f1265], [m37, f2376, m26]],
        [[v4, m45, v5], [m74, f4567, m56], [v7, m67, v6]],
    ];
    let at = |x: usize, y: usize, z: usize| lattice[z][y][x];

    [(0, 0, 0), (1, 0, 0), (1, 1, 0), (0, 1, 0), (0, 0, 1), (1, 0, 1), (1, 1, 1), (0, 1, 1)].map(
        |(ix, iy, iz)| {
            let (x0, y0, z0) = (ix, iy, iz);
            let (x1, y1, z1) = (ix + 1, iy + 1, iz + 1);
            [
                at(x0, y0, z0),
                at(x1, y0, z0),
                at(x1, y1, z0),
                at(x0, y1, z0),
                at(x0, y0, z1),
                at(x1, y0, z1),
                at(x1, y1, z1),
                at(x0, y1, z1),
            ]
        },
    )
}

/// Reference 1→8 subdivision of a prism: the bottom, middle and top
/// triangles are each split 1→4 and stacked into two layers of prisms.
///
/// `edge_midpoints` follows the prism edge order (bottom, top, vertical);
/// `quad_centers` are the centers of the three side faces.
pub fn prism_subdivision<P: Copy>(
    vertices: [P; 6],
    edge_midpoints: [P; 9],
    quad_centers: [P; 3],
) -> [[P; 6]; 8] {
    let [v0, v1, v2, v3, v4, v5] = vertices;
    let [m01, m12, m20, m34, m45, m53, m03, m14, m25] = edge_midpoints;
    let bottom = triangle_subdivision([v0, v1, v2], [m01, m12, m20]);
    let middle = triangle_subdivision([m03, m14, m25], quad_centers);
    let top = triangle_subdivision([v3, v4, v5], [m34, m45, m53]);

    let stack = |lower: &[[P; 3]; 4], upper: &[[P; 3]; 4], i: usize| {
        let [a, b, c] = lower[i];
        let [d, e, f] = upper[i];
        [a, b, c, d, e, f]
    };
    [
        stack(&bottom, &middle, 0),
        stack(&bottom, &middle, 1),
        stack(&bottom, &middle, 2),
        stack(&bottom, &middle, 3),
        stack(&middle, &top, 0),
        stack(&middle, &top, 1),
        stack(&middle, &top, 2),
        stack(&middle, &top, 3),
    ]
}

/// Subdivision of a pyramid into six pyramids and four tetrahedra.
///
/// `edge_midpoints` follows the pyramid edge order (base edges, then the
/// four edges to the apex); `base_center` is the center of the base quad.
pub fn pyramid_subdivision<P: Copy>(
    vertices: [P; 5],
    edge_midpoints: [P; 8],
    base_center: P,
) -> ([[P; 5]; 6], [[P; 4]; 4]) {
    let [v0, v1, v2, v3, apex] = vertices;
    let [m01, m12, m23, m30, m04, m14, m24, m34] = edge_midpoints;
    let base = quadrilateral_subdivision([v0, v1, v2, v3], [m01, m12, m23, m30], base_center);
    let upper = [m04, m14, m24, m34];
    let pyramids = [
        [base[0][0], base[0][1], base[0][2], base[0][3], m04],
        [base[1][0], base[1][1], base[1][2], base[1][3], m14],
        [base[2][0], base[2][1], base[2][2], base[2][3], m24],
        [base[3][0], base[3][1], base[3][2], base[3][3], m34],
        [m04, m14, m24, m34, apex],
        [m04, m34, m24, m14, base_center],
    ];
    let base_mids = [m01, m12, m23, m30];
    let tets = [0, 1, 2, 3].map(|i| {
        let j = (i + 1) % 4;
        [base_mids[i], upper[j], upper[i], base_center]
    });
    (pyramids, tets)
}

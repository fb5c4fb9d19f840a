#![allow(dead_code)]
use ug_grid::{
    data::domain::Domain,
    topology::cell_type::CellType,
    topology::grid::MultiGrid,
    topology::iter::ElemFilter,
    topology::point::{FaceId, GeomObj, VertexId},
    topology::refine::{GlobalRefiner, RefinementMark, Refiner},
};

/// `nx * ny` unit quadrilaterals on level 0, row by row.
pub fn quad_grid(nx: usize, ny: usize, adaptive: bool) -> (Domain, Vec<FaceId>) {
    let mut dom = Domain::new(2, adaptive);
    let mut v = Vec::new();
    for j in 0..=ny {
        for i in 0..=nx {
            v.push(dom.create_vertex_at(&[i as f64, j as f64]).unwrap());
        }
    }
    let at = |i: usize, j: usize| v[j * (nx + 1) + i];
    let mut faces = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let corners = [at(i, j), at(i + 1, j), at(i + 1, j + 1), at(i, j + 1)];
            faces.push(
                dom.grid_mut()
                    .create_face(CellType::Quadrilateral, &corners, None)
                    .unwrap(),
            );
        }
    }
    (dom, faces)
}

/// Marks every leaf and refines once.
pub fn refine_globally(grid: &mut MultiGrid) {
    let mut refiner = GlobalRefiner::new(grid);
    let leaves: Vec<GeomObj> = grid.objects(ElemFilter::leaves()).collect();
    for obj in leaves {
        refiner.mark(grid, obj, RefinementMark::Regular).unwrap();
    }
    refiner.refine(grid).unwrap();
}

/// `level(e) == level(parent) + 1`, roots on level 0.
pub fn assert_level_invariant(grid: &MultiGrid) {
    for obj in grid.objects(ElemFilter::all()) {
        let level = grid.level(obj).unwrap();
        match grid.parent(obj).unwrap() {
            Some(p) => assert_eq!(level, grid.level(p).unwrap() + 1, "{obj} below {p}"),
            None => assert_eq!(level, 0, "root {obj} above level 0"),
        }
    }
}

/// Every constrained object appears exactly once in its partner's list.
pub fn assert_constraint_bijection(grid: &MultiGrid) {
    for obj in grid.objects(ElemFilter::all()) {
        if !grid.is_constrained(obj) {
            continue;
        }
        let parent = grid
            .constraining_object(obj)
            .unwrap()
            .unwrap_or_else(|| panic!("{obj} has no constraining element"));
        let hits = grid
            .constrained_objects(parent)
            .unwrap()
            .iter()
            .filter(|&&c| c == obj)
            .count();
        assert_eq!(hits, 1, "{obj} listed {hits} times by {parent}");
    }
}

pub fn leaf_faces(grid: &MultiGrid) -> Vec<FaceId> {
    grid.iter::<FaceId>(ElemFilter::leaves()).collect()
}

pub fn vertex_count(grid: &MultiGrid) -> usize {
    grid.num::<VertexId>()
}

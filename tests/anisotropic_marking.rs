use ug_grid::algs::communicator::SerialProcess;
use ug_grid::data::domain::Domain;
use ug_grid::mesh_error::GridError;
use ug_grid::topology::cell_type::CellType;
use ug_grid::topology::point::{FaceId, VertexId};
use ug_grid::topology::refine::marking::{mark_anisotropic_elements, mark_if_anisotropic};
use ug_grid::topology::refine::{RefinementMark, Refiner, hanging_node_domain_refiner};
use ug_grid::topology::validation::{ValidationOptions, validate_grid};

/// Degenerate triangle with edge lengths 1, 1 and 2.
fn flat_triangle() -> (Domain, [VertexId; 3], FaceId) {
    let mut dom = Domain::new(2, true);
    let v = [
        dom.create_vertex_at(&[0.0, 0.0]).unwrap(),
        dom.create_vertex_at(&[1.0, 0.0]).unwrap(),
        dom.create_vertex_at(&[2.0, 0.0]).unwrap(),
    ];
    let f = dom
        .grid_mut()
        .create_face(CellType::Triangle, &v, None)
        .unwrap();
    (dom, v, f)
}

/// 2 x 1 rectangle.
fn long_quad() -> (Domain, [VertexId; 4], FaceId) {
    let mut dom = Domain::new(2, true);
    let v = [
        dom.create_vertex_at(&[0.0, 0.0]).unwrap(),
        dom.create_vertex_at(&[2.0, 0.0]).unwrap(),
        dom.create_vertex_at(&[2.0, 1.0]).unwrap(),
        dom.create_vertex_at(&[0.0, 1.0]).unwrap(),
    ];
    let f = dom
        .grid_mut()
        .create_face(CellType::Quadrilateral, &v, None)
        .unwrap();
    (dom, v, f)
}

#[test]
fn ratio_at_the_threshold_selects_the_long_edge() {
    let (dom, v, f) = flat_triangle();
    let mut refiner = hanging_node_domain_refiner(&dom, &SerialProcess).unwrap();
    assert!(mark_if_anisotropic(&mut refiner, &dom, f, 0.5).unwrap());

    let grid = dom.grid();
    let long = grid.find_edge(v[0], v[2]).unwrap();
    let short = [
        grid.find_edge(v[0], v[1]).unwrap(),
        grid.find_edge(v[1], v[2]).unwrap(),
    ];
    assert_eq!(refiner.get_mark(long.into()), RefinementMark::Regular);
    for e in short {
        assert_eq!(refiner.get_mark(e.into()), RefinementMark::None);
    }
    assert_eq!(refiner.get_mark(f.into()), RefinementMark::Anisotropic);
}

#[test]
fn ratio_below_the_threshold_selects_nothing() {
    let (dom, _, f) = flat_triangle();
    let mut refiner = hanging_node_domain_refiner(&dom, &SerialProcess).unwrap();
    assert!(!mark_if_anisotropic(&mut refiner, &dom, f, 0.49).unwrap());
    assert_eq!(refiner.num_marked(), 0);
}

#[test]
fn anisotropic_quad_is_split_into_two() {
    let (mut dom, v, f) = long_quad();
    let mut refiner = hanging_node_domain_refiner(&dom, &SerialProcess).unwrap();
    assert_eq!(mark_anisotropic_elements(&mut refiner, &dom, 0.5).unwrap(), 1);

    let report = refiner.refine(dom.grid_mut()).unwrap();
    assert_eq!(report.new_faces, 2);
    let grid = dom.grid();
    assert_eq!(grid.child_faces(f.into()).unwrap().len(), 2);
    // the short edges are copied, not split
    let left = grid.find_edge(v[3], v[0]).unwrap();
    assert!(grid.child_vertex(left.into()).unwrap().is_none());

    let bottom = grid.find_edge(v[0], v[1]).unwrap();
    let mid = grid.child_vertex(bottom.into()).unwrap().unwrap();
    assert_eq!(dom.position_of(mid).unwrap(), [1.0, 0.0, 0.0]);
    validate_grid(grid, ValidationOptions::all()).unwrap();
}

#[test]
fn square_is_not_anisotropic() {
    let mut dom = Domain::new(2, true);
    let v: Vec<VertexId> = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
        .iter()
        .map(|p| dom.create_vertex_at(p).unwrap())
        .collect();
    dom.grid_mut()
        .create_face(CellType::Quadrilateral, &v, None)
        .unwrap();
    let mut refiner = hanging_node_domain_refiner(&dom, &SerialProcess).unwrap();
    assert_eq!(mark_anisotropic_elements(&mut refiner, &dom, 0.5).unwrap(), 0);
    assert_eq!(refiner.num_marked(), 0);
}

#[test]
fn marking_needs_the_bound_grid() {
    let (dom, _, f) = flat_triangle();
    let (other, _, _) = flat_triangle();
    let mut refiner = hanging_node_domain_refiner(&other, &SerialProcess).unwrap();
    let err = mark_if_anisotropic(&mut refiner, &dom, f, 0.5).unwrap_err();
    assert!(matches!(err, GridError::RefinerGridMismatch));
}

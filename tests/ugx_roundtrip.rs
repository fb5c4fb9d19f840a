mod util;

use std::cmp::Ordering;
use std::path::PathBuf;
use ug_grid::algs::communicator::SerialProcess;
use ug_grid::data::domain::Domain;
use ug_grid::io::ugx::{UgxReadOptions, load_domain, save_domain};
use ug_grid::mesh_error::GridError;
use ug_grid::topology::cell_type::CellType;
use ug_grid::topology::iter::ElemFilter;
use ug_grid::topology::point::{EdgeId, ElemKind, FaceId, VertexId, VolumeId};
use ug_grid::topology::refine::{RefinementMark, Refiner, hanging_node_domain_refiner};
use ug_grid::topology::validation::{InvariantHandling, validate_constraints};
use util::quad_grid;

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ug_grid_{}_{name}.ugx", std::process::id()))
}

fn save_and_load(dom: &Domain, name: &str) -> Domain {
    let path = temp_file(name);
    save_domain(&path, dom).unwrap();
    let opts = UgxReadOptions {
        dim: dom.dim(),
        ..UgxReadOptions::default()
    };
    let back = load_domain(&path, opts);
    let _ = std::fs::remove_file(&path);
    back.unwrap()
}

fn counts(dom: &Domain) -> [usize; 4] {
    let g = dom.grid();
    [
        g.num::<VertexId>(),
        g.num::<EdgeId>(),
        g.num::<FaceId>(),
        g.num::<VolumeId>(),
    ]
}

fn sorted_positions(dom: &Domain) -> Vec<[f64; 3]> {
    let mut out: Vec<[f64; 3]> = dom
        .grid()
        .all::<VertexId>()
        .map(|v| dom.position_of(v).unwrap())
        .collect();
    out.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .fold(Ordering::Equal, |o, (x, y)| o.then(x.total_cmp(y)))
    });
    out
}

fn cell_types(dom: &Domain) -> Vec<CellType> {
    let g = dom.grid();
    let mut out: Vec<CellType> = g
        .all::<FaceId>()
        .map(|f| g.face(f).unwrap().cell_type())
        .chain(g.all::<VolumeId>().map(|c| g.volume(c).unwrap().cell_type()))
        .collect();
    out.sort();
    out
}

fn num_constrained(dom: &Domain) -> usize {
    let g = dom.grid();
    g.objects(ElemFilter::all())
        .filter(|&o| g.is_constrained(o))
        .count()
}

#[test]
fn mixed_volume_grid_survives_a_file_roundtrip() {
    let mut dom = Domain::new(3, false);
    let v: Vec<VertexId> = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [0.0, 0.0, 2.0],
    ]
    .iter()
    .map(|p| dom.create_vertex_at(p).unwrap())
    .collect();
    let grid = dom.grid_mut();
    let prism = grid
        .create_volume(CellType::Prism, &[v[0], v[1], v[2], v[3], v[4], v[5]], None)
        .unwrap();
    let tet = grid
        .create_volume(CellType::Tetrahedron, &[v[3], v[4], v[5], v[6]], None)
        .unwrap();
    grid.set_subset(prism.into(), 0).unwrap();
    grid.set_subset(tet.into(), 1).unwrap();
    grid.set_subset_name(0, "bottom");
    grid.set_subset_name(1, "top");

    let back = save_and_load(&dom, "mixed");
    assert_eq!(counts(&back), counts(&dom));
    assert_eq!(cell_types(&back), cell_types(&dom));
    assert_eq!(sorted_positions(&back), sorted_positions(&dom));

    let g = back.grid();
    let names: Vec<&str> = g.subset_infos().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["bottom", "top"]);
    let per_subset = |s: i32| g.iter::<VolumeId>(ElemFilter::all().with_subset(s)).count();
    assert_eq!((per_subset(0), per_subset(1)), (1, 1));
    let tet_back = g
        .all::<VolumeId>()
        .find(|&c| g.volume(c).unwrap().cell_type() == CellType::Tetrahedron)
        .unwrap();
    assert_eq!(g.subset(tet_back.into()).unwrap(), 1);
}

#[test]
fn hanging_grid_keeps_its_constraints() {
    let (mut dom, faces) = quad_grid(2, 1, true);
    let mut refiner = hanging_node_domain_refiner(&dom, &SerialProcess).unwrap();
    refiner
        .mark(dom.grid(), faces[0].into(), RefinementMark::Regular)
        .unwrap();
    refiner.refine(dom.grid_mut()).unwrap();
    assert!(num_constrained(&dom) > 0);

    let back = save_and_load(&dom, "hanging");
    assert_eq!(counts(&back), counts(&dom));
    assert_eq!(num_constrained(&back), num_constrained(&dom));
    assert_eq!(sorted_positions(&back), sorted_positions(&dom));
    // all levels are written as one flat grid
    assert_eq!(back.grid().num_levels(), 1);
    assert_eq!(
        validate_constraints(back.grid(), InvariantHandling::Error),
        Ok(0)
    );

    let g = back.grid();
    let hanging: Vec<VertexId> = g
        .all::<VertexId>()
        .filter(|&v| g.is_constrained(v.into()))
        .collect();
    assert_eq!(hanging.len(), 1);
    let owner = g.constraining_object(hanging[0].into()).unwrap().unwrap();
    assert_eq!(owner.kind(), ElemKind::Edge);
    assert_eq!(
        g.hanging_local_coords(hanging[0].into()).unwrap(),
        Some([0.5, 0.0])
    );
}

#[test]
fn loading_a_missing_file_fails() {
    let path = temp_file("does_not_exist");
    let err = load_domain(&path, UgxReadOptions::default()).unwrap_err();
    assert!(matches!(err, GridError::FileNotFound(_)));
}

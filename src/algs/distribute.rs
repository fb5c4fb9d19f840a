//! Distribution layouts: which elements go to which process.
//!
//! [`create_distribution_layouts`] splits a (possibly multi-level) grid into
//! one node list per target process, for every element kind, and records the
//! interfaces that tie copies of the same element on different processes
//! together. No message is sent here; the layouts are consumed by
//! [`serialize_grid_and_layouts`](crate::algs::wire::serialize_grid_and_layouts).
//!
//! Elements are added in two passes:
//! 1. every element assigned to subset `i` becomes a primary node of
//!    layout `i`;
//! 2. each layout receives the sides (or, with
//!    [`DistributionOptions::distribute_genealogy`], the ancestors and their
//!    sides) of its primary nodes. An element that was claimed first by
//!    another layout produces a MASTER entry on the claiming layout and a
//!    SLAVE entry on the receiving one.
//!
//! The first claim of an element is shared across all four kinds, so an
//! element appears at most once among the primary nodes of all layouts.

use crate::mesh_error::GridError;
use crate::topology::grid::MultiGrid;
use crate::topology::iter::ElemFilter;
use crate::topology::point::{EdgeId, ElemHandle, ElemKind, FaceId, GeomObj, VertexId, VolumeId};
use crate::topology::subsets::SubsetAssignment;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Role of an interface entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InterfaceNodeType {
    Unknown,
    Master,
    Slave,
    VerticalMaster,
    VerticalSlave,
    Link,
}

impl InterfaceNodeType {
    pub const ALL: [InterfaceNodeType; 6] = [
        InterfaceNodeType::Unknown,
        InterfaceNodeType::Master,
        InterfaceNodeType::Slave,
        InterfaceNodeType::VerticalMaster,
        InterfaceNodeType::VerticalSlave,
        InterfaceNodeType::Link,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            InterfaceNodeType::Unknown => "unknown",
            InterfaceNodeType::Master => "master",
            InterfaceNodeType::Slave => "slave",
            InterfaceNodeType::VerticalMaster => "vertical master",
            InterfaceNodeType::VerticalSlave => "vertical slave",
            InterfaceNodeType::Link => "link",
        }
    }

    /// The role expected on the other side of the interface.
    pub const fn counterpart(self) -> Self {
        match self {
            InterfaceNodeType::Master => InterfaceNodeType::Slave,
            InterfaceNodeType::Slave => InterfaceNodeType::Master,
            InterfaceNodeType::VerticalMaster => InterfaceNodeType::VerticalSlave,
            InterfaceNodeType::VerticalSlave => InterfaceNodeType::VerticalMaster,
            other => other,
        }
    }

    /// Stable one-byte code used on the wire.
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

/// One interface entry: index into the owning layout's node list plus role.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceEntry {
    pub local_id: usize,
    pub node_type: InterfaceNodeType,
}

impl InterfaceEntry {
    pub fn new(local_id: usize, node_type: InterfaceNodeType) -> Self {
        Self {
            local_id,
            node_type,
        }
    }
}

/// Interfaces of one level, keyed by the connected layout index.
pub type InterfaceMap = BTreeMap<usize, Vec<InterfaceEntry>>;

/// Node list and per-level interfaces of one element kind for one process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionLayout<H> {
    nodes: Vec<H>,
    num_primary: usize,
    levels: Vec<InterfaceMap>,
}

impl<H> Default for DistributionLayout<H> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            num_primary: 0,
            levels: Vec::new(),
        }
    }
}

impl<H: ElemHandle> DistributionLayout<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes; interface entries index into this list.
    pub fn node_vec(&self) -> &[H] {
        &self.nodes
    }

    /// Nodes assigned directly through the subset assignment.
    pub fn primary_nodes(&self) -> &[H] {
        &self.nodes[..self.num_primary.min(self.nodes.len())]
    }

    pub fn node(&self, local_id: usize) -> Option<H> {
        self.nodes.get(local_id).copied()
    }

    /// Appends a node and returns its local index.
    pub fn push(&mut self, node: H) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn push_primary(&mut self, node: H) -> usize {
        debug_assert_eq!(self.nodes.len(), self.num_primary);
        self.num_primary += 1;
        self.push(node)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Grows or truncates the per-level interface maps.
    pub fn set_num_levels(&mut self, num_levels: usize) {
        self.levels.resize_with(num_levels, InterfaceMap::new);
    }

    /// Interface to layout `proc` on `level`; empty if none exists.
    pub fn interface(&self, proc: usize, level: usize) -> &[InterfaceEntry] {
        self.levels
            .get(level)
            .and_then(|m| m.get(&proc))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Interface to layout `proc` on `level`, created on demand.
    pub fn interface_mut(&mut self, proc: usize, level: usize) -> &mut Vec<InterfaceEntry> {
        if self.levels.len() <= level {
            self.set_num_levels(level + 1);
        }
        self.levels[level].entry(proc).or_default()
    }

    pub fn interface_map(&self, level: usize) -> Option<&InterfaceMap> {
        self.levels.get(level)
    }

    pub fn has_interface(&self, proc: usize, level: usize) -> bool {
        self.levels
            .get(level)
            .is_some_and(|m| m.contains_key(&proc))
    }

    /// Number of interface entries of all levels and processes.
    pub fn num_interface_entries(&self) -> usize {
        self.levels
            .iter()
            .flat_map(|m| m.values())
            .map(Vec::len)
            .sum()
    }
}

/// Element kinds that have a layout vector in [`DistributionLayouts`].
pub trait LayoutElem: ElemHandle {
    #[doc(hidden)]
    fn layouts(all: &DistributionLayouts) -> &[DistributionLayout<Self>];
}

macro_rules! layout_elem {
    ($handle:ty, $field:ident) => {
        impl LayoutElem for $handle {
            fn layouts(all: &DistributionLayouts) -> &[DistributionLayout<Self>] {
                &all.$field
            }
        }
    };
}

layout_elem!(VertexId, vertices);
layout_elem!(EdgeId, edges);
layout_elem!(FaceId, faces);
layout_elem!(VolumeId, volumes);

/// Layouts of all four kinds, one entry per target process.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionLayouts {
    pub vertices: Vec<DistributionLayout<VertexId>>,
    pub edges: Vec<DistributionLayout<EdgeId>>,
    pub faces: Vec<DistributionLayout<FaceId>>,
    pub volumes: Vec<DistributionLayout<VolumeId>>,
}

impl DistributionLayouts {
    fn with_procs(num_procs: usize) -> Self {
        Self {
            vertices: vec![DistributionLayout::default(); num_procs],
            edges: vec![DistributionLayout::default(); num_procs],
            faces: vec![DistributionLayout::default(); num_procs],
            volumes: vec![DistributionLayout::default(); num_procs],
        }
    }

    pub fn num_procs(&self) -> usize {
        self.vertices.len()
    }

    pub fn of_kind<H: LayoutElem>(&self) -> &[DistributionLayout<H>] {
        H::layouts(self)
    }

    /// Nodes of every kind held by layout `proc`, vertices first.
    pub fn nodes_of(&self, proc: usize) -> Vec<GeomObj> {
        let mut out = Vec::new();
        if proc >= self.num_procs() {
            return out;
        }
        out.extend(self.vertices[proc].node_vec().iter().map(|&h| GeomObj::from(h)));
        out.extend(self.edges[proc].node_vec().iter().map(|&h| GeomObj::from(h)));
        out.extend(self.faces[proc].node_vec().iter().map(|&h| GeomObj::from(h)));
        out.extend(self.volumes[proc].node_vec().iter().map(|&h| GeomObj::from(h)));
        out
    }

    fn push_node(&mut self, proc: usize, obj: GeomObj, primary: bool) -> usize {
        macro_rules! push {
            ($field:ident, $h:expr) => {
                if primary {
                    self.$field[proc].push_primary($h)
                } else {
                    self.$field[proc].push($h)
                }
            };
        }
        match obj {
            GeomObj::Vertex(h) => push!(vertices, h),
            GeomObj::Edge(h) => push!(edges, h),
            GeomObj::Face(h) => push!(faces, h),
            GeomObj::Volume(h) => push!(volumes, h),
        }
    }

    fn add_entry(
        &mut self,
        kind: ElemKind,
        proc: usize,
        target: usize,
        level: usize,
        entry: InterfaceEntry,
    ) {
        let intf = match kind {
            ElemKind::Vertex => self.vertices[proc].interface_mut(target, level),
            ElemKind::Edge => self.edges[proc].interface_mut(target, level),
            ElemKind::Face => self.faces[proc].interface_mut(target, level),
            ElemKind::Volume => self.volumes[proc].interface_mut(target, level),
        };
        intf.push(entry);
    }

    /// Aligns the number of interface levels of all layouts to `num_levels`.
    fn set_num_levels(&mut self, num_levels: usize) {
        for l in &mut self.vertices {
            l.set_num_levels(num_levels.max(l.num_levels()));
        }
        for l in &mut self.edges {
            l.set_num_levels(num_levels.max(l.num_levels()));
        }
        for l in &mut self.faces {
            l.set_num_levels(num_levels.max(l.num_levels()));
        }
        for l in &mut self.volumes {
            l.set_num_levels(num_levels.max(l.num_levels()));
        }
    }

    /// Runs [`test_distribution_layouts`] on all four kinds.
    pub fn test_all(&self, proc_map: Option<&[usize]>) -> bool {
        // no short-circuit: every kind reports its mismatches
        let results = [
            test_distribution_layouts(&self.vertices, proc_map),
            test_distribution_layouts(&self.edges, proc_map),
            test_distribution_layouts(&self.faces, proc_map),
            test_distribution_layouts(&self.volumes, proc_map),
        ];
        results.iter().all(|ok| *ok)
    }

    /// Runs [`check_interface_symmetry`] on all four kinds.
    pub fn check_symmetry(&self, proc_map: Option<&[usize]>) -> Result<(), GridError> {
        check_interface_symmetry(&self.vertices, proc_map)?;
        check_interface_symmetry(&self.edges, proc_map)?;
        check_interface_symmetry(&self.faces, proc_map)?;
        check_interface_symmetry(&self.volumes, proc_map)
    }
}

/// Options of [`create_distribution_layouts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionOptions {
    /// Send all ancestors of the distributed elements along; interfaces are
    /// then only built on the finest level.
    pub distribute_genealogy: bool,
    /// Copy elements whose parent lives on another process to the parent's
    /// process and link both copies through vertical interfaces. Ignored
    /// when the genealogy is distributed.
    pub create_vertical_interfaces: bool,
}

impl Default for DistributionOptions {
    fn default() -> Self {
        Self {
            distribute_genealogy: true,
            create_vertical_interfaces: false,
        }
    }
}

/// Answers whether an element already belongs to an interface of the running
/// parallel layout, e.g. after an earlier distribution.
pub trait InterfaceQuery {
    fn is_interface_element(&self, obj: GeomObj) -> bool;
}

impl InterfaceQuery for HashSet<GeomObj> {
    fn is_interface_element(&self, obj: GeomObj) -> bool {
        self.contains(&obj)
    }
}

/// First claim of an element: layout index and local index there.
#[derive(Copy, Clone, Debug)]
struct Claim {
    proc: usize,
    local_id: usize,
}

struct LayoutBuilder<'a> {
    layouts: DistributionLayouts,
    claims: HashMap<GeomObj, Claim>,
    existing: Option<&'a dyn InterfaceQuery>,
}

impl LayoutBuilder<'_> {
    /// Adds `obj` to layout `proc`. If another layout claimed it first, a
    /// master/slave pair is created on `level` unless interfaces are
    /// restricted to a different level or `obj` is in a genuine interface.
    fn add(&mut self, proc: usize, obj: GeomObj, level: usize, only_level: Option<usize>) {
        let Some(&claim) = self.claims.get(&obj) else {
            let local_id = self.layouts.push_node(proc, obj, false);
            self.claims.insert(obj, Claim { proc, local_id });
            return;
        };
        let local_id = self.layouts.push_node(proc, obj, false);
        if self.existing.is_some_and(|q| q.is_interface_element(obj)) {
            return;
        }
        if only_level.is_some_and(|l| l != level) {
            return;
        }
        let kind = obj.kind();
        self.layouts.add_entry(
            kind,
            claim.proc,
            proc,
            level,
            InterfaceEntry::new(claim.local_id, InterfaceNodeType::Master),
        );
        self.layouts.add_entry(
            kind,
            proc,
            claim.proc,
            level,
            InterfaceEntry::new(local_id, InterfaceNodeType::Slave),
        );
    }
}

/// Elements to send along with `primary`: their sides and, in genealogy
/// mode, all ancestors with their sides. Sorted by level, then kind.
fn associated_selection(
    grid: &MultiGrid,
    primary: &[GeomObj],
    genealogy: bool,
) -> Result<Vec<GeomObj>, GridError> {
    let primary_set: HashSet<GeomObj> = primary.iter().copied().collect();
    let mut selected: HashSet<GeomObj> = HashSet::new();
    let mut stack: Vec<GeomObj> = primary.to_vec();
    let mut seen: HashSet<GeomObj> = primary_set.clone();
    while let Some(obj) = stack.pop() {
        let mut next = grid.sides_of(obj)?;
        if genealogy {
            if let Some(p) = grid.parent(obj)? {
                next.push(p);
            }
        }
        for x in next {
            if seen.insert(x) {
                selected.insert(x);
                // sides of sides are already sides; only ancestors need expansion
                if genealogy {
                    stack.push(x);
                }
            }
        }
    }
    let mut out: Vec<(usize, GeomObj)> = selected
        .into_iter()
        .map(|x| grid.level(x).map(|l| (l, x)))
        .collect::<Result<_, _>>()?;
    out.sort_unstable();
    Ok(out.into_iter().map(|(_, x)| x).collect())
}

/// Builds the distribution layouts of `grid` for the partition described by
/// `subsets`: layout `i` receives the elements of subset `i`.
///
/// `existing` lists elements that are already part of a genuine interface;
/// such elements are copied but produce no new interface entries.
pub fn create_distribution_layouts(
    grid: &MultiGrid,
    subsets: &dyn SubsetAssignment,
    options: &DistributionOptions,
    existing: Option<&dyn InterfaceQuery>,
) -> Result<DistributionLayouts, GridError> {
    let num_procs = subsets.num_subsets(grid);
    let mut primary: Vec<Vec<GeomObj>> = vec![Vec::new(); num_procs];
    for obj in grid.objects(ElemFilter::all()) {
        let s = subsets.subset_of(grid, obj)?;
        if s < 0 {
            continue;
        }
        let bucket = primary
            .get_mut(s as usize)
            .ok_or(GridError::InvalidSubset {
                index: s,
                num_subsets: num_procs,
            })?;
        bucket.push(obj);
    }

    let mut builder = LayoutBuilder {
        layouts: DistributionLayouts::with_procs(num_procs),
        claims: HashMap::new(),
        existing,
    };

    for (proc, objs) in primary.iter().enumerate() {
        for &obj in objs {
            let local_id = builder.layouts.push_node(proc, obj, true);
            builder.claims.insert(obj, Claim { proc, local_id });
        }
    }

    let only_level = options
        .distribute_genealogy
        .then(|| grid.num_levels().saturating_sub(1));
    for (proc, objs) in primary.iter().enumerate() {
        let selection = associated_selection(grid, objs, options.distribute_genealogy)?;
        for obj in selection {
            let level = grid.level(obj)?;
            builder.add(proc, obj, level, only_level);
        }
    }

    if options.create_vertical_interfaces {
        if options.distribute_genealogy {
            log::warn!("vertical interfaces are not built when the genealogy is distributed");
        } else {
            add_vertical_interfaces(grid, &mut builder)?;
        }
    }

    let mut layouts = builder.layouts;
    layouts.set_num_levels(grid.num_levels());
    log::debug!(
        "distribution layouts for {} processes: {} vertices, {} edges, {} faces, {} volumes",
        num_procs,
        layouts.vertices.iter().map(|l| l.node_vec().len()).sum::<usize>(),
        layouts.edges.iter().map(|l| l.node_vec().len()).sum::<usize>(),
        layouts.faces.iter().map(|l| l.node_vec().len()).sum::<usize>(),
        layouts.volumes.iter().map(|l| l.node_vec().len()).sum::<usize>(),
    );
    Ok(layouts)
}

/// Copies every element whose parent is claimed by another layout, together
/// with its sides, to the parent's layout. The copy becomes a vertical
/// master, the original a vertical slave.
fn add_vertical_interfaces(grid: &MultiGrid, builder: &mut LayoutBuilder<'_>) -> Result<(), GridError> {
    let num_procs = builder.layouts.num_procs();
    let mut resident: Vec<HashMap<GeomObj, usize>> = Vec::with_capacity(num_procs);
    for proc in 0..num_procs {
        resident.push(
            builder
                .layouts
                .nodes_of(proc)
                .into_iter()
                .enumerate()
                .map(|(i, obj)| (obj, local_index(&builder.layouts, proc, obj, i)))
                .collect(),
        );
    }
    let mut copies: HashMap<(usize, GeomObj), usize> = HashMap::new();
    let mut linked: HashSet<(usize, usize, GeomObj)> = HashSet::new();

    for proc in 0..num_procs {
        let mut nodes = builder.layouts.nodes_of(proc);
        nodes.sort_by_key(|&obj| (grid.level(obj).unwrap_or(0), obj));
        for obj in nodes {
            let Some(parent) = grid.parent(obj)? else {
                continue;
            };
            let Some(owner) = builder.claims.get(&parent).map(|c| c.proc) else {
                continue;
            };
            if owner == proc {
                continue;
            }
            let mut family = vec![obj];
            family.extend(grid.sides_of(obj)?);
            for x in family {
                if resident[owner].contains_key(&x) || !linked.insert((owner, proc, x)) {
                    continue;
                }
                let Some(&slave_id) = resident[proc].get(&x) else {
                    continue;
                };
                let master_id = match copies.get(&(owner, x)) {
                    Some(&id) => id,
                    None => {
                        let id = builder.layouts.push_node(owner, x, false);
                        copies.insert((owner, x), id);
                        id
                    }
                };
                let level = grid.level(x)?;
                builder.layouts.add_entry(
                    x.kind(),
                    owner,
                    proc,
                    level,
                    InterfaceEntry::new(master_id, InterfaceNodeType::VerticalMaster),
                );
                builder.layouts.add_entry(
                    x.kind(),
                    proc,
                    owner,
                    level,
                    InterfaceEntry::new(slave_id, InterfaceNodeType::VerticalSlave),
                );
            }
        }
    }
    Ok(())
}

/// Local index of `obj` in its kind's node list of layout `proc`, given its
/// position `i` in [`DistributionLayouts::nodes_of`].
fn local_index(layouts: &DistributionLayouts, proc: usize, obj: GeomObj, i: usize) -> usize {
    let before = match obj.kind() {
        ElemKind::Vertex => 0,
        ElemKind::Edge => layouts.vertices[proc].node_vec().len(),
        ElemKind::Face => {
            layouts.vertices[proc].node_vec().len() + layouts.edges[proc].node_vec().len()
        }
        ElemKind::Volume => {
            layouts.vertices[proc].node_vec().len()
                + layouts.edges[proc].node_vec().len()
                + layouts.faces[proc].node_vec().len()
        }
    };
    i - before
}

/// Number of entries with role `node_type` in `interface`.
pub fn num_entries_of_type(node_type: InterfaceNodeType, interface: &[InterfaceEntry]) -> usize {
    interface
        .iter()
        .filter(|e| e.node_type == node_type)
        .count()
}

fn proc_id(proc_map: Option<&[usize]>, layout: usize) -> usize {
    proc_map
        .and_then(|m| m.get(layout).copied())
        .unwrap_or(layout)
}

/// First asymmetric role pair between two layouts, as an error.
fn first_mismatch<H: ElemHandle>(
    layouts: &[DistributionLayout<H>],
    proc_map: Option<&[usize]>,
) -> Vec<GridError> {
    let mut found = Vec::new();
    for (cur, layout) in layouts.iter().enumerate() {
        for (level, map) in layout.levels.iter().enumerate() {
            for (&con, intf) in map {
                if con == cur {
                    continue;
                }
                let con_intf = layouts
                    .get(con)
                    .map_or(&[][..], |l| l.interface(cur, level));
                for role in [InterfaceNodeType::Master, InterfaceNodeType::VerticalMaster] {
                    let count_a = num_entries_of_type(role, intf);
                    let count_b = num_entries_of_type(role.counterpart(), con_intf);
                    if count_a != count_b {
                        found.push(GridError::InterfaceMismatch {
                            kind: H::KIND,
                            level,
                            proc_a: proc_id(proc_map, cur),
                            proc_b: proc_id(proc_map, con),
                            role_a: role.name(),
                            role_b: role.counterpart().name(),
                            count_a,
                            count_b,
                        });
                    }
                }
                // slaves without any interface back to a master
                if con >= layouts.len() || !layouts[con].has_interface(cur, level) {
                    for role in [InterfaceNodeType::Slave, InterfaceNodeType::VerticalSlave] {
                        let count_a = num_entries_of_type(role, intf);
                        if count_a > 0 {
                            found.push(GridError::InterfaceMismatch {
                                kind: H::KIND,
                                level,
                                proc_a: proc_id(proc_map, cur),
                                proc_b: proc_id(proc_map, con),
                                role_a: role.name(),
                                role_b: role.counterpart().name(),
                                count_a,
                                count_b: 0,
                            });
                        }
                    }
                }
            }
        }
    }
    found
}

/// Checks that for every pair of layouts and every level the number of
/// masters on one side equals the number of slaves on the other (and the
/// same for vertical roles). Every mismatch is logged as a warning.
pub fn test_distribution_layouts<H: ElemHandle>(
    layouts: &[DistributionLayout<H>],
    proc_map: Option<&[usize]>,
) -> bool {
    log::debug!("testing {} {} distribution layouts", layouts.len(), H::KIND);
    let mismatches = first_mismatch(layouts, proc_map);
    for m in &mismatches {
        log::warn!("{m}");
    }
    mismatches.is_empty()
}

/// Like [`test_distribution_layouts`], but returns the first mismatch.
pub fn check_interface_symmetry<H: ElemHandle>(
    layouts: &[DistributionLayout<H>],
    proc_map: Option<&[usize]>,
) -> Result<(), GridError> {
    match first_mismatch(layouts, proc_map).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

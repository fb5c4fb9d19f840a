//! Fixed, versioned, little-endian stream of a grid part and its interfaces.
//!
//! [`serialize_grid_and_layouts`] writes the elements of one target process
//! (as selected by a [`DistributionLayouts`]) followed by the interfaces of
//! that process; [`deserialize_grid_and_layouts`] rebuilds an independent
//! grid from such a stream together with a [`GridLayoutMap`].
//!
//! Stream layout:
//! ```text
//! WireHdr(GRID)  WireCount(levels)
//!   per level, per kind: WireCount(n)  n x WireElem
//! WireCount(n)  n x WirePos            (0 = no positions)
//! WireCount(n)  n x WireConstraint
//! WireHdr(INTERFACES)
//!   per kind: WireCount(levels)
//!     per level: WireCount(n)  n x (WireIntf  count x WireIntfEntry)
//! ```
//! Elements are numbered per kind in stream order; parents always precede
//! their children, corners precede the elements using them.

use crate::algs::distribute::{
    DistributionLayout, DistributionLayouts, InterfaceNodeType, InterfaceQuery,
};
use crate::data::attachment::Attachment;
use crate::data::domain::Position;
use crate::mesh_error::GridError;
use crate::topology::cell_type::CellType;
use crate::topology::grid::MultiGrid;
use crate::topology::point::{ElemHandle, ElemKind, GeomObj, VertexId};
use bytemuck::{Pod, Zeroable};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Header kind of the element section.
pub const KIND_GRID: u16 = 1;
/// Header kind of the interface section.
pub const KIND_INTERFACES: u16 = 2;

/// Kind byte meaning "no element".
const NO_KIND: u8 = u8::MAX;

/// Maximal number of corners of a cell (hexahedron).
const MAX_CORNERS: usize = 8;

// All multi-byte integers in these structs are **little-endian** on the wire.
// They are stored pre-LE with `.to_le()` and decoded with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32, // keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }

    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }

    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// One element. Vertices leave `cell` and the corners zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireElem {
    pub subset_le: i32,
    /// Stream index of the parent plus one; zero if the parent is not sent.
    pub parent_le: u32,
    pub parent_kind: u8,
    pub cell: u8,
    pub num_corners: u8,
    pub _pad: u8,
    pub corners_le: [u32; MAX_CORNERS],
}

impl WireElem {
    fn parent(&self) -> Option<(u8, usize)> {
        match u32::from_le(self.parent_le) {
            0 => None,
            p => Some((self.parent_kind, p as usize - 1)),
        }
    }

    fn corners(&self) -> impl Iterator<Item = usize> + '_ {
        let n = (self.num_corners as usize).min(MAX_CORNERS);
        self.corners_le[..n].iter().map(|c| u32::from_le(*c) as usize)
    }
}

/// Vertex coordinates as raw `f64` bits.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePos {
    pub xyz_le: [u64; 3],
}

impl WirePos {
    pub fn new(p: &Position) -> Self {
        Self {
            xyz_le: p.map(|x| x.to_bits().to_le()),
        }
    }

    pub fn get(&self) -> Position {
        self.xyz_le.map(|x| f64::from_bits(u64::from_le(x)))
    }
}

/// A constraint link. `constrained_kind == NO_KIND` marks a constraining
/// element whose constrained objects are not part of the stream.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireConstraint {
    pub constrained_le: u32,
    pub constraining_le: u32,
    pub constrained_kind: u8,
    pub constraining_kind: u8,
    pub _pad: [u8; 6],
    pub local_le: [u64; 2],
}

/// Header of one interface: connected process and number of entries.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireIntf {
    pub proc_le: u32,
    pub count_le: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireIntfEntry {
    pub local_le: u32,
    pub node_type: u8,
    pub _pad: [u8; 3],
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireHdr>() == 8);
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireElem>() == 44);
    assert!(size_of::<WirePos>() == 24);
    assert!(size_of::<WireConstraint>() == 32);
    assert!(align_of::<WireConstraint>() == 8);
    assert!(size_of::<WireIntf>() == 8);
    assert!(size_of::<WireIntfEntry>() == 8);
};

fn write_pod<W: Write, T: Pod>(out: &mut W, value: &T) -> Result<(), GridError> {
    out.write_all(bytemuck::bytes_of(value))?;
    Ok(())
}

fn read_pod<R: Read, T: Pod>(input: &mut R) -> Result<T, GridError> {
    let mut value = T::zeroed();
    input
        .read_exact(bytemuck::bytes_of_mut(&mut value))
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                GridError::WireFormat("unexpected end of stream".into())
            }
            _ => GridError::from(e),
        })?;
    Ok(value)
}

fn read_hdr<R: Read>(input: &mut R, kind: u16) -> Result<(), GridError> {
    let hdr: WireHdr = read_pod(input)?;
    if hdr.version() != WIRE_VERSION {
        return Err(GridError::WireFormat(format!(
            "unsupported version {} (expected {WIRE_VERSION})",
            hdr.version()
        )));
    }
    if hdr.kind() != kind {
        return Err(GridError::WireFormat(format!(
            "expected section {kind}, found {}",
            hdr.kind()
        )));
    }
    Ok(())
}

fn to_u32(n: usize, what: &str) -> Result<u32, GridError> {
    u32::try_from(n).map_err(|_| GridError::WireFormat(format!("{what} {n} exceeds 32 bits")))
}

fn kind_code(kind: ElemKind) -> u8 {
    kind.dim() as u8
}

fn kind_from_code(code: u8) -> Result<ElemKind, GridError> {
    ElemKind::from_dim(code as usize)
        .ok_or_else(|| GridError::WireFormat(format!("invalid element kind {code}")))
}

const CELL_CODES: [CellType; 8] = [
    CellType::Vertex,
    CellType::Segment,
    CellType::Triangle,
    CellType::Quadrilateral,
    CellType::Tetrahedron,
    CellType::Hexahedron,
    CellType::Prism,
    CellType::Pyramid,
];

fn cell_code(cell: CellType) -> u8 {
    CELL_CODES.iter().position(|c| *c == cell).unwrap_or(0) as u8
}

fn cell_from_code(code: u8, kind: ElemKind) -> Result<CellType, GridError> {
    CELL_CODES
        .get(code as usize)
        .copied()
        .filter(|c| c.kind() == kind)
        .ok_or_else(|| GridError::WireFormat(format!("invalid {kind} cell type {code}")))
}

/// Stream numbering of the elements sent to one process.
struct StreamIndex {
    /// Elements per level, each level in kind order.
    by_level: Vec<[Vec<GeomObj>; 4]>,
    index: HashMap<GeomObj, usize>,
}

impl StreamIndex {
    fn new(grid: &MultiGrid, nodes: Vec<GeomObj>) -> Result<Self, GridError> {
        let mut sorted: Vec<(usize, GeomObj)> = Vec::with_capacity(nodes.len());
        let mut seen = HashSet::new();
        for obj in nodes {
            if seen.insert(obj) {
                sorted.push((grid.level(obj)?, obj));
            }
        }
        sorted.sort_unstable_by_key(|&(level, obj)| (level, obj.kind(), obj));

        let mut by_level: Vec<[Vec<GeomObj>; 4]> = Vec::new();
        let mut counters = [0usize; 4];
        let mut index = HashMap::with_capacity(sorted.len());
        for (level, obj) in sorted {
            if by_level.len() <= level {
                by_level.resize_with(level + 1, Default::default);
            }
            let k = obj.kind().dim();
            by_level[level][k].push(obj);
            index.insert(obj, counters[k]);
            counters[k] += 1;
        }
        Ok(Self { by_level, index })
    }

    fn get(&self, obj: GeomObj) -> Option<usize> {
        self.index.get(&obj).copied()
    }

    fn vertices(&self) -> impl Iterator<Item = GeomObj> + '_ {
        self.by_level
            .iter()
            .flat_map(|kinds| kinds[ElemKind::Vertex.dim()].iter().copied())
    }

    fn all(&self) -> impl Iterator<Item = GeomObj> + '_ {
        self.by_level.iter().flat_map(|kinds| kinds.iter().flatten().copied())
    }
}

fn elem_record(grid: &MultiGrid, idx: &StreamIndex, obj: GeomObj) -> Result<WireElem, GridError> {
    let mut rec = WireElem::zeroed();
    rec.subset_le = grid.subset(obj)?.to_le();
    rec.parent_kind = NO_KIND;
    if let Some(p) = grid.parent(obj)? {
        if let Some(i) = idx.get(p) {
            rec.parent_le = (to_u32(i, "parent index")? + 1).to_le();
            rec.parent_kind = kind_code(p.kind());
        }
    }
    let cell = match obj {
        GeomObj::Vertex(_) => return Ok(rec),
        GeomObj::Edge(_) => CellType::Segment,
        GeomObj::Face(f) => grid.face(f)?.cell_type(),
        GeomObj::Volume(c) => grid.volume(c)?.cell_type(),
    };
    rec.cell = cell_code(cell);
    let corners = grid.vertices_of(obj)?;
    rec.num_corners = corners.len() as u8;
    for (slot, v) in rec.corners_le.iter_mut().zip(&corners) {
        let i = idx.get((*v).into()).ok_or_else(|| {
            GridError::WireFormat(format!("corner {v} of {obj} is not part of the stream"))
        })?;
        *slot = to_u32(i, "corner index")?.to_le();
    }
    Ok(rec)
}

fn constraint_records(grid: &MultiGrid, idx: &StreamIndex) -> Result<Vec<WireConstraint>, GridError> {
    let mut out = Vec::new();
    for obj in idx.all() {
        if grid.is_constraining(obj) {
            let listed = grid
                .constrained_objects(obj)?
                .iter()
                .any(|c| idx.get(*c).is_some());
            if !listed {
                let mut rec = WireConstraint::zeroed();
                rec.constraining_le = to_u32(idx.get(obj).unwrap_or(0), "index")?.to_le();
                rec.constraining_kind = kind_code(obj.kind());
                rec.constrained_kind = NO_KIND;
                out.push(rec);
            }
        }
        let Some(parent) = grid.constraining_object(obj)? else {
            continue;
        };
        let (Some(i), Some(p)) = (idx.get(obj), idx.get(parent)) else {
            log::debug!("constraint of {obj} by {parent} crosses the stream boundary");
            continue;
        };
        let local = grid.hanging_local_coords(obj)?.unwrap_or([0.0; 2]);
        out.push(WireConstraint {
            constrained_le: to_u32(i, "index")?.to_le(),
            constraining_le: to_u32(p, "index")?.to_le(),
            constrained_kind: kind_code(obj.kind()),
            constraining_kind: kind_code(parent.kind()),
            _pad: [0; 6],
            local_le: local.map(|x| x.to_bits().to_le()),
        });
    }
    Ok(out)
}

fn write_interfaces<W: Write, H: ElemHandle>(
    out: &mut W,
    layout: &DistributionLayout<H>,
    idx: &StreamIndex,
    proc_map: Option<&[usize]>,
) -> Result<(), GridError> {
    write_pod(out, &WireCount::new(layout.num_levels()))?;
    for level in 0..layout.num_levels() {
        let Some(map) = layout.interface_map(level) else {
            write_pod(out, &WireCount::new(0))?;
            continue;
        };
        write_pod(out, &WireCount::new(map.len()))?;
        for (&target, entries) in map {
            let proc = match proc_map {
                Some(m) => *m.get(target).ok_or(GridError::InvalidSubset {
                    index: target as i32,
                    num_subsets: m.len(),
                })?,
                None => target,
            };
            write_pod(
                out,
                &WireIntf {
                    proc_le: to_u32(proc, "process")?.to_le(),
                    count_le: to_u32(entries.len(), "interface size")?.to_le(),
                },
            )?;
            for e in entries {
                let node = layout.node(e.local_id).ok_or_else(|| {
                    GridError::WireFormat(format!("interface entry {} out of range", e.local_id))
                })?;
                let i = idx.get(node.into()).ok_or_else(|| {
                    GridError::WireFormat(format!("interface element {node:?} is not selected"))
                })?;
                write_pod(
                    out,
                    &WireIntfEntry {
                        local_le: to_u32(i, "index")?.to_le(),
                        node_type: e.node_type.code(),
                        _pad: [0; 3],
                    },
                )?;
            }
        }
    }
    Ok(())
}

/// Writes the elements of layout `proc` and its interfaces to `out`.
///
/// Interface process ids are translated through `proc_map` (layout index to
/// process) if given. Vertex coordinates are included when `positions` is
/// given. No other attachment is written.
pub fn serialize_grid_and_layouts<W: Write>(
    out: &mut W,
    grid: &MultiGrid,
    layouts: &DistributionLayouts,
    proc: usize,
    positions: Option<Attachment<VertexId, Position>>,
    proc_map: Option<&[usize]>,
) -> Result<(), GridError> {
    if proc >= layouts.num_procs() {
        return Err(GridError::InvalidSubset {
            index: proc as i32,
            num_subsets: layouts.num_procs(),
        });
    }
    let idx = StreamIndex::new(grid, layouts.nodes_of(proc))?;

    write_pod(out, &WireHdr::new(KIND_GRID))?;
    write_pod(out, &WireCount::new(idx.by_level.len()))?;
    for kinds in &idx.by_level {
        for objs in kinds {
            write_pod(out, &WireCount::new(objs.len()))?;
            for &obj in objs {
                write_pod(out, &elem_record(grid, &idx, obj)?)?;
            }
        }
    }

    match positions {
        Some(att) => {
            let acc = grid.accessor(att)?;
            let vertices: Vec<GeomObj> = idx.vertices().collect();
            write_pod(out, &WireCount::new(vertices.len()))?;
            for v in vertices {
                write_pod(out, &WirePos::new(acc.get_obj(v)?))?;
            }
        }
        None => write_pod(out, &WireCount::new(0))?,
    }

    let constraints = constraint_records(grid, &idx)?;
    write_pod(out, &WireCount::new(constraints.len()))?;
    for rec in &constraints {
        write_pod(out, rec)?;
    }

    write_pod(out, &WireHdr::new(KIND_INTERFACES))?;
    write_interfaces(out, &layouts.vertices[proc], &idx, proc_map)?;
    write_interfaces(out, &layouts.edges[proc], &idx, proc_map)?;
    write_interfaces(out, &layouts.faces[proc], &idx, proc_map)?;
    write_interfaces(out, &layouts.volumes[proc], &idx, proc_map)?;

    log::debug!(
        "serialized {} elements and {} constraint links for process {}",
        idx.index.len(),
        constraints.len(),
        proc_map.and_then(|m| m.get(proc).copied()).unwrap_or(proc)
    );
    Ok(())
}

/// Interfaces of a received grid part, by element kind and role.
#[derive(Clone, Debug, Default)]
pub struct GridLayoutMap {
    layouts: BTreeMap<(ElemKind, InterfaceNodeType), Vec<BTreeMap<usize, Vec<GeomObj>>>>,
    members: HashSet<GeomObj>,
}

impl GridLayoutMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `obj` to the `role` interface towards `proc` on `level`.
    pub fn insert(
        &mut self,
        role: InterfaceNodeType,
        level: usize,
        proc: usize,
        obj: GeomObj,
    ) {
        let levels = self.layouts.entry((obj.kind(), role)).or_default();
        if levels.len() <= level {
            levels.resize_with(level + 1, BTreeMap::new);
        }
        levels[level].entry(proc).or_default().push(obj);
        self.members.insert(obj);
    }

    pub fn has_layout(&self, kind: ElemKind, role: InterfaceNodeType) -> bool {
        self.layouts.contains_key(&(kind, role))
    }

    pub fn num_levels(&self, kind: ElemKind, role: InterfaceNodeType) -> usize {
        self.layouts.get(&(kind, role)).map_or(0, Vec::len)
    }

    /// Elements of the `role` interface towards `proc` on `level`.
    pub fn interface(
        &self,
        kind: ElemKind,
        role: InterfaceNodeType,
        level: usize,
        proc: usize,
    ) -> &[GeomObj] {
        self.layouts
            .get(&(kind, role))
            .and_then(|levels| levels.get(level))
            .and_then(|m| m.get(&proc))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Processes connected through `role` interfaces on `level`.
    pub fn interface_procs(&self, kind: ElemKind, role: InterfaceNodeType, level: usize) -> Vec<usize> {
        self.layouts
            .get(&(kind, role))
            .and_then(|levels| levels.get(level))
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl InterfaceQuery for GridLayoutMap {
    fn is_interface_element(&self, obj: GeomObj) -> bool {
        self.members.contains(&obj)
    }
}

/// A grid part rebuilt from a stream.
#[derive(Debug)]
pub struct ReceivedGrid {
    pub grid: MultiGrid,
    /// Vertex coordinates, if the stream carried them.
    pub positions: Option<Attachment<VertexId, Position>>,
    pub layout_map: GridLayoutMap,
}

fn resolve(created: &[Vec<GeomObj>; 4], kind: ElemKind, i: usize) -> Result<GeomObj, GridError> {
    created[kind.dim()]
        .get(i)
        .copied()
        .ok_or_else(|| GridError::WireFormat(format!("{kind} index {i} out of range")))
}

fn create_element(
    grid: &mut MultiGrid,
    created: &[Vec<GeomObj>; 4],
    kind: ElemKind,
    level: usize,
    rec: &WireElem,
) -> Result<GeomObj, GridError> {
    let parent = match rec.parent() {
        Some((code, i)) => Some(resolve(created, kind_from_code(code)?, i)?),
        None => None,
    };
    if let Some(p) = parent {
        let parent_level = grid.level(p)?;
        if parent_level + 1 != level {
            return Err(GridError::WireFormat(format!(
                "parent {p} on level {parent_level} of an element on level {level}"
            )));
        }
    }
    let subset = i32::from_le(rec.subset_le);
    let corners: Vec<VertexId> = rec
        .corners()
        .map(|i| {
            resolve(created, ElemKind::Vertex, i)?
                .cast::<VertexId>()
                .ok_or_else(|| GridError::WireFormat("corner is not a vertex".into()))
        })
        .collect::<Result<_, _>>()?;
    let obj: GeomObj = match kind {
        ElemKind::Vertex => match parent {
            Some(p) => grid.create_vertex(Some(p))?.into(),
            None => grid.create_vertex_on_level(level).into(),
        },
        ElemKind::Edge => {
            let &[a, b] = corners.as_slice() else {
                return Err(GridError::WireFormat("edge without two corners".into()));
            };
            grid.create_edge_on_level([a, b], level, parent, subset)?.into()
        }
        ElemKind::Face => {
            let cell = cell_from_code(rec.cell, kind)?;
            grid.create_face_on_level(cell, &corners, level, parent, subset)?
                .into()
        }
        ElemKind::Volume => {
            let cell = cell_from_code(rec.cell, kind)?;
            grid.create_volume_on_level(cell, &corners, level, parent, subset)?
                .into()
        }
    };
    grid.set_subset(obj, subset)?;
    Ok(obj)
}

fn read_interfaces<R: Read>(
    input: &mut R,
    kind: ElemKind,
    created: &[Vec<GeomObj>; 4],
    map: &mut GridLayoutMap,
) -> Result<(), GridError> {
    let num_levels = read_pod::<_, WireCount>(input)?.get();
    for level in 0..num_levels {
        let num_intf = read_pod::<_, WireCount>(input)?.get();
        for _ in 0..num_intf {
            let intf: WireIntf = read_pod(input)?;
            let proc = u32::from_le(intf.proc_le) as usize;
            for _ in 0..u32::from_le(intf.count_le) {
                let entry: WireIntfEntry = read_pod(input)?;
                let role = InterfaceNodeType::from_code(entry.node_type).ok_or_else(|| {
                    GridError::WireFormat(format!("invalid interface role {}", entry.node_type))
                })?;
                let obj = resolve(created, kind, u32::from_le(entry.local_le) as usize)?;
                map.insert(role, level, proc, obj);
            }
        }
    }
    Ok(())
}

/// Rebuilds a grid part and its interfaces from a stream written by
/// [`serialize_grid_and_layouts`].
///
/// Elements whose parents were not sent become roots on their original
/// level; validate such grids with
/// [`ValidationOptions::allow_parentless_levels`](crate::topology::validation::ValidationOptions).
/// On error the partially built grid is dropped.
pub fn deserialize_grid_and_layouts<R: Read>(input: &mut R) -> Result<ReceivedGrid, GridError> {
    let mut grid = MultiGrid::new();
    let mut created: [Vec<GeomObj>; 4] = Default::default();

    read_hdr(input, KIND_GRID)?;
    let num_levels = read_pod::<_, WireCount>(input)?.get();
    for level in 0..num_levels {
        for kind in ElemKind::ALL {
            let n = read_pod::<_, WireCount>(input)?.get();
            for _ in 0..n {
                let rec: WireElem = read_pod(input)?;
                let obj = create_element(&mut grid, &created, kind, level, &rec)?;
                created[kind.dim()].push(obj);
            }
        }
    }

    let num_positions = read_pod::<_, WireCount>(input)?.get();
    let positions = if num_positions > 0 {
        let vertices = &created[ElemKind::Vertex.dim()];
        if num_positions != vertices.len() {
            return Err(GridError::WireFormat(format!(
                "{num_positions} positions for {} vertices",
                vertices.len()
            )));
        }
        let att = grid.attach::<VertexId, Position>([0.0; 3]);
        let mut pos = Vec::with_capacity(num_positions);
        for _ in 0..num_positions {
            pos.push(read_pod::<_, WirePos>(input)?.get());
        }
        let mut acc = grid.accessor_mut(att)?;
        for (&v, p) in vertices.iter().zip(pos) {
            *acc.get_obj_mut(v)? = p;
        }
        Some(att)
    } else {
        None
    };

    let num_constraints = read_pod::<_, WireCount>(input)?.get();
    for _ in 0..num_constraints {
        let rec: WireConstraint = read_pod(input)?;
        let constraining = resolve(
            &created,
            kind_from_code(rec.constraining_kind)?,
            u32::from_le(rec.constraining_le) as usize,
        )?;
        if rec.constrained_kind == NO_KIND {
            grid.make_constraining(constraining)?;
            continue;
        }
        let constrained = resolve(
            &created,
            kind_from_code(rec.constrained_kind)?,
            u32::from_le(rec.constrained_le) as usize,
        )?;
        let local = rec.local_le.map(|x| f64::from_bits(u64::from_le(x)));
        grid.make_constrained(constrained, Some(constraining), local)?;
    }

    read_hdr(input, KIND_INTERFACES)?;
    let mut layout_map = GridLayoutMap::new();
    for kind in ElemKind::ALL {
        read_interfaces(input, kind, &created, &mut layout_map)?;
    }

    log::debug!(
        "deserialized {} elements on {} levels",
        grid.num_elements(),
        grid.num_levels()
    );
    Ok(ReceivedGrid {
        grid,
        positions,
        layout_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::distribute::{DistributionOptions, create_distribution_layouts};
    use crate::topology::iter::ElemFilter;
    use crate::topology::point::{EdgeId, FaceId};
    use crate::topology::refine::{HangingNodeRefiner, RefinementMark, Refiner};
    use crate::topology::subsets::GridSubsets;
    use crate::topology::validation::{ValidationOptions, validate_grid};

    fn two_triangles() -> (MultiGrid, Attachment<VertexId, Position>, [FaceId; 2]) {
        let mut grid = MultiGrid::new();
        let pos = grid.attach::<VertexId, Position>([0.0; 3]);
        let coords = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let mut v = Vec::new();
        for c in coords {
            let x = grid.create_vertex(None).unwrap();
            grid.accessor_mut(pos).unwrap()[x] = [c[0], c[1], 0.0];
            v.push(x);
        }
        let f0 = grid
            .create_face(CellType::Triangle, &[v[0], v[1], v[2]], None)
            .unwrap();
        let f1 = grid
            .create_face(CellType::Triangle, &[v[1], v[3], v[2]], None)
            .unwrap();
        (grid, pos, [f0, f1])
    }

    #[test]
    fn header_roundtrip() {
        let hdr = WireHdr::new(KIND_GRID);
        let bytes = bytemuck::bytes_of(&hdr).to_vec();
        let back: WireHdr = read_pod(&mut bytes.as_slice()).unwrap();
        assert_eq!(back.version(), WIRE_VERSION);
        assert_eq!(back.kind(), KIND_GRID);
    }

    #[test]
    fn process_part_roundtrip() {
        let (mut grid, pos, f) = two_triangles();
        grid.set_subset(f[0].into(), 0).unwrap();
        grid.set_subset(f[1].into(), 1).unwrap();
        let layouts =
            create_distribution_layouts(&grid, &GridSubsets, &DistributionOptions::default(), None)
                .unwrap();

        let mut buf = Vec::new();
        serialize_grid_and_layouts(&mut buf, &grid, &layouts, 1, Some(pos), Some(&[3, 5]))
            .unwrap();
        let received = deserialize_grid_and_layouts(&mut buf.as_slice()).unwrap();
        let g = &received.grid;
        assert_eq!(g.num::<VertexId>(), 3);
        assert_eq!(g.num::<EdgeId>(), 3);
        assert_eq!(g.num::<FaceId>(), 1);
        assert_eq!(g.num_subsets(), 2);

        // v1 and v2 are slaves of process 3 (layout 0)
        let slaves = received
            .layout_map
            .interface(ElemKind::Vertex, InterfaceNodeType::Slave, 0, 3);
        assert_eq!(slaves.len(), 2);
        assert!(received.layout_map.is_interface_element(slaves[0]));
        assert_eq!(
            received
                .layout_map
                .interface_procs(ElemKind::Edge, InterfaceNodeType::Slave, 0),
            vec![3]
        );

        let att = received.positions.unwrap();
        let acc = g.accessor(att).unwrap();
        let mut coords: Vec<Position> = g.all::<VertexId>().map(|v| acc[v]).collect();
        coords.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(coords, vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]]);
    }

    #[test]
    fn hanging_nodes_survive_the_stream() {
        let (mut grid, pos, f) = two_triangles();
        grid.set_subset(f[0].into(), 0).unwrap();
        grid.set_subset(f[1].into(), 0).unwrap();
        let mut refiner = HangingNodeRefiner::new(&grid);
        refiner
            .mark(&grid, f[0].into(), RefinementMark::Regular)
            .unwrap();
        refiner.refine(&mut grid).unwrap();
        let constrained = grid
            .objects(ElemFilter::all())
            .filter(|&o| grid.is_constrained(o))
            .count();
        assert_eq!(constrained, 3);

        let layouts =
            create_distribution_layouts(&grid, &GridSubsets, &DistributionOptions::default(), None)
                .unwrap();
        let mut buf = Vec::new();
        serialize_grid_and_layouts(&mut buf, &grid, &layouts, 0, Some(pos), None).unwrap();
        let received = deserialize_grid_and_layouts(&mut buf.as_slice()).unwrap();
        let g = &received.grid;
        assert_eq!(g.num_elements(), grid.num_elements());
        assert_eq!(g.num_levels(), 2);
        assert_eq!(
            g.objects(ElemFilter::all())
                .filter(|&o| g.is_constrained(o))
                .count(),
            3
        );
        validate_grid(g, ValidationOptions::all()).unwrap();
    }

    #[test]
    fn parentless_parts_need_relaxed_validation() {
        let (mut grid, _, f) = two_triangles();
        grid.set_subset(f[0].into(), 0).unwrap();
        grid.set_subset(f[1].into(), 1).unwrap();
        let mut refiner = crate::topology::refine::GlobalRefiner::new(&grid);
        let leaves: Vec<GeomObj> = grid.objects(ElemFilter::leaves()).collect();
        for obj in leaves {
            refiner.mark(&grid, obj, RefinementMark::Regular).unwrap();
        }
        refiner.refine(&mut grid).unwrap();
        let coarse: Vec<GeomObj> = grid.objects(ElemFilter::level(0)).collect();
        for obj in coarse {
            grid.set_subset(obj, -1).unwrap();
        }
        let options = DistributionOptions {
            distribute_genealogy: false,
            create_vertical_interfaces: false,
        };
        let layouts = create_distribution_layouts(&grid, &GridSubsets, &options, None).unwrap();
        let mut buf = Vec::new();
        serialize_grid_and_layouts(&mut buf, &grid, &layouts, 0, None, None).unwrap();
        let received = deserialize_grid_and_layouts(&mut buf.as_slice()).unwrap();
        assert!(received.positions.is_none());
        assert_eq!(received.grid.num_on_level::<FaceId>(1), 4);
        assert!(validate_grid(&received.grid, ValidationOptions::all()).is_err());
        let relaxed = ValidationOptions {
            allow_parentless_levels: true,
            ..ValidationOptions::all()
        };
        validate_grid(&received.grid, relaxed).unwrap();
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let (mut grid, _, f) = two_triangles();
        grid.set_subset(f[0].into(), 0).unwrap();
        let layouts =
            create_distribution_layouts(&grid, &GridSubsets, &DistributionOptions::default(), None)
                .unwrap();
        let mut buf = Vec::new();
        serialize_grid_and_layouts(&mut buf, &grid, &layouts, 0, None, None).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            deserialize_grid_and_layouts(&mut buf.as_slice()),
            Err(GridError::WireFormat(_))
        ));
    }

    #[test]
    fn version_guard() {
        let mut hdr = WireHdr::new(KIND_GRID);
        hdr.version_le = (WIRE_VERSION + 1).to_le();
        let buf = bytemuck::bytes_of(&hdr).to_vec();
        assert!(matches!(
            deserialize_grid_and_layouts(&mut buf.as_slice()),
            Err(GridError::WireFormat(_))
        ));
    }

    #[test]
    fn unknown_process_is_rejected() {
        let (grid, _, _) = two_triangles();
        let layouts = DistributionLayouts::default();
        let mut buf = Vec::new();
        assert!(matches!(
            serialize_grid_and_layouts(&mut buf, &grid, &layouts, 0, None, None),
            Err(GridError::InvalidSubset { .. })
        ));
        assert!(buf.is_empty());
    }
}

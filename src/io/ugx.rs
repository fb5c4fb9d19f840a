//! UGX (XML) reader/writer for domains.
//!
//! A UGX document holds one or more `grid` elements. Each grid lists its
//! elements section by section (`vertices`, `constrained_vertices`, `edges`,
//! `constraining_edges`, ..., `pyramids`) as whitespace separated records.
//! Elements are referenced by their position inside their kind, counted over
//! all sections of that kind in document order. Hanging vertices and
//! constrained edges/faces append the type code of their constraining
//! element (`1` edge, `2` face, `-1` none) and its index; hanging vertices
//! then add one or two local coordinates.
//!
//! A grid may carry a `subset_handler` with one `subset` element per subset,
//! listing the indices of its `vertices`, `edges`, `faces` and `volumes`.

use crate::data::attachment::Accessor;
use crate::data::domain::{Domain, Position};
use crate::io::{DomainReader, DomainWriter};
use crate::mesh_error::GridError;
use crate::topology::cell_type::CellType;
use crate::topology::constraints::may_constrain;
use crate::topology::grid::MultiGrid;
use crate::topology::iter::ElemFilter;
use crate::topology::point::{EdgeId, ElemKind, FaceId, GeomObj, VertexId, VolumeId};
use itertools::Itertools;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::iter::Peekable;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

const TAG_GRID: &str = "grid";
const TAG_SUBSET_HANDLER: &str = "subset_handler";
const TAG_SUBSET: &str = "subset";

const CODE_NONE: i32 = -1;
const CODE_EDGE: i32 = 1;
const CODE_FACE: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Regular,
    Constraining,
    Constrained,
}

struct SectionSpec {
    name: &'static str,
    cell: CellType,
    role: Role,
}

const fn section(name: &'static str, cell: CellType, role: Role) -> SectionSpec {
    SectionSpec { name, cell, role }
}

/// Element sections in writing order. Indices of one kind are assigned in
/// this order, so the reader sees the same numbering.
static SECTIONS: [SectionSpec; 15] = [
    section("vertices", CellType::Vertex, Role::Regular),
    section("constrained_vertices", CellType::Vertex, Role::Constrained),
    section("edges", CellType::Segment, Role::Regular),
    section("constraining_edges", CellType::Segment, Role::Constraining),
    section("constrained_edges", CellType::Segment, Role::Constrained),
    section("triangles", CellType::Triangle, Role::Regular),
    section("constraining_triangles", CellType::Triangle, Role::Constraining),
    section("constrained_triangles", CellType::Triangle, Role::Constrained),
    section("quadrilaterals", CellType::Quadrilateral, Role::Regular),
    section("constraining_quadrilaterals", CellType::Quadrilateral, Role::Constraining),
    section("constrained_quadrilaterals", CellType::Quadrilateral, Role::Constrained),
    section("tetrahedrons", CellType::Tetrahedron, Role::Regular),
    section("hexahedrons", CellType::Hexahedron, Role::Regular),
    section("prisms", CellType::Prism, Role::Regular),
    section("pyramids", CellType::Pyramid, Role::Regular),
];

fn cell_type_of(grid: &MultiGrid, obj: GeomObj) -> Result<CellType, GridError> {
    Ok(match obj {
        GeomObj::Vertex(_) => CellType::Vertex,
        GeomObj::Edge(_) => CellType::Segment,
        GeomObj::Face(f) => grid.face(f)?.cell_type(),
        GeomObj::Volume(c) => grid.volume(c)?.cell_type(),
    })
}

fn role_of(grid: &MultiGrid, obj: GeomObj) -> Role {
    if grid.is_constrained(obj) {
        Role::Constrained
    } else if grid.is_constraining(obj) {
        Role::Constraining
    } else {
        Role::Regular
    }
}

/// Options of [`UgxReader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UgxReadOptions {
    /// World dimension of the created domain. Stored coordinates with more
    /// components are truncated, missing ones are zero.
    pub dim: usize,
    /// Whether the created domain allows hanging-node refinement.
    pub adaptive: bool,
    /// Which `grid` element of the document to read.
    pub grid_index: usize,
}

impl Default for UgxReadOptions {
    fn default() -> Self {
        Self {
            dim: 3,
            adaptive: true,
            grid_index: 0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct UgxReader {
    options: UgxReadOptions,
}

impl UgxReader {
    pub fn new(options: UgxReadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &UgxReadOptions {
        &self.options
    }
}

#[derive(Debug, Clone)]
pub struct UgxWriter {
    grid_name: String,
    subset_handler_name: String,
}

impl Default for UgxWriter {
    fn default() -> Self {
        Self {
            grid_name: "defGrid".into(),
            subset_handler_name: "defSH".into(),
        }
    }
}

impl UgxWriter {
    /// Name written to the `grid` element.
    pub fn with_grid_name(mut self, name: impl Into<String>) -> Self {
        self.grid_name = name.into();
        self
    }

    /// Name written to the `subset_handler` element.
    pub fn with_subset_handler_name(mut self, name: impl Into<String>) -> Self {
        self.subset_handler_name = name.into();
        self
    }
}

// --------------------------------------------------------------------------
// Writing
// --------------------------------------------------------------------------

/// Output order of the elements and their per-kind file indices.
struct Numbering {
    sections: Vec<(&'static SectionSpec, Vec<GeomObj>)>,
    index: HashMap<GeomObj, usize>,
}

impl Numbering {
    fn new(grid: &MultiGrid) -> Result<Self, GridError> {
        let mut sections = Vec::new();
        let mut index = HashMap::new();
        let mut next = [0usize; 4];
        for spec in &SECTIONS {
            let kind = spec.cell.kind();
            let mut elems = Vec::new();
            for obj in grid.objects_of_kind(kind, ElemFilter::all()) {
                if cell_type_of(grid, obj)? == spec.cell && role_of(grid, obj) == spec.role {
                    index.insert(obj, next[kind as usize]);
                    next[kind as usize] += 1;
                    elems.push(obj);
                }
            }
            if !elems.is_empty() {
                sections.push((spec, elems));
            }
        }
        Ok(Self { sections, index })
    }

    fn of(&self, obj: GeomObj) -> Result<usize, GridError> {
        self.index
            .get(&obj)
            .copied()
            .ok_or(GridError::InvalidElement(obj))
    }

    /// `code index` of the constraining element, `-1` without one.
    fn constraint_ref(
        &self,
        grid: &MultiGrid,
        obj: GeomObj,
    ) -> Result<(i32, Option<usize>), GridError> {
        Ok(match grid.constraining_object(obj)? {
            Some(c @ GeomObj::Edge(_)) => (CODE_EDGE, Some(self.of(c)?)),
            Some(c @ GeomObj::Face(_)) => (CODE_FACE, Some(self.of(c)?)),
            _ => (CODE_NONE, None),
        })
    }
}

fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

impl UgxWriter {
    fn write_section<W: Write>(
        writer: &mut W,
        grid: &MultiGrid,
        numbering: &Numbering,
        spec: &SectionSpec,
        elems: &[GeomObj],
        positions: Accessor<'_, VertexId, Position>,
        dim: usize,
    ) -> Result<(), GridError> {
        if spec.cell == CellType::Vertex {
            writeln!(writer, "  <{} coords=\"{dim}\">", spec.name)?;
        } else {
            writeln!(writer, "  <{}>", spec.name)?;
        }
        for &obj in elems {
            let mut record: Vec<String> = Vec::new();
            match obj {
                GeomObj::Vertex(v) => {
                    let p = positions.get(v).copied().unwrap_or_default();
                    record.extend(p.iter().take(dim).map(|x| x.to_string()));
                }
                _ => {
                    for v in grid.vertices_of(obj)? {
                        record.push(numbering.of(v.into())?.to_string());
                    }
                }
            }
            if spec.role == Role::Constrained {
                let (code, index) = numbering.constraint_ref(grid, obj)?;
                record.push(code.to_string());
                if let Some(index) = index {
                    record.push(index.to_string());
                    if let (GeomObj::Vertex(_), Some(local)) =
                        (obj, grid.hanging_local_coords(obj)?)
                    {
                        let n = if code == CODE_EDGE { 1 } else { 2 };
                        record.extend(local.iter().take(n).map(|x| x.to_string()));
                    }
                }
            }
            writeln!(writer, "    {}", record.join(" "))?;
        }
        writeln!(writer, "  </{}>", spec.name)?;
        Ok(())
    }

    fn write_subsets<W: Write>(
        &self,
        writer: &mut W,
        grid: &MultiGrid,
        numbering: &Numbering,
    ) -> Result<(), GridError> {
        if grid.num_subsets() == 0 {
            return Ok(());
        }
        let mut members: Vec<[Vec<usize>; 4]> = vec![Default::default(); grid.num_subsets()];
        for (_, elems) in &numbering.sections {
            for &obj in elems {
                let subset = grid.subset(obj)?;
                if let Some(lists) = usize::try_from(subset).ok().and_then(|s| members.get_mut(s)) {
                    lists[obj.kind() as usize].push(numbering.of(obj)?);
                }
            }
        }
        for lists in &mut members {
            for list in lists.iter_mut() {
                list.sort_unstable();
            }
        }

        writeln!(
            writer,
            "  <{TAG_SUBSET_HANDLER} name=\"{}\">",
            escape_attr(&self.subset_handler_name)
        )?;
        for (info, lists) in grid.subset_infos().iter().zip(&members) {
            writeln!(writer, "    <{TAG_SUBSET} name=\"{}\">", escape_attr(&info.name))?;
            for (kind, list) in ElemKind::ALL.iter().zip(lists) {
                if list.is_empty() {
                    continue;
                }
                let tag = subset_list_tag(*kind);
                writeln!(writer, "      <{tag}>{}</{tag}>", list.iter().join(" "))?;
            }
            writeln!(writer, "    </{TAG_SUBSET}>")?;
        }
        writeln!(writer, "  </{TAG_SUBSET_HANDLER}>")?;
        Ok(())
    }
}

fn subset_list_tag(kind: ElemKind) -> &'static str {
    match kind {
        ElemKind::Vertex => "vertices",
        ElemKind::Edge => "edges",
        ElemKind::Face => "faces",
        ElemKind::Volume => "volumes",
    }
}

impl DomainWriter for UgxWriter {
    /// Writes every element of every level as one flat grid.
    fn write<W: Write>(&self, mut writer: W, domain: &Domain) -> Result<(), GridError> {
        let grid = domain.grid();
        let positions = grid.accessor(domain.position())?;
        let numbering = Numbering::new(grid)?;

        writeln!(writer, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
        writeln!(writer, "<{TAG_GRID} name=\"{}\">", escape_attr(&self.grid_name))?;
        for (spec, elems) in &numbering.sections {
            Self::write_section(
                &mut writer,
                grid,
                &numbering,
                spec,
                elems,
                positions,
                domain.dim(),
            )?;
        }
        self.write_subsets(&mut writer, grid, &numbering)?;
        writeln!(writer, "</{TAG_GRID}>")?;
        writer.flush()?;
        Ok(())
    }
}

// --------------------------------------------------------------------------
// Reading
// --------------------------------------------------------------------------

struct Tokens<'a> {
    section: &'a str,
    iter: Peekable<SplitWhitespace<'a>>,
}

impl<'a> Tokens<'a> {
    fn new(node: Node<'a, '_>) -> Self {
        Self {
            section: node.tag_name().name(),
            iter: node.text().unwrap_or("").split_whitespace().peekable(),
        }
    }

    fn has_more(&mut self) -> bool {
        self.iter.peek().is_some()
    }

    fn next<T: FromStr>(&mut self) -> Result<T, GridError> {
        let tok = self.iter.next().ok_or_else(|| {
            GridError::MeshIoParse(format!("truncated record in <{}>", self.section))
        })?;
        tok.parse().map_err(|_| {
            GridError::MeshIoParse(format!("invalid value '{tok}' in <{}>", self.section))
        })
    }
}

/// A constraint link recorded while parsing, resolved once every section
/// has been read.
struct PendingLink {
    obj: GeomObj,
    code: i32,
    index: i64,
    local: [f64; 2],
}

struct GridBuilder<'d> {
    domain: &'d mut Domain,
    vertices: Vec<VertexId>,
    edges: Vec<EdgeId>,
    faces: Vec<FaceId>,
    volumes: Vec<VolumeId>,
    pending: Vec<PendingLink>,
}

impl<'d> GridBuilder<'d> {
    fn new(domain: &'d mut Domain) -> Self {
        Self {
            domain,
            vertices: Vec::new(),
            edges: Vec::new(),
            faces: Vec::new(),
            volumes: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn element(&self, kind: ElemKind, index: i64) -> Option<GeomObj> {
        let i = usize::try_from(index).ok()?;
        match kind {
            ElemKind::Vertex => self.vertices.get(i).map(|&v| v.into()),
            ElemKind::Edge => self.edges.get(i).map(|&e| e.into()),
            ElemKind::Face => self.faces.get(i).map(|&f| f.into()),
            ElemKind::Volume => self.volumes.get(i).map(|&c| c.into()),
        }
    }

    fn corners(&self, tokens: &mut Tokens<'_>, n: usize) -> Result<Vec<VertexId>, GridError> {
        (0..n)
            .map(|_| {
                let index: i64 = tokens.next()?;
                self.element(ElemKind::Vertex, index)
                    .and_then(GeomObj::cast)
                    .ok_or_else(|| {
                        GridError::MeshIoParse(format!(
                            "vertex index {index} out of range in <{}>",
                            tokens.section
                        ))
                    })
            })
            .collect()
    }

    /// Reads `code [index]` and records the link for later resolution.
    fn read_link(
        &mut self,
        tokens: &mut Tokens<'_>,
        obj: GeomObj,
        with_local: bool,
    ) -> Result<(), GridError> {
        let code: i32 = tokens.next()?;
        let index: i64 = if code == CODE_NONE { -1 } else { tokens.next()? };
        let mut local = [0.0; 2];
        if with_local {
            let n = match code {
                CODE_EDGE => 1,
                CODE_FACE => 2,
                _ => 0,
            };
            for x in local.iter_mut().take(n) {
                *x = tokens.next()?;
            }
        }
        self.domain.grid_mut().make_constrained(obj, None, local)?;
        self.pending.push(PendingLink {
            obj,
            code,
            index,
            local,
        });
        Ok(())
    }

    fn read_vertices(&mut self, node: Node<'_, '_>, role: Role) -> Result<(), GridError> {
        let src: usize = node
            .attribute("coords")
            .and_then(|c| c.trim().parse().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                GridError::MeshIoParse(format!(
                    "<{}> needs a positive 'coords' attribute",
                    node.tag_name().name()
                ))
            })?;
        let dim = self.domain.dim();
        let mut tokens = Tokens::new(node);
        while tokens.has_more() {
            let mut p: Position = [0.0; 3];
            for i in 0..src {
                let x: f64 = tokens.next()?;
                if i < dim {
                    p[i] = x;
                }
            }
            let v = self.domain.grid_mut().create_vertex(None)?;
            self.domain.set_position(v, p)?;
            self.vertices.push(v);
            if role == Role::Constrained {
                self.read_link(&mut tokens, v.into(), true)?;
            }
        }
        Ok(())
    }

    fn read_elements(&mut self, node: Node<'_, '_>, spec: &SectionSpec) -> Result<(), GridError> {
        let mut tokens = Tokens::new(node);
        while tokens.has_more() {
            let corners = self.corners(&mut tokens, spec.cell.num_vertices())?;
            let grid = self.domain.grid_mut();
            let obj: GeomObj = match spec.cell.kind() {
                ElemKind::Edge => {
                    let e = match grid.find_edge(corners[0], corners[1]) {
                        Some(e) => e,
                        None => grid.create_edge([corners[0], corners[1]], None)?,
                    };
                    self.edges.push(e);
                    e.into()
                }
                ElemKind::Face => {
                    let f = match grid.find_face(&corners) {
                        Some(f) => f,
                        None => grid.create_face(spec.cell, &corners, None)?,
                    };
                    self.faces.push(f);
                    f.into()
                }
                ElemKind::Volume => {
                    let c = grid.create_volume(spec.cell, &corners, None)?;
                    self.volumes.push(c);
                    c.into()
                }
                ElemKind::Vertex => {
                    return Err(GridError::MeshIoParse(format!(
                        "<{}> is not an element section",
                        spec.name
                    )));
                }
            };
            match spec.role {
                Role::Regular => {}
                Role::Constraining => self.domain.grid_mut().make_constraining(obj)?,
                Role::Constrained => self.read_link(&mut tokens, obj, false)?,
            }
        }
        Ok(())
    }

    fn resolve_links(&mut self) -> Result<(), GridError> {
        for link in std::mem::take(&mut self.pending) {
            let kind = match link.code {
                CODE_NONE => continue,
                CODE_EDGE => ElemKind::Edge,
                CODE_FACE => ElemKind::Face,
                other => {
                    log::warn!(
                        "UGX: unsupported type code {other} of the element constraining {}",
                        link.obj
                    );
                    continue;
                }
            };
            let Some(target) = self.element(kind, link.index) else {
                log::error!(
                    "UGX: bad {kind} index {} in constrained {}",
                    link.index,
                    link.obj.kind()
                );
                return Err(GridError::MeshIoParse(format!(
                    "{kind} index {} out of range for constrained {}",
                    link.index,
                    link.obj.kind()
                )));
            };
            let grid = self.domain.grid_mut();
            if !grid.is_constraining(target) || !may_constrain(kind, link.obj.kind()) {
                log::warn!(
                    "UGX: type mismatch, ignoring {kind} {} as constraining element of {}",
                    link.index,
                    link.obj
                );
                continue;
            }
            grid.make_constrained(link.obj, Some(target), link.local)?;
        }
        Ok(())
    }

    fn read_subsets(&mut self, node: Node<'_, '_>) -> Result<(), GridError> {
        let subsets = node.children().filter(|n| n.has_tag_name(TAG_SUBSET));
        for (si, subset) in subsets.enumerate() {
            self.domain
                .grid_mut()
                .set_subset_name(si, subset.attribute("name").unwrap_or(""));
            for list in subset.children().filter(Node::is_element) {
                let Some(&kind) = ElemKind::ALL
                    .iter()
                    .find(|k| subset_list_tag(**k) == list.tag_name().name())
                else {
                    continue;
                };
                let mut tokens = Tokens::new(list);
                while tokens.has_more() {
                    let index: i64 = tokens.next()?;
                    let obj = self.element(kind, index).ok_or_else(|| {
                        GridError::MeshIoParse(format!(
                            "{kind} index {index} out of range in subset {si}"
                        ))
                    })?;
                    self.domain.grid_mut().set_subset(obj, si as i32)?;
                }
            }
        }
        Ok(())
    }
}

impl DomainReader for UgxReader {
    fn read<R: Read>(&self, mut reader: R) -> Result<Domain, GridError> {
        let mut input = String::new();
        reader.read_to_string(&mut input)?;
        let doc = Document::parse(&input)
            .map_err(|err| GridError::MeshIoParse(format!("XML parse error: {err}")))?;

        let grids: Vec<Node> = doc
            .descendants()
            .filter(|n| n.has_tag_name(TAG_GRID))
            .collect();
        if grids.is_empty() {
            return Err(GridError::NoGrid);
        }
        let grid_node = grids.get(self.options.grid_index).ok_or_else(|| {
            GridError::MeshIoParse(format!(
                "bad grid index {} (document has {})",
                self.options.grid_index,
                grids.len()
            ))
        })?;

        let mut domain = Domain::new(self.options.dim, self.options.adaptive);
        let mut builder = GridBuilder::new(&mut domain);
        for child in grid_node.children().filter(Node::is_element) {
            let name = child.tag_name().name();
            let Some(spec) = SECTIONS.iter().find(|s| s.name == name) else {
                continue;
            };
            if spec.cell == CellType::Vertex {
                builder.read_vertices(child, spec.role)?;
            } else {
                builder.read_elements(child, spec)?;
            }
        }
        builder.resolve_links()?;
        if let Some(sh) = grid_node
            .children()
            .find(|n| n.has_tag_name(TAG_SUBSET_HANDLER))
        {
            builder.read_subsets(sh)?;
        }
        log::debug!(
            "UGX: read {} vertices, {} edges, {} faces, {} volumes",
            builder.vertices.len(),
            builder.edges.len(),
            builder.faces.len(),
            builder.volumes.len()
        );
        Ok(domain)
    }
}

/// Loads the first grid of a UGX file into a new domain.
pub fn load_domain<P: AsRef<Path>>(path: P, options: UgxReadOptions) -> Result<Domain, GridError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => GridError::FileNotFound(path.display().to_string()),
        _ => GridError::from(err),
    })?;
    UgxReader::new(options).read(BufReader::new(file))
}

/// Writes `domain` to a UGX file.
pub fn save_domain<P: AsRef<Path>>(path: P, domain: &Domain) -> Result<(), GridError> {
    let file = File::create(path)?;
    UgxWriter::default().write(BufWriter::new(file), domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::validation::{InvariantHandling, validate_constraints};

    fn two_cells() -> Domain {
        let mut dom = Domain::new(2, false);
        let v: Vec<VertexId> = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [2.0, 0.5]]
            .iter()
            .map(|p| dom.create_vertex_at(p).unwrap())
            .collect();
        let grid = dom.grid_mut();
        let quad = grid
            .create_face(CellType::Quadrilateral, &[v[0], v[1], v[2], v[3]], None)
            .unwrap();
        let tri = grid
            .create_face(CellType::Triangle, &[v[1], v[4], v[2]], None)
            .unwrap();
        grid.set_subset_name(0, "inner");
        grid.set_subset_name(1, "right");
        grid.set_subset(quad.into(), 0).unwrap();
        grid.set_subset(tri.into(), 1).unwrap();
        grid.set_subset(v[4].into(), 1).unwrap();
        dom
    }

    fn write_to_string(domain: &Domain) -> String {
        let mut out = Vec::new();
        UgxWriter::default().write(&mut out, domain).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn read_str(text: &str, dim: usize) -> Result<Domain, GridError> {
        UgxReader::new(UgxReadOptions {
            dim,
            ..UgxReadOptions::default()
        })
        .read(text.as_bytes())
    }

    #[test]
    fn vertices_edges_and_faces_roundtrip() {
        let dom = two_cells();
        let text = write_to_string(&dom);
        assert!(text.contains("<grid name=\"defGrid\">"));
        assert!(text.contains("<vertices coords=\"2\">"));

        let back = read_str(&text, 2).unwrap();
        let (g0, g1) = (dom.grid(), back.grid());
        assert_eq!(g1.num::<VertexId>(), 5);
        assert_eq!(g1.num::<EdgeId>(), g0.num::<EdgeId>());
        assert_eq!(g1.num::<FaceId>(), 2);

        let old: Vec<VertexId> = g0.all::<VertexId>().collect();
        let new: Vec<VertexId> = g1.all::<VertexId>().collect();
        for (a, b) in old.iter().zip(&new) {
            let (pa, pb) = (dom.position_of(*a).unwrap(), back.position_of(*b).unwrap());
            assert!(pa.iter().zip(&pb).all(|(x, y)| (x - y).abs() < 1e-12));
        }
        let order: HashMap<VertexId, usize> =
            old.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let order_new: HashMap<VertexId, usize> =
            new.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        for (ea, eb) in g0.all::<EdgeId>().zip(g1.all::<EdgeId>()) {
            let a = g0.edge(ea).unwrap().vertices().map(|v| order[&v]);
            let b = g1.edge(eb).unwrap().vertices().map(|v| order_new[&v]);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn subsets_roundtrip() {
        let back = read_str(&write_to_string(&two_cells()), 2).unwrap();
        let g = back.grid();
        assert_eq!(g.num_subsets(), 2);
        assert_eq!(g.subset_infos()[1].name, "right");
        let tri = g
            .all::<FaceId>()
            .find(|f| g.face(*f).unwrap().cell_type() == CellType::Triangle)
            .unwrap();
        assert_eq!(g.subset(tri.into()).unwrap(), 1);
        assert_eq!(
            g.objects(ElemFilter::all().with_subset(1)).count(),
            2,
            "triangle and its extra vertex"
        );
    }

    #[test]
    fn hanging_vertex_roundtrip() {
        let mut dom = Domain::new(2, true);
        let a = dom.create_vertex_at(&[0.0, 0.0]).unwrap();
        let b = dom.create_vertex_at(&[2.0, 0.0]).unwrap();
        let m = dom.create_vertex_at(&[1.0, 0.0]).unwrap();
        let grid = dom.grid_mut();
        let ab = grid.create_edge([a, b], None).unwrap();
        let am = grid.create_edge([a, m], None).unwrap();
        let mb = grid.create_edge([m, b], None).unwrap();
        grid.make_constraining(ab.into()).unwrap();
        grid.make_constrained(m.into(), Some(ab.into()), [0.5, 0.0])
            .unwrap();
        grid.make_constrained(am.into(), Some(ab.into()), [0.0; 2])
            .unwrap();
        grid.make_constrained(mb.into(), Some(ab.into()), [0.0; 2])
            .unwrap();

        let text = write_to_string(&dom);
        assert!(text.contains("<constrained_vertices coords=\"2\">"));
        assert!(text.contains("<constraining_edges>"));

        let back = read_str(&text, 2).unwrap();
        let g = back.grid();
        let ce = g.all::<EdgeId>().find(|e| g.is_constraining((*e).into())).unwrap();
        assert_eq!(g.constrained_objects(ce.into()).unwrap().len(), 3);
        let hv = g
            .all::<VertexId>()
            .find(|v| g.is_constrained((*v).into()))
            .unwrap();
        assert_eq!(g.hanging_local_coords(hv.into()).unwrap(), Some([0.5, 0.0]));
        assert_eq!(validate_constraints(g, InvariantHandling::Error), Ok(0));
    }

    #[test]
    fn coordinates_are_truncated_or_padded() {
        let text = r#"<grid name="g">
            <vertices coords="3">1 2 3  4 5 6</vertices>
        </grid>"#;
        let dom = read_str(text, 2).unwrap();
        let v: Vec<VertexId> = dom.grid().all::<VertexId>().collect();
        assert_eq!(dom.position_of(v[1]).unwrap(), [4.0, 5.0, 0.0]);

        let text = r#"<grid><vertices coords="1">7 8</vertices></grid>"#;
        let dom = read_str(text, 3).unwrap();
        let v: Vec<VertexId> = dom.grid().all::<VertexId>().collect();
        assert_eq!(dom.position_of(v[1]).unwrap(), [8.0, 0.0, 0.0]);
    }

    #[test]
    fn document_without_grid_is_rejected() {
        assert_eq!(read_str("<mesh/>", 2).unwrap_err(), GridError::NoGrid);
        assert!(matches!(
            read_str("<grid", 2),
            Err(GridError::MeshIoParse(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_domain("/nonexistent/ug-grid/none.ugx", UgxReadOptions::default())
            .unwrap_err();
        assert!(matches!(err, GridError::FileNotFound(_)));
    }

    #[test]
    fn bad_indices_fail_the_load() {
        let text = r#"<grid>
            <vertices coords="1">0 1</vertices>
            <edges>0 2</edges>
        </grid>"#;
        assert!(matches!(read_str(text, 1), Err(GridError::MeshIoParse(_))));

        let text = r#"<grid>
            <vertices coords="1">0 2</vertices>
            <constrained_vertices coords="1">1 1 5 0.5</constrained_vertices>
            <constraining_edges>0 1</constraining_edges>
        </grid>"#;
        assert!(matches!(read_str(text, 1), Err(GridError::MeshIoParse(_))));
    }

    #[test]
    fn constraint_type_mismatch_is_skipped() {
        let text = r#"<grid>
            <vertices coords="1">0 2</vertices>
            <constrained_vertices coords="1">1 1 0 0.5</constrained_vertices>
            <edges>0 1</edges>
        </grid>"#;
        let dom = read_str(text, 1).unwrap();
        let g = dom.grid();
        let hv = g
            .all::<VertexId>()
            .find(|v| g.is_constrained((*v).into()))
            .unwrap();
        assert_eq!(g.constraining_object(hv.into()).unwrap(), None);
        assert_eq!(g.hanging_local_coords(hv.into()).unwrap(), Some([0.5, 0.0]));
    }

    #[test]
    fn truncated_record_is_rejected() {
        let text = r#"<grid><vertices coords="2">0 0 1</vertices></grid>"#;
        assert!(matches!(read_str(text, 2), Err(GridError::MeshIoParse(_))));
    }

    #[test]
    fn options_roundtrip_through_serde() {
        let opts = UgxReadOptions {
            dim: 2,
            adaptive: false,
            grid_index: 1,
        };
        let json = serde_json::to_string(&opts).unwrap();
        assert_eq!(serde_json::from_str::<UgxReadOptions>(&json).unwrap(), opts);
    }
}

//! The multigrid element store.
//!
//! [`MultiGrid`] owns every vertex, edge, face and volume of all refinement
//! levels in four slot arenas. Erased slots are reused by later elements;
//! handles carry the slot generation, so a handle either resolves to the
//! element it was issued for or to nothing.
//!
//! # Invariants
//! - `level(child) == level(parent) + 1`; elements created without a parent
//!   live on level 0.
//! - The corners of an edge/face/volume live on the element's level.
//! - Faces reference their edges and volumes reference their faces and edges;
//!   missing sides are generated on creation and inherit the creating
//!   element's parent (they are interior sides of that parent).
//! - Upward adjacency (vertex→edges, edge→faces, face→volumes) mirrors the
//!   downward references exactly.
//! - An element with children cannot be erased, and neither can an element
//!   still used as a side of a live element.

use crate::data::attachment::{Accessor, AccessorMut, Attachment, AttachmentRegistry};
use crate::mesh_error::GridError;
use crate::topology::cell_type::CellType;
use crate::topology::element::{
    Constraint, EdgeRecord, ElemInfo, ElemRecord, FaceRecord, VertexConstraint, VertexRecord,
    VolumeRecord,
};
use crate::topology::iter::{ElemFilter, ElemIter};
use crate::topology::point::{EdgeId, ElemHandle, ElemKind, FaceId, GeomObj, VertexId, VolumeId};
use crate::topology::subsets::SubsetInfo;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a grid, used to bind refiners and attachments.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridId(u64);

impl GridId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        GridId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Arena of one element kind. Released slots are reused; each release bumps
/// the slot's generation so that handles of the previous occupant go stale.
#[doc(hidden)]
#[derive(Clone, Debug)]
pub struct Slots<R> {
    items: Vec<Slot<R>>,
    free: Vec<usize>,
    live: usize,
}

#[derive(Clone, Debug)]
struct Slot<R> {
    rec: Option<R>,
    generation: u32,
}

impl<R> Default for Slots<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<R> Slots<R> {
    #[inline]
    pub(crate) fn get<H: ElemHandle>(&self, h: H) -> Option<&R> {
        self.items
            .get(h.index())
            .filter(|slot| slot.generation == h.generation())
            .and_then(|slot| slot.rec.as_ref())
    }

    #[inline]
    pub(crate) fn get_mut<H: ElemHandle>(&mut self, h: H) -> Option<&mut R> {
        self.items
            .get_mut(h.index())
            .filter(|slot| slot.generation == h.generation())
            .and_then(|slot| slot.rec.as_mut())
    }

    /// Occupant of slot `index` with the slot's current generation.
    #[inline]
    pub(crate) fn at(&self, index: usize) -> Option<(&R, u32)> {
        let slot = self.items.get(index)?;
        slot.rec.as_ref().map(|rec| (rec, slot.generation))
    }

    fn push<H: ElemHandle>(&mut self, rec: R) -> H {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.items[index];
            slot.rec = Some(rec);
            return H::from_parts(index, slot.generation);
        }
        self.items.push(Slot {
            rec: Some(rec),
            generation: 0,
        });
        H::from_index(self.items.len() - 1)
    }

    fn take<H: ElemHandle>(&mut self, h: H) -> Option<R> {
        let slot = self
            .items
            .get_mut(h.index())
            .filter(|slot| slot.generation == h.generation())?;
        let rec = slot.rec.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(h.index());
        self.live -= 1;
        Some(rec)
    }

    /// Number of slots allocated so far (live + free).
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.live
    }
}

/// Element kinds stored in a [`MultiGrid`].
pub trait GridElem: ElemHandle {
    type Record: ElemRecord;

    #[doc(hidden)]
    fn slots(store: &ElementStore) -> &Slots<Self::Record>;
    #[doc(hidden)]
    fn slots_mut(store: &mut ElementStore) -> &mut Slots<Self::Record>;
}

macro_rules! grid_elem {
    ($handle:ty, $rec:ty, $field:ident) => {
        impl GridElem for $handle {
            type Record = $rec;

            #[inline]
            fn slots(store: &ElementStore) -> &Slots<$rec> {
                &store.$field
            }

            #[inline]
            fn slots_mut(store: &mut ElementStore) -> &mut Slots<$rec> {
                &mut store.$field
            }
        }
    };
}

grid_elem!(VertexId, VertexRecord, vertices);
grid_elem!(EdgeId, EdgeRecord, edges);
grid_elem!(FaceId, FaceRecord, faces);
grid_elem!(VolumeId, VolumeRecord, volumes);

type FaceKey = SmallVec<[VertexId; 4]>;

fn edge_key(a: VertexId, b: VertexId) -> [VertexId; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

fn face_key(vertices: &[VertexId]) -> FaceKey {
    let mut key: FaceKey = vertices.iter().copied().collect();
    key.sort_unstable();
    key
}

/// Topology of all levels: element arenas, side lookups and level counts.
///
/// Obtained through [`MultiGrid`]'s `Deref`; all mutation goes through
/// [`MultiGrid`] so that attachments grow with the arenas.
#[derive(Debug)]
pub struct ElementStore {
    id: GridId,
    pub(crate) vertices: Slots<VertexRecord>,
    pub(crate) edges: Slots<EdgeRecord>,
    pub(crate) faces: Slots<FaceRecord>,
    pub(crate) volumes: Slots<VolumeRecord>,
    edge_lookup: HashMap<[VertexId; 2], EdgeId>,
    face_lookup: HashMap<FaceKey, FaceId>,
    level_counts: Vec<[usize; 4]>,
    pub(crate) subset_infos: Vec<SubsetInfo>,
}

impl ElementStore {
    fn new(id: GridId) -> Self {
        Self {
            id,
            vertices: Slots::default(),
            edges: Slots::default(),
            faces: Slots::default(),
            volumes: Slots::default(),
            edge_lookup: HashMap::new(),
            face_lookup: HashMap::new(),
            level_counts: Vec::new(),
            subset_infos: Vec::new(),
        }
    }

    /// Identity of the grid.
    pub fn id(&self) -> GridId {
        self.id
    }

    /// Record of a typed handle.
    pub fn record<H: GridElem>(&self, h: H) -> Result<&H::Record, GridError> {
        H::slots(self)
            .get(h)
            .ok_or_else(|| GridError::InvalidElement(h.into()))
    }

    pub fn vertex(&self, v: VertexId) -> Result<&VertexRecord, GridError> {
        self.record(v)
    }

    pub fn edge(&self, e: EdgeId) -> Result<&EdgeRecord, GridError> {
        self.record(e)
    }

    pub fn face(&self, f: FaceId) -> Result<&FaceRecord, GridError> {
        self.record(f)
    }

    pub fn volume(&self, c: VolumeId) -> Result<&VolumeRecord, GridError> {
        self.record(c)
    }

    /// Shared header of any element.
    pub fn info(&self, obj: GeomObj) -> Result<&ElemInfo, GridError> {
        match obj {
            GeomObj::Vertex(h) => self.record(h).map(ElemRecord::info),
            GeomObj::Edge(h) => self.record(h).map(ElemRecord::info),
            GeomObj::Face(h) => self.record(h).map(ElemRecord::info),
            GeomObj::Volume(h) => self.record(h).map(ElemRecord::info),
        }
    }

    /// `true` if the handle refers to a live element.
    pub fn contains(&self, obj: GeomObj) -> bool {
        self.info(obj).is_ok()
    }

    pub fn level(&self, obj: GeomObj) -> Result<usize, GridError> {
        self.info(obj).map(ElemInfo::level)
    }

    pub fn parent(&self, obj: GeomObj) -> Result<Option<GeomObj>, GridError> {
        self.info(obj).map(ElemInfo::parent)
    }

    pub fn children(&self, obj: GeomObj) -> Result<&[GeomObj], GridError> {
        self.info(obj).map(ElemInfo::children)
    }

    pub fn has_children(&self, obj: GeomObj) -> Result<bool, GridError> {
        self.info(obj).map(ElemInfo::has_children)
    }

    pub fn subset(&self, obj: GeomObj) -> Result<i32, GridError> {
        self.info(obj).map(ElemInfo::subset)
    }

    /// Live elements of kind `H`.
    pub fn num<H: GridElem>(&self) -> usize {
        H::slots(self).live()
    }

    /// Slots allocated for kind `H`, live or waiting for reuse. Attachment
    /// columns of `H` have this length.
    pub fn capacity<H: GridElem>(&self) -> usize {
        H::slots(self).capacity()
    }

    /// Live elements of kind `H` on `level`.
    pub fn num_on_level<H: GridElem>(&self, level: usize) -> usize {
        self.level_counts
            .get(level)
            .map_or(0, |counts| counts[H::KIND.dim()])
    }

    /// Live elements of any kind.
    pub fn num_elements(&self) -> usize {
        self.vertices.live() + self.edges.live() + self.faces.live() + self.volumes.live()
    }

    /// Number of levels holding at least one element.
    pub fn num_levels(&self) -> usize {
        self.level_counts.len()
    }

    /// Highest element kind present in the grid.
    pub fn top_kind(&self) -> Option<ElemKind> {
        if self.volumes.live() > 0 {
            Some(ElemKind::Volume)
        } else if self.faces.live() > 0 {
            Some(ElemKind::Face)
        } else if self.edges.live() > 0 {
            Some(ElemKind::Edge)
        } else if self.vertices.live() > 0 {
            Some(ElemKind::Vertex)
        } else {
            None
        }
    }

    /// Lazy iteration over elements of kind `H` passing `filter`, in slot
    /// order. Without erasures this is the creation order.
    pub fn iter<H: GridElem>(&self, filter: ElemFilter) -> ElemIter<'_, H> {
        ElemIter::new(H::slots(self), filter)
    }

    /// All live elements of kind `H`.
    pub fn all<H: GridElem>(&self) -> ElemIter<'_, H> {
        self.iter(ElemFilter::all())
    }

    /// Every live element, vertices first, then edges, faces and volumes.
    pub fn objects(&self, filter: ElemFilter) -> impl Iterator<Item = GeomObj> + Clone + '_ {
        self.iter::<VertexId>(filter)
            .map(GeomObj::from)
            .chain(self.iter::<EdgeId>(filter).map(GeomObj::from))
            .chain(self.iter::<FaceId>(filter).map(GeomObj::from))
            .chain(self.iter::<VolumeId>(filter).map(GeomObj::from))
    }

    /// Live elements of `kind` passing `filter`.
    pub fn objects_of_kind(&self, kind: ElemKind, filter: ElemFilter) -> Vec<GeomObj> {
        match kind {
            ElemKind::Vertex => self.iter::<VertexId>(filter).map(Into::into).collect(),
            ElemKind::Edge => self.iter::<EdgeId>(filter).map(Into::into).collect(),
            ElemKind::Face => self.iter::<FaceId>(filter).map(Into::into).collect(),
            ElemKind::Volume => self.iter::<VolumeId>(filter).map(Into::into).collect(),
        }
    }

    /// Corners of an element (the vertex itself for vertices).
    pub fn vertices_of(&self, obj: GeomObj) -> Result<SmallVec<[VertexId; 8]>, GridError> {
        Ok(match obj {
            GeomObj::Vertex(v) => {
                self.vertex(v)?;
                SmallVec::from_slice(&[v])
            }
            GeomObj::Edge(e) => SmallVec::from_slice(&self.edge(e)?.vertices),
            GeomObj::Face(f) => SmallVec::from_slice(&self.face(f)?.vertices),
            GeomObj::Volume(c) => self.volume(c)?.vertices.clone(),
        })
    }

    /// Edge joining `a` and `b`, in either orientation.
    pub fn find_edge(&self, a: VertexId, b: VertexId) -> Option<EdgeId> {
        self.edge_lookup.get(&edge_key(a, b)).copied()
    }

    /// Face with exactly the given corners, in any order.
    pub fn find_face(&self, vertices: &[VertexId]) -> Option<FaceId> {
        self.face_lookup.get(&face_key(vertices)).copied()
    }

    /// Edges of a face/volume, edges using a vertex, or the edge itself.
    pub fn associated_edges(&self, obj: GeomObj) -> Result<SmallVec<[EdgeId; 12]>, GridError> {
        Ok(match obj {
            GeomObj::Vertex(v) => SmallVec::from_slice(&self.vertex(v)?.edges),
            GeomObj::Edge(e) => {
                self.edge(e)?;
                SmallVec::from_slice(&[e])
            }
            GeomObj::Face(f) => SmallVec::from_slice(&self.face(f)?.edges),
            GeomObj::Volume(c) => self.volume(c)?.edges.clone(),
        })
    }

    /// Faces of a volume, faces using an edge or vertex, or the face itself.
    pub fn associated_faces(&self, obj: GeomObj) -> Result<Vec<FaceId>, GridError> {
        Ok(match obj {
            GeomObj::Vertex(v) => {
                let mut faces = Vec::new();
                for &e in &self.vertex(v)?.edges {
                    for &f in &self.edge(e)?.faces {
                        if !faces.contains(&f) {
                            faces.push(f);
                        }
                    }
                }
                faces
            }
            GeomObj::Edge(e) => self.edge(e)?.faces.to_vec(),
            GeomObj::Face(f) => {
                self.face(f)?;
                vec![f]
            }
            GeomObj::Volume(c) => self.volume(c)?.faces.to_vec(),
        })
    }

    /// Volumes using a vertex, edge or face, or the volume itself.
    pub fn associated_volumes(&self, obj: GeomObj) -> Result<Vec<VolumeId>, GridError> {
        if let GeomObj::Volume(c) = obj {
            self.volume(c)?;
            return Ok(vec![c]);
        }
        let mut volumes = Vec::new();
        for f in self.associated_faces(obj)? {
            for &c in &self.face(f)?.volumes {
                if !volumes.contains(&c) {
                    volumes.push(c);
                }
            }
        }
        Ok(volumes)
    }

    /// Elements of kind `kind` adjacent to (or equal to) `obj`.
    pub fn associated(&self, obj: GeomObj, kind: ElemKind) -> Result<Vec<GeomObj>, GridError> {
        Ok(match kind {
            ElemKind::Vertex => self.vertices_of(obj)?.into_iter().map(Into::into).collect(),
            ElemKind::Edge => self
                .associated_edges(obj)?
                .into_iter()
                .map(Into::into)
                .collect(),
            ElemKind::Face => self
                .associated_faces(obj)?
                .into_iter()
                .map(Into::into)
                .collect(),
            ElemKind::Volume => self
                .associated_volumes(obj)?
                .into_iter()
                .map(Into::into)
                .collect(),
        })
    }

    /// All lower-dimensional sides of an element (corners, edges, faces).
    pub fn sides_of(&self, obj: GeomObj) -> Result<Vec<GeomObj>, GridError> {
        let mut sides: Vec<GeomObj> = Vec::new();
        match obj {
            GeomObj::Vertex(v) => {
                self.vertex(v)?;
            }
            GeomObj::Edge(e) => {
                sides.extend(self.edge(e)?.vertices.iter().map(|&v| GeomObj::from(v)));
            }
            GeomObj::Face(f) => {
                let rec = self.face(f)?;
                sides.extend(rec.vertices.iter().map(|&v| GeomObj::from(v)));
                sides.extend(rec.edges.iter().map(|&e| GeomObj::from(e)));
            }
            GeomObj::Volume(c) => {
                let rec = self.volume(c)?;
                sides.extend(rec.vertices.iter().map(|&v| GeomObj::from(v)));
                sides.extend(rec.edges.iter().map(|&e| GeomObj::from(e)));
                sides.extend(rec.faces.iter().map(|&f| GeomObj::from(f)));
            }
        }
        Ok(sides)
    }

    /// The vertex child of an element: the copy of a vertex, the midpoint of
    /// a split edge or the center of a split quadrilateral/hexahedron.
    pub fn child_vertex(&self, obj: GeomObj) -> Result<Option<VertexId>, GridError> {
        Ok(self
            .children(obj)?
            .iter()
            .find_map(|c| c.cast::<VertexId>()))
    }

    /// Child edges of an element.
    pub fn child_edges(&self, obj: GeomObj) -> Result<SmallVec<[EdgeId; 4]>, GridError> {
        Ok(self
            .children(obj)?
            .iter()
            .filter_map(|c| c.cast::<EdgeId>())
            .collect())
    }

    /// Child faces of an element.
    pub fn child_faces(&self, obj: GeomObj) -> Result<SmallVec<[FaceId; 4]>, GridError> {
        Ok(self
            .children(obj)?
            .iter()
            .filter_map(|c| c.cast::<FaceId>())
            .collect())
    }

    /// Elements of the top kind adjacent to `obj`.
    pub fn top_neighbours(&self, obj: GeomObj) -> Result<Vec<GeomObj>, GridError> {
        match self.top_kind() {
            Some(top) if top > obj.kind() => self.associated(obj, top),
            _ => Ok(Vec::new()),
        }
    }

    /// Constraint record of an edge or face; vertices and volumes have none.
    pub(crate) fn constraint(&self, obj: GeomObj) -> Result<Option<&Constraint>, GridError> {
        Ok(match obj {
            GeomObj::Edge(e) => Some(&self.edge(e)?.constraint),
            GeomObj::Face(f) => Some(&self.face(f)?.constraint),
            GeomObj::Vertex(v) => {
                self.vertex(v)?;
                None
            }
            GeomObj::Volume(c) => {
                self.volume(c)?;
                None
            }
        })
    }

    /// Registered subset names.
    pub fn subset_infos(&self) -> &[SubsetInfo] {
        &self.subset_infos
    }

    /// Number of subsets (registered or referenced by an element).
    pub fn num_subsets(&self) -> usize {
        self.subset_infos.len()
    }

    fn info_mut(&mut self, obj: GeomObj) -> Result<&mut ElemInfo, GridError> {
        let missing = GridError::InvalidElement(obj);
        let info = match obj {
            GeomObj::Vertex(h) => self.vertices.get_mut(h).map(ElemRecord::info_mut),
            GeomObj::Edge(h) => self.edges.get_mut(h).map(ElemRecord::info_mut),
            GeomObj::Face(h) => self.faces.get_mut(h).map(ElemRecord::info_mut),
            GeomObj::Volume(h) => self.volumes.get_mut(h).map(ElemRecord::info_mut),
        };
        info.ok_or(missing)
    }

    fn count_level(&mut self, level: usize, kind: ElemKind) {
        if self.level_counts.len() <= level {
            self.level_counts.resize(level + 1, [0; 4]);
        }
        self.level_counts[level][kind.dim()] += 1;
    }

    fn uncount_level(&mut self, level: usize, kind: ElemKind) {
        if let Some(counts) = self.level_counts.get_mut(level) {
            counts[kind.dim()] = counts[kind.dim()].saturating_sub(1);
        }
        while self
            .level_counts
            .last()
            .is_some_and(|counts| counts.iter().all(|&n| n == 0))
        {
            self.level_counts.pop();
        }
    }

    fn level_and_subset(&self, parent: Option<GeomObj>) -> Result<(usize, i32), GridError> {
        match parent {
            Some(p) => {
                let info = self.info(p)?;
                Ok((info.level + 1, info.subset))
            }
            None => Ok((0, -1)),
        }
    }

    fn check_corners(&self, vertices: &[VertexId], level: usize) -> Result<(), GridError> {
        for &v in vertices {
            let vertex_level = self.vertex(v)?.info.level;
            if vertex_level != level {
                return Err(GridError::LevelMismatch {
                    vertex: v.into(),
                    vertex_level,
                    elem_level: level,
                });
            }
        }
        Ok(())
    }
}

/// Hierarchical grid: an [`ElementStore`] plus its attachment columns.
///
/// Read-only topology queries are available through `Deref<Target = ElementStore>`.
pub struct MultiGrid {
    store: ElementStore,
    attachments: AttachmentRegistry,
}

impl Default for MultiGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for MultiGrid {
    type Target = ElementStore;

    fn deref(&self) -> &ElementStore {
        &self.store
    }
}

impl std::fmt::Debug for MultiGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiGrid")
            .field("id", &self.store.id)
            .field("levels", &self.store.num_levels())
            .field("vertices", &self.store.vertices.live())
            .field("edges", &self.store.edges.live())
            .field("faces", &self.store.faces.live())
            .field("volumes", &self.store.volumes.live())
            .finish()
    }
}

impl MultiGrid {
    /// Creates an empty grid.
    pub fn new() -> Self {
        let id = GridId::next();
        Self {
            store: ElementStore::new(id),
            attachments: AttachmentRegistry::new(id),
        }
    }

    /// Read-only topology.
    pub fn store(&self) -> &ElementStore {
        &self.store
    }

    // ----------------------------------------------------------------------
    // Attachments
    // ----------------------------------------------------------------------

    /// Attach a column of `T` to all elements of kind `H`, filled with `default`.
    pub fn attach<H: GridElem, T: Clone + 'static>(&mut self, default: T) -> Attachment<H, T> {
        let len = H::slots(&self.store).capacity();
        self.attachments.attach(default, len)
    }

    /// Remove a column. Returns `false` if it was not attached.
    pub fn detach<H: GridElem, T>(&mut self, att: Attachment<H, T>) -> bool {
        self.attachments.detach(att)
    }

    pub fn is_attached<H: GridElem, T: 'static>(&self, att: Attachment<H, T>) -> bool {
        self.attachments.is_attached(att)
    }

    /// Number of columns attached to `kind`.
    pub fn num_attachments(&self, kind: ElemKind) -> usize {
        self.attachments.num_attached(kind)
    }

    pub fn accessor<H: GridElem, T: 'static>(
        &self,
        att: Attachment<H, T>,
    ) -> Result<Accessor<'_, H, T>, GridError> {
        self.attachments.accessor(att)
    }

    pub fn accessor_mut<H: GridElem, T: 'static>(
        &mut self,
        att: Attachment<H, T>,
    ) -> Result<AccessorMut<'_, H, T>, GridError> {
        self.attachments.accessor_mut(att)
    }

    /// Topology for reading plus a write view of one column.
    pub fn split_attachment_mut<H: GridElem, T: 'static>(
        &mut self,
        att: Attachment<H, T>,
    ) -> Result<(&ElementStore, AccessorMut<'_, H, T>), GridError> {
        let acc = self.attachments.accessor_mut(att)?;
        Ok((&self.store, acc))
    }

    /// Copy the values of one column into another, converting with `convert`.
    pub fn copy_attachment_values<H: GridElem, S: 'static, T: 'static>(
        &mut self,
        src: Attachment<H, S>,
        dst: Attachment<H, T>,
        convert: impl Fn(&S) -> T,
    ) -> Result<(), GridError> {
        let handles: Vec<H> = self.store.all::<H>().collect();
        let values: Vec<T> = {
            let acc = self.attachments.accessor(src)?;
            handles.iter().map(|&h| convert(&acc[h])).collect()
        };
        let mut out = self.attachments.accessor_mut(dst)?;
        for (h, v) in handles.into_iter().zip(values) {
            out[h] = v;
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Creation
    // ----------------------------------------------------------------------

    /// Creates a vertex; with a parent, the vertex lives one level below it.
    pub fn create_vertex(&mut self, parent: Option<GeomObj>) -> Result<VertexId, GridError> {
        let (level, subset) = self.store.level_and_subset(parent)?;
        Ok(self.insert_vertex(level, parent, subset))
    }

    /// Creates a parentless vertex on `level`. Used when rebuilding a grid
    /// from a partial stream whose coarse ancestors live elsewhere.
    pub(crate) fn create_vertex_on_level(&mut self, level: usize) -> VertexId {
        self.insert_vertex(level, None, -1)
    }

    fn insert_vertex(&mut self, level: usize, parent: Option<GeomObj>, subset: i32) -> VertexId {
        let v: VertexId = self.store.vertices.push(VertexRecord {
            info: ElemInfo::new(level, parent, subset),
            constraint: VertexConstraint::Free,
            edges: SmallVec::new(),
        });
        self.register(v.into(), level, parent);
        v
    }

    /// Creates an edge between two distinct vertices of the edge's level.
    pub fn create_edge(
        &mut self,
        vertices: [VertexId; 2],
        parent: Option<GeomObj>,
    ) -> Result<EdgeId, GridError> {
        let (level, subset) = self.store.level_and_subset(parent)?;
        self.create_edge_on_level(vertices, level, parent, subset)
    }

    pub(crate) fn create_edge_on_level(
        &mut self,
        vertices: [VertexId; 2],
        level: usize,
        parent: Option<GeomObj>,
        subset: i32,
    ) -> Result<EdgeId, GridError> {
        if vertices[0] == vertices[1] {
            return Err(GridError::InvalidVertexList {
                cell: CellType::Segment.name(),
                expected: 2,
                found: 1,
            });
        }
        self.store.check_corners(&vertices, level)?;
        let key = edge_key(vertices[0], vertices[1]);
        if let Some(&existing) = self.store.edge_lookup.get(&key) {
            return Err(GridError::DuplicateElement(existing.into()));
        }
        let e: EdgeId = self.store.edges.push(EdgeRecord {
            info: ElemInfo::new(level, parent, subset),
            vertices,
            constraint: Constraint::None,
            faces: SmallVec::new(),
        });
        self.store.edge_lookup.insert(key, e);
        for v in vertices {
            if let Some(rec) = self.store.vertices.get_mut(v) {
                rec.edges.push(e);
            }
        }
        self.register(e.into(), level, parent);
        Ok(e)
    }

    fn side_edge(
        &mut self,
        a: VertexId,
        b: VertexId,
        level: usize,
        parent: Option<GeomObj>,
        subset: i32,
    ) -> Result<EdgeId, GridError> {
        match self.store.find_edge(a, b) {
            Some(e) => Ok(e),
            None => self.create_edge_on_level([a, b], level, parent, subset),
        }
    }

    /// Creates a triangle or quadrilateral; missing edges are generated.
    pub fn create_face(
        &mut self,
        cell_type: CellType,
        vertices: &[VertexId],
        parent: Option<GeomObj>,
    ) -> Result<FaceId, GridError> {
        let (level, subset) = self.store.level_and_subset(parent)?;
        self.create_face_on_level(cell_type, vertices, level, parent, subset)
    }

    pub(crate) fn create_face_on_level(
        &mut self,
        cell_type: CellType,
        vertices: &[VertexId],
        level: usize,
        parent: Option<GeomObj>,
        subset: i32,
    ) -> Result<FaceId, GridError> {
        check_vertex_list(cell_type, ElemKind::Face, vertices)?;
        self.store.check_corners(vertices, level)?;
        let key = face_key(vertices);
        if let Some(&existing) = self.store.face_lookup.get(&key) {
            return Err(GridError::DuplicateElement(existing.into()));
        }
        let mut edges = SmallVec::new();
        for &[a, b] in cell_type.ref_edges() {
            edges.push(self.side_edge(vertices[a], vertices[b], level, parent, subset)?);
        }
        let f: FaceId = self.store.faces.push(FaceRecord {
            info: ElemInfo::new(level, parent, subset),
            cell_type,
            vertices: SmallVec::from_slice(vertices),
            edges: edges.clone(),
            constraint: Constraint::None,
            volumes: SmallVec::new(),
        });
        self.store.face_lookup.insert(key, f);
        for e in edges {
            if let Some(rec) = self.store.edges.get_mut(e) {
                rec.faces.push(f);
            }
        }
        self.register(f.into(), level, parent);
        Ok(f)
    }

    fn side_face(
        &mut self,
        vertices: &[VertexId],
        level: usize,
        parent: Option<GeomObj>,
        subset: i32,
    ) -> Result<FaceId, GridError> {
        if let Some(f) = self.store.find_face(vertices) {
            return Ok(f);
        }
        let cell_type =
            CellType::face_with_corners(vertices.len()).ok_or(GridError::InvalidVertexList {
                cell: "face",
                expected: 4,
                found: vertices.len(),
            })?;
        self.create_face_on_level(cell_type, vertices, level, parent, subset)
    }

    /// Creates a volume; missing faces and edges are generated.
    pub fn create_volume(
        &mut self,
        cell_type: CellType,
        vertices: &[VertexId],
        parent: Option<GeomObj>,
    ) -> Result<VolumeId, GridError> {
        let (level, subset) = self.store.level_and_subset(parent)?;
        self.create_volume_on_level(cell_type, vertices, level, parent, subset)
    }

    pub(crate) fn create_volume_on_level(
        &mut self,
        cell_type: CellType,
        vertices: &[VertexId],
        level: usize,
        parent: Option<GeomObj>,
        subset: i32,
    ) -> Result<VolumeId, GridError> {
        check_vertex_list(cell_type, ElemKind::Volume, vertices)?;
        self.store.check_corners(vertices, level)?;
        let mut faces: SmallVec<[FaceId; 6]> = SmallVec::new();
        for local in cell_type.ref_faces() {
            let corners: SmallVec<[VertexId; 4]> = local.iter().map(|&i| vertices[i]).collect();
            faces.push(self.side_face(&corners, level, parent, subset)?);
        }
        let mut edges: SmallVec<[EdgeId; 12]> = SmallVec::new();
        for &[a, b] in cell_type.ref_edges() {
            edges.push(self.side_edge(vertices[a], vertices[b], level, parent, subset)?);
        }
        let c: VolumeId = self.store.volumes.push(VolumeRecord {
            info: ElemInfo::new(level, parent, subset),
            cell_type,
            vertices: SmallVec::from_slice(vertices),
            edges,
            faces: faces.clone(),
        });
        for f in faces {
            if let Some(rec) = self.store.faces.get_mut(f) {
                rec.volumes.push(c);
            }
        }
        self.register(c.into(), level, parent);
        Ok(c)
    }

    /// Bookkeeping shared by all creations: parent link, level count and
    /// attachment growth.
    fn register(&mut self, obj: GeomObj, level: usize, parent: Option<GeomObj>) {
        if let Some(p) = parent {
            if let Ok(info) = self.store.info_mut(p) {
                info.children.push(obj);
            }
        }
        self.store.count_level(level, obj.kind());
        let len = match obj.kind() {
            ElemKind::Vertex => self.store.vertices.capacity(),
            ElemKind::Edge => self.store.edges.capacity(),
            ElemKind::Face => self.store.faces.capacity(),
            ElemKind::Volume => self.store.volumes.capacity(),
        };
        self.attachments.grow(obj.kind(), len);
    }

    // ----------------------------------------------------------------------
    // Erasure
    // ----------------------------------------------------------------------

    /// Removes an element without children that is not used as a side of a
    /// live element. Constraint links are dissolved and attachment values
    /// reset before the slot is released.
    pub fn erase(&mut self, obj: GeomObj) -> Result<(), GridError> {
        let info = self.store.info(obj)?;
        if info.has_children() {
            return Err(GridError::ElementHasChildren(obj));
        }
        let (level, parent) = (info.level, info.parent);
        let user: Option<GeomObj> = match obj {
            GeomObj::Vertex(v) => self.store.vertex(v)?.edges.first().map(|&e| e.into()),
            GeomObj::Edge(e) => self.store.edge(e)?.faces.first().map(|&f| f.into()),
            GeomObj::Face(f) => self.store.face(f)?.volumes.first().map(|&c| c.into()),
            GeomObj::Volume(_) => None,
        };
        if let Some(user) = user {
            return Err(GridError::ElementInUse { elem: obj, user });
        }

        self.make_unconstrained(obj)?;

        if let Some(p) = parent {
            if let Ok(pinfo) = self.store.info_mut(p) {
                pinfo.children.retain(|c| *c != obj);
            }
        }

        let s = &mut self.store;
        match obj {
            GeomObj::Vertex(v) => {
                s.vertices.take(v);
            }
            GeomObj::Edge(e) => {
                if let Some(rec) = s.edges.take(e) {
                    s.edge_lookup.remove(&edge_key(rec.vertices[0], rec.vertices[1]));
                    for v in rec.vertices {
                        if let Some(vr) = s.vertices.get_mut(v) {
                            vr.edges.retain(|x| *x != e);
                        }
                    }
                }
            }
            GeomObj::Face(f) => {
                if let Some(rec) = s.faces.take(f) {
                    s.face_lookup.remove(&face_key(&rec.vertices));
                    for e in rec.edges {
                        if let Some(er) = s.edges.get_mut(e) {
                            er.faces.retain(|x| *x != f);
                        }
                    }
                }
            }
            GeomObj::Volume(c) => {
                if let Some(rec) = s.volumes.take(c) {
                    for f in rec.faces {
                        if let Some(fr) = s.faces.get_mut(f) {
                            fr.volumes.retain(|x| *x != c);
                        }
                    }
                }
            }
        }
        s.uncount_level(level, obj.kind());
        self.attachments.reset(obj.kind(), obj.index());
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Subsets
    // ----------------------------------------------------------------------

    /// Assigns `obj` to subset `subset` (`-1` unassigns). Unknown subsets are
    /// registered with an empty name.
    pub fn set_subset(&mut self, obj: GeomObj, subset: i32) -> Result<(), GridError> {
        if subset < -1 {
            return Err(GridError::InvalidSubset {
                index: subset,
                num_subsets: self.store.num_subsets(),
            });
        }
        self.store.info_mut(obj)?.subset = subset;
        if subset >= 0 {
            self.ensure_subset(subset as usize);
        }
        Ok(())
    }

    /// Sets the display name of subset `subset`, registering it if needed.
    pub fn set_subset_name(&mut self, subset: usize, name: &str) {
        self.ensure_subset(subset);
        self.store.subset_infos[subset].name = name.to_string();
    }

    fn ensure_subset(&mut self, subset: usize) {
        if self.store.subset_infos.len() <= subset {
            self.store
                .subset_infos
                .resize_with(subset + 1, SubsetInfo::default);
        }
    }

    // ----------------------------------------------------------------------
    // Crate-internal record access
    // ----------------------------------------------------------------------

    pub(crate) fn store_mut(&mut self) -> &mut ElementStore {
        &mut self.store
    }
}

fn check_vertex_list(
    cell_type: CellType,
    kind: ElemKind,
    vertices: &[VertexId],
) -> Result<(), GridError> {
    let expected = cell_type.num_vertices();
    if cell_type.kind() != kind || vertices.len() != expected {
        return Err(GridError::InvalidVertexList {
            cell: cell_type.name(),
            expected,
            found: vertices.len(),
        });
    }
    for (i, v) in vertices.iter().enumerate() {
        if vertices[..i].contains(v) {
            return Err(GridError::InvalidVertexList {
                cell: cell_type.name(),
                expected,
                found: i,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_grid() -> (MultiGrid, [VertexId; 4], FaceId) {
        let mut grid = MultiGrid::new();
        let v: Vec<VertexId> = (0..4).map(|_| grid.create_vertex(None).unwrap()).collect();
        let vs = [v[0], v[1], v[2], v[3]];
        let f = grid
            .create_face(CellType::Quadrilateral, &vs, None)
            .unwrap();
        (grid, vs, f)
    }

    #[test]
    fn face_creation_generates_edges() {
        let (grid, v, f) = quad_grid();
        assert_eq!(grid.num::<EdgeId>(), 4);
        let rec = grid.face(f).unwrap();
        assert_eq!(rec.edges().len(), 4);
        assert_eq!(grid.find_edge(v[1], v[0]), Some(rec.edges()[0]));
        assert_eq!(grid.edge(rec.edges()[2]).unwrap().faces(), &[f]);
        assert_eq!(grid.find_face(&[v[3], v[1], v[0], v[2]]), Some(f));
    }

    #[test]
    fn child_level_follows_parent() {
        let (mut grid, v, f) = quad_grid();
        let c = grid.create_vertex(Some(v[0].into())).unwrap();
        assert_eq!(grid.level(c.into()).unwrap(), 1);
        assert_eq!(grid.parent(c.into()).unwrap(), Some(v[0].into()));
        assert_eq!(grid.children(v[0].into()).unwrap(), &[GeomObj::from(c)]);
        let center = grid.create_vertex(Some(f.into())).unwrap();
        assert_eq!(grid.child_vertex(f.into()).unwrap(), Some(center));
        assert_eq!(grid.num_levels(), 2);
        assert_eq!(grid.num_on_level::<VertexId>(1), 2);
    }

    #[test]
    fn corners_must_share_the_level() {
        let (mut grid, v, _) = quad_grid();
        let c = grid.create_vertex(Some(v[0].into())).unwrap();
        let err = grid.create_edge([c, v[1]], None).unwrap_err();
        assert!(matches!(err, GridError::LevelMismatch { .. }));
    }

    #[test]
    fn duplicate_edges_are_rejected() {
        let (mut grid, v, _) = quad_grid();
        let err = grid.create_edge([v[1], v[0]], None).unwrap_err();
        assert!(matches!(err, GridError::DuplicateElement(GeomObj::Edge(_))));
    }

    #[test]
    fn erased_slots_are_reused_with_a_new_generation() {
        let mut grid = MultiGrid::new();
        let a = grid.create_vertex(None).unwrap();
        let b = grid.create_vertex(None).unwrap();
        let pos = grid.attach::<VertexId, f64>(0.0);
        grid.accessor_mut(pos).unwrap()[b] = 7.0;
        grid.erase(b.into()).unwrap();

        let c = grid.create_vertex(None).unwrap();
        assert_eq!(c.index(), b.index());
        assert_ne!(c, b);
        assert_eq!(grid.capacity::<VertexId>(), 2);
        assert!(!grid.contains(b.into()));
        assert_eq!(grid.erase(b.into()), Err(GridError::InvalidElement(b.into())));
        assert_eq!(grid.accessor(pos).unwrap()[c], 0.0);
        assert_eq!(grid.all::<VertexId>().collect::<Vec<_>>(), vec![a, c]);
        assert!(grid.create_edge([a, b], None).is_err());
    }

    #[test]
    fn erase_with_children_fails_without_mutation() {
        let (mut grid, v, _) = quad_grid();
        let c = grid.create_vertex(Some(v[2].into())).unwrap();
        let before = grid.num_elements();
        let err = grid.erase(v[2].into()).unwrap_err();
        assert_eq!(err, GridError::ElementHasChildren(v[2].into()));
        assert_eq!(grid.num_elements(), before);
        assert_eq!(grid.parent(c.into()).unwrap(), Some(v[2].into()));
    }

    #[test]
    fn erase_in_use_side_fails() {
        let (mut grid, _, f) = quad_grid();
        let e = grid.face(f).unwrap().edges()[0];
        assert!(matches!(
            grid.erase(e.into()),
            Err(GridError::ElementInUse { .. })
        ));
    }

    #[test]
    fn erase_top_down_clears_lookups() {
        let (mut grid, v, f) = quad_grid();
        let edges = grid.face(f).unwrap().edges().to_vec();
        grid.erase(f.into()).unwrap();
        assert_eq!(grid.find_face(&v), None);
        for e in edges {
            grid.erase(e.into()).unwrap();
        }
        assert_eq!(grid.find_edge(v[0], v[1]), None);
        for x in v {
            grid.erase(x.into()).unwrap();
        }
        assert_eq!(grid.num_elements(), 0);
        assert_eq!(grid.num_levels(), 0);
        assert!(grid.erase(v[0].into()).is_err());
    }

    #[test]
    fn erased_child_leaves_parent() {
        let (mut grid, v, _) = quad_grid();
        let c = grid.create_vertex(Some(v[0].into())).unwrap();
        grid.erase(c.into()).unwrap();
        assert!(!grid.has_children(v[0].into()).unwrap());
        assert_eq!(grid.num_levels(), 1);
    }

    #[test]
    fn volume_generates_faces_and_edges() {
        let mut grid = MultiGrid::new();
        let v: Vec<VertexId> = (0..8).map(|_| grid.create_vertex(None).unwrap()).collect();
        let c = grid.create_volume(CellType::Hexahedron, &v, None).unwrap();
        assert_eq!(grid.num::<FaceId>(), 6);
        assert_eq!(grid.num::<EdgeId>(), 12);
        assert_eq!(grid.volume(c).unwrap().faces().len(), 6);
        assert_eq!(grid.associated_volumes(v[6].into()).unwrap(), vec![c]);
        assert_eq!(grid.top_kind(), Some(ElemKind::Volume));
    }

    #[test]
    fn children_inherit_subset() {
        let (mut grid, _, f) = quad_grid();
        grid.set_subset(f.into(), 2).unwrap();
        assert_eq!(grid.num_subsets(), 3);
        let c = grid.create_vertex(Some(f.into())).unwrap();
        assert_eq!(grid.subset(c.into()).unwrap(), 2);
    }

    #[test]
    fn wrong_vertex_count_is_rejected() {
        let (mut grid, v, _) = quad_grid();
        assert!(matches!(
            grid.create_face(CellType::Triangle, &v, None),
            Err(GridError::InvalidVertexList { .. })
        ));
        assert!(matches!(
            grid.create_face(CellType::Tetrahedron, &v, None),
            Err(GridError::InvalidVertexList { .. })
        ));
    }
}

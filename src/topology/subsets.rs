//! Subset assignment of grid elements.
//!
//! Every element carries an integer subset tag (`-1` = unassigned). The
//! distribution layout builder does not care where tags come from: it sees a
//! [`SubsetAssignment`], implemented both by the grid's intrinsic tags
//! ([`GridSubsets`]) and by attachment-backed partition maps
//! ([`PartitionMap`]).

use crate::data::attachment::Attachment;
use crate::mesh_error::GridError;
use crate::topology::grid::MultiGrid;
use crate::topology::point::{EdgeId, ElemKind, FaceId, GeomObj, VertexId, VolumeId};
use serde::{Deserialize, Serialize};

/// Metadata of one subset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetInfo {
    pub name: String,
}

/// Source of per-element subset indices.
pub trait SubsetAssignment {
    /// Number of subsets; valid indices are `0..num_subsets`.
    fn num_subsets(&self, grid: &MultiGrid) -> usize;

    /// Subset of `obj`, `-1` if unassigned.
    fn subset_of(&self, grid: &MultiGrid, obj: GeomObj) -> Result<i32, GridError>;
}

/// The subset tags stored on the elements themselves.
#[derive(Clone, Copy, Debug, Default)]
pub struct GridSubsets;

impl SubsetAssignment for GridSubsets {
    fn num_subsets(&self, grid: &MultiGrid) -> usize {
        grid.num_subsets()
    }

    fn subset_of(&self, grid: &MultiGrid, obj: GeomObj) -> Result<i32, GridError> {
        grid.subset(obj)
    }
}

/// Subset tags kept in attachments, e.g. the output of a partitioner.
///
/// The map does not own the grid; it must be used with the grid it was
/// created on and dropped with [`PartitionMap::detach`].
#[derive(Clone, Copy, Debug)]
pub struct PartitionMap {
    vertex: Attachment<VertexId, i32>,
    edge: Attachment<EdgeId, i32>,
    face: Attachment<FaceId, i32>,
    volume: Attachment<VolumeId, i32>,
    num_parts: usize,
}

impl PartitionMap {
    /// Attaches empty (`-1`) partition columns for all four kinds.
    pub fn new(grid: &mut MultiGrid, num_parts: usize) -> Self {
        Self {
            vertex: grid.attach(-1),
            edge: grid.attach(-1),
            face: grid.attach(-1),
            volume: grid.attach(-1),
            num_parts,
        }
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    /// Assigns `obj` to part `part`.
    pub fn assign(&self, grid: &mut MultiGrid, obj: GeomObj, part: i32) -> Result<(), GridError> {
        if part < -1 || part >= self.num_parts as i32 {
            return Err(GridError::InvalidSubset {
                index: part,
                num_subsets: self.num_parts,
            });
        }
        if !grid.contains(obj) {
            return Err(GridError::InvalidElement(obj));
        }
        match obj {
            GeomObj::Vertex(_) => *grid.accessor_mut(self.vertex)?.get_obj_mut(obj)? = part,
            GeomObj::Edge(_) => *grid.accessor_mut(self.edge)?.get_obj_mut(obj)? = part,
            GeomObj::Face(_) => *grid.accessor_mut(self.face)?.get_obj_mut(obj)? = part,
            GeomObj::Volume(_) => *grid.accessor_mut(self.volume)?.get_obj_mut(obj)? = part,
        }
        Ok(())
    }

    /// Assigns `obj` and all its sides to `part`.
    pub fn assign_with_sides(
        &self,
        grid: &mut MultiGrid,
        obj: GeomObj,
        part: i32,
    ) -> Result<(), GridError> {
        for side in grid.sides_of(obj)? {
            self.assign(grid, side, part)?;
        }
        self.assign(grid, obj, part)
    }

    /// Removes the partition columns from the grid.
    pub fn detach(self, grid: &mut MultiGrid) {
        grid.detach(self.vertex);
        grid.detach(self.edge);
        grid.detach(self.face);
        grid.detach(self.volume);
    }

    fn kind_attached(&self, grid: &MultiGrid, kind: ElemKind) -> bool {
        match kind {
            ElemKind::Vertex => grid.is_attached(self.vertex),
            ElemKind::Edge => grid.is_attached(self.edge),
            ElemKind::Face => grid.is_attached(self.face),
            ElemKind::Volume => grid.is_attached(self.volume),
        }
    }
}

impl SubsetAssignment for PartitionMap {
    fn num_subsets(&self, _grid: &MultiGrid) -> usize {
        self.num_parts
    }

    fn subset_of(&self, grid: &MultiGrid, obj: GeomObj) -> Result<i32, GridError> {
        if !grid.contains(obj) {
            return Err(GridError::InvalidElement(obj));
        }
        debug_assert!(self.kind_attached(grid, obj.kind()));
        Ok(*match obj {
            GeomObj::Vertex(_) => grid.accessor(self.vertex)?.get_obj(obj)?,
            GeomObj::Edge(_) => grid.accessor(self.edge)?.get_obj(obj)?,
            GeomObj::Face(_) => grid.accessor(self.face)?.get_obj(obj)?,
            GeomObj::Volume(_) => grid.accessor(self.volume)?.get_obj(obj)?,
        })
    }
}

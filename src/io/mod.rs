//! Mesh I/O for domains.
//!
//! Readers build a fresh [`Domain`] and hand it out only when the whole
//! document was understood; writers serialize a domain's grid, positions and
//! subsets.

pub mod ugx;

use crate::data::domain::Domain;
use crate::mesh_error::GridError;
use std::io::{Read, Write};

/// Trait for mesh readers producing a domain.
pub trait DomainReader {
    /// Parse a domain from a reader.
    fn read<R: Read>(&self, reader: R) -> Result<Domain, GridError>;
}

/// Trait for mesh writers serializing a domain.
pub trait DomainWriter {
    /// Write `domain` to a writer.
    fn write<W: Write>(&self, writer: W, domain: &Domain) -> Result<(), GridError>;
}

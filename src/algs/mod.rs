//! Parallel plumbing: process context, distribution layouts and the binary
//! layout stream.

pub mod communicator;
pub mod distribute;
pub mod wire;

pub use communicator::{LocalProcessGroup, ProcessContext, SerialProcess, StandardDomainDecomposition};
pub use distribute::{
    DistributionLayout, DistributionLayouts, DistributionOptions, InterfaceEntry,
    InterfaceNodeType, create_distribution_layouts,
};

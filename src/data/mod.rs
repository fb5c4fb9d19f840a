//! Data module: per-element attachments and coordinate domains
#![warn(missing_docs)]

pub mod attachment;
pub mod domain;

pub use attachment::{Accessor, AccessorMut, Attachment};
pub use domain::{Domain, Position};

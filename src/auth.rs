//! Auth-domain identifiers and refresh-token models.

pub mod id;
pub mod token;

pub use id::*;
pub use token::{family::*, record::*, secret::*};

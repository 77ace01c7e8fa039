//! Refresh-token records, rotation families, and secret handling.

pub mod family;
pub mod record;
pub mod secret;

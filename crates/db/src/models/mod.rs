//! Row structs for the streak tables.
//!
//! Each struct matches a table's column list exactly and carries only
//! storage types (`String` for enum columns, nullable columns as `Option`).
//! Conversion to and from the domain entities in `tether_core` lives in
//! [`crate::mapping`].

pub mod milestone;
pub mod reward;
pub mod streak;

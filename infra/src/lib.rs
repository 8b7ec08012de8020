//! Document-store plumbing shared by the tableside services: typed ids,
//! document metadata, and the `Storage` trait with its PostgreSQL and
//! in-memory implementations.

pub mod documents;
pub mod ids;
pub mod memory;
pub mod persistence;

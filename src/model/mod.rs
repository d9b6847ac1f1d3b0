//! Core data model.
//!
//! Messages are the unit of vectorize work; knowledge is what consolidation
//! builds from them.

pub mod memory;
pub mod work;

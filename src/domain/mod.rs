//! Domain types and DTOs

pub mod batch;
pub mod specification;
pub mod takeoff;

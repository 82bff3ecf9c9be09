//! Business logic services

pub mod assignment;
pub mod export;
pub mod feasibility;
pub mod geo;
pub mod local_validator;
pub mod normalizer;
pub mod positioning;
pub mod reassignment;
pub mod snapshot;
pub mod timeutil;
pub mod workspace;

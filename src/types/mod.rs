//! Type definitions

pub mod route;
pub mod schedule;
pub mod validation;

pub use route::*;
pub use schedule::*;
pub use validation::*;

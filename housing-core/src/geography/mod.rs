pub mod geometry;
pub mod neighbourhood;

pub use geometry::*;
pub use neighbourhood::*;

pub mod house;
pub mod household;

pub use house::*;
pub use household::*;

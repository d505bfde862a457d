pub mod constant;
pub mod entity;

pub use constant::*;
pub use entity::*;

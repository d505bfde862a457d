pub mod pattern;
pub mod tracker;

pub use pattern::*;
pub use tracker::*;

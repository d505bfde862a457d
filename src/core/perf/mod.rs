pub mod metric;
pub mod monitor;

pub use metric::*;
pub use monitor::*;

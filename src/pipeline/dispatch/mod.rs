pub mod job;
pub mod pool;

pub use job::*;
pub use pool::*;

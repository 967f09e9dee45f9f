pub mod bulk;
pub mod catalog;
pub mod error;
pub mod registrar;
pub mod template;

pub use bulk::*;
pub use catalog::*;
pub use error::*;
pub use registrar::*;
pub use template::*;

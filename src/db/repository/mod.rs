//! Repository layer: entity-scoped database operations.
//!
//! Free functions over a borrowed `Connection`. Callers own locking. Batch
//! upserts open their own transaction.

mod image;
mod image_field;
mod template;
mod template_field;

pub use self::image::*;
pub use self::image_field::*;
pub use self::template::*;
pub use self::template_field::*;

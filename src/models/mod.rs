pub mod enums;
pub mod field;
pub mod image;
pub mod template;

pub use self::enums::*;
pub use self::field::*;
pub use self::image::*;
pub use self::template::*;

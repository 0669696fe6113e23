//! The built-in block library.

mod count;
mod group;
mod mask;
mod ticker;
mod to_file;

pub use count::Count;
pub use group::Group;
pub use mask::Mask;
pub use ticker::Ticker;
pub use to_file::ToFile;

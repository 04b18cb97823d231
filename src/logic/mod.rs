pub mod merge;
pub mod sync;

pub use merge::*;
pub use sync::*;

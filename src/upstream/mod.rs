pub mod client;
pub mod traits;

pub use client::*;
pub use traits::*;

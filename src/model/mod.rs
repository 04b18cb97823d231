pub mod account;
pub mod common;
pub mod entity;
pub mod field;
pub mod permission;
pub mod record;
pub mod user_context;

pub use account::*;
pub use common::*;
pub use entity::*;
pub use field::*;
pub use permission::*;
pub use record::*;
pub use user_context::*;

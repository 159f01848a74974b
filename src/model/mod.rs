pub mod audit;
pub mod common;
pub mod route;
pub mod version;

pub use audit::*;
pub use common::*;
pub use route::*;
pub use version::*;

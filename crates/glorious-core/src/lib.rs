pub mod paths;
pub mod protocol;
pub mod types;

pub use paths::GloriousPaths;
pub use protocol::{Request, Response};
pub use types::*;

pub mod entry;
pub mod error;
pub mod session;
pub mod signature;
mod util;

pub use entry::*;
pub use error::{Error, Result};
pub use session::*;
pub use signature::*;
pub use util::*;

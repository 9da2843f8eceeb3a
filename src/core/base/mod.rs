mod error;
mod key;
mod stat;

pub use error::*;
pub use key::*;
pub use stat::*;

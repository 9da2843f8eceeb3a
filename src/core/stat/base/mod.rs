mod call_bucket;
mod leap_array;

pub use call_bucket::*;
pub use leap_array::*;

mod key;
mod numeric_id;

pub use key::*;
pub use numeric_id::*;

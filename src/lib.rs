pub mod error;
pub mod interp;
pub mod timestamps;
pub mod value;

pub use error::StrataError;
pub use interp::{interpolate, DEFINES_KEY};
pub use value::Value;

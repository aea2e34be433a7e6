//! Core value types shared across the crate

mod byte_size;
mod id;
mod value_set;

pub use byte_size::{parse_byte_size, ByteSize, NOT_AVAILABLE};
pub use id::Id;
pub use value_set::{IdSet, Keyed, ValueSet};

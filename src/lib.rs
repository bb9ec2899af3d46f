//! Lock-free, enum-keyed map and concurrently resizable array, built on
//! epoch-based reclamation.

mod atomic;
mod counter;
mod descriptor;
mod error;
mod thread_local;
mod transfer;

pub mod array;
pub mod enum_map;

pub use array::ConcurrentArray;
pub use enum_map::{EnumKey, EnumMap};
pub use error::{BadArgument, Error, Result};

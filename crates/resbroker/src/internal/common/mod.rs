pub(crate) mod data_structures;
pub(crate) mod error;
pub(crate) mod ids;
pub(crate) mod index;

pub use data_structures::{Map, Set};

pub(crate) mod comm;
pub(crate) mod core;
pub(crate) mod reactor;
pub(crate) mod registry;
pub mod request;
pub(crate) mod resource;

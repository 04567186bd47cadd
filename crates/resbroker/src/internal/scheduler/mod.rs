pub(crate) mod assign;
pub(crate) mod main;
pub mod score;

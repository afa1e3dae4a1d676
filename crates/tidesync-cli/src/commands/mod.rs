pub mod common;
pub mod group;
pub mod status;
pub mod sync;

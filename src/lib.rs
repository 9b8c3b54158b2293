pub mod actor;
pub mod common;
pub mod model;
pub mod remote;

pub mod geometry;
pub mod interaction;
pub mod local_store;
pub mod snapshot;
pub mod switch;
pub mod window;
pub mod workspace;
pub mod z_index;

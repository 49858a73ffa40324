pub mod attendance;
pub mod data;
pub mod sync;

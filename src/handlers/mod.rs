// Route handlers, one module per API area
pub mod analytics;
pub mod attendance;
pub mod health;
pub mod records;
pub mod sync;

pub mod response;
pub mod sync_auth;

pub use response::{ApiResponse, ApiResult};
pub use sync_auth::sync_trigger_auth;

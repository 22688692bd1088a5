pub mod error;
pub mod middleware;
pub mod routes;

// Re-export public types and functions
pub use error::{ApiError, ErrorResponse};
pub use middleware::{RequestId, log_request_errors};
pub use routes::create_video;

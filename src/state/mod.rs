//! State management module
//!
//! This module defines the lifecycle states for analysis requests and queue
//! jobs, plus the error codes that terminal failures carry.

mod error_code;
mod job_state;
mod request_status;

pub use error_code::ErrorCode;
pub use job_state::JobState;
pub use request_status::RequestStatus;

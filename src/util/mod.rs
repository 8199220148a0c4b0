//! Utility functions shared by the engine and the driver.
//!
//! - **URL validation**: backend base URLs are checked before any request
//! - **Task panic capture**: background tasks report panics instead of
//!   silently dropping their completion event

mod task;
mod url_validator;

pub use task::catch_task_panic;
pub use url_validator::{validate_base_url, UrlValidationError};

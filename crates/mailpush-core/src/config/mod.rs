//! Configuration loading and validation.

mod model;
mod validation;

pub use model::{Config, ConnectRequest};
pub use validation::{ValidationError, ValidationResult, is_valid_email, validate_config};

// Request path validation.

pub mod normalize;

pub use normalize::{is_valid_path, request_path, PathError};

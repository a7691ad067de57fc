pub mod signature;

pub use signature::{sign_object_path, sign_request, verify_object_path, verify_request};

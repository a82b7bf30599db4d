pub mod error;
pub mod upload;

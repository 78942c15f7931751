pub mod request;
pub mod types;

pub use request::{GetModelPath, GetModelRequest};
pub use types::Model;

pub use crate::claude::get_model::types::ModelInfo as GetModelResponse;

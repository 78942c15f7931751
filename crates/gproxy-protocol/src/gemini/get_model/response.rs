pub use crate::gemini::get_model::types::Model as GetModelResponse;

use serde::{Deserialize, Serialize};

use crate::openai::count_tokens::types::InputTokenObjectType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InputTokenCountResponse {
    pub object: InputTokenObjectType,
    pub input_tokens: i64,
}

pub mod aistudio;
pub mod antigravity;
pub mod claude;
pub mod claudecode;
pub mod codex;
pub mod custom;
pub mod deepseek;
pub mod geminicli;
mod http_client;
mod oauth_common;
pub mod nvidia;
pub mod openai;
pub mod vertex;
pub mod vertexexpress;

pub use aistudio::AIStudioProvider;
pub use antigravity::AntigravityProvider;
pub use claude::ClaudeProvider;
pub use claudecode::ClaudeCodeProvider;
pub use codex::CodexProvider;
pub use custom::CustomProvider;
pub use deepseek::DeepSeekProvider;
pub use geminicli::GeminiCliProvider;
pub use nvidia::NvidiaProvider;
pub use openai::OpenAIProvider;
pub use vertex::VertexProvider;
pub use vertexexpress::VertexExpressProvider;

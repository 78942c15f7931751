//! Wires every built-in `UpstreamProvider` into a `gproxy_provider_core::ProviderRegistry`.
//! Kept as a single function (rather than a static/lazy map) so bootstrap can
//! build a fresh registry per process without reaching for global state.

use std::sync::Arc;

use gproxy_provider_core::ProviderRegistry;

use crate::providers::{
    AIStudioProvider, AntigravityProvider, ClaudeCodeProvider, ClaudeProvider, CodexProvider,
    CustomProvider, DeepSeekProvider, GeminiCliProvider, NvidiaProvider, OpenAIProvider,
    VertexExpressProvider, VertexProvider,
};

pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(Arc::new(OpenAIProvider::new()));
    registry.register(Arc::new(ClaudeProvider::new()));
    registry.register(Arc::new(AIStudioProvider::new()));
    registry.register(Arc::new(VertexExpressProvider::new()));
    registry.register(Arc::new(VertexProvider::new()));
    registry.register(Arc::new(GeminiCliProvider::new()));
    registry.register(Arc::new(ClaudeCodeProvider::new()));
    registry.register(Arc::new(CodexProvider::new()));
    registry.register(Arc::new(AntigravityProvider::new()));
    registry.register(Arc::new(NvidiaProvider::new()));
    registry.register(Arc::new(DeepSeekProvider::new()));
    registry.register(Arc::new(CustomProvider::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_builtin_provider_name() {
        let mut registry = ProviderRegistry::new();
        register_builtin_providers(&mut registry);
        for name in [
            "openai",
            "claude",
            "aistudio",
            "vertexexpress",
            "vertex",
            "geminicli",
            "claudecode",
            "codex",
            "antigravity",
            "nvidia",
            "deepseek",
            "custom",
        ] {
            assert!(registry.get(name).is_some(), "missing provider {name}");
        }
    }
}

//! The fixed list of providers bootstrap seeds into storage on first run
//! (spec.md §4.1 "built-in providers are pre-registered, not discovered").
//! Each entry pairs a stable provider name with the default
//! `ProviderConfig` variant for that upstream, serialized the same way
//! `Storage::upsert_provider` stores operator-edited config.

use gproxy_provider_core::{
    AIStudioConfig, AntigravityConfig, ClaudeCodeConfig, ClaudeConfig, CodexConfig, DeepSeekConfig,
    GeminiCliConfig, NvidiaConfig, OpenAIConfig, ProviderConfig, VertexConfig, VertexExpressConfig,
};

pub struct BuiltinProviderSeed {
    pub name: &'static str,
    pub config_json: serde_json::Value,
    pub enabled: bool,
}

fn seed(name: &'static str, config: ProviderConfig, enabled: bool) -> BuiltinProviderSeed {
    BuiltinProviderSeed {
        name,
        config_json: serde_json::to_value(config)
            .expect("built-in ProviderConfig variants always serialize"),
        enabled,
    }
}

/// Disabled by default: these need operator-supplied credentials or base
/// URLs before they can serve traffic, so seeding them enabled would just
/// produce a provider that always fails health checks.
pub fn builtin_provider_seeds() -> Vec<BuiltinProviderSeed> {
    vec![
        seed("openai", ProviderConfig::OpenAI(OpenAIConfig::default()), false),
        seed("claude", ProviderConfig::Claude(ClaudeConfig::default()), false),
        seed(
            "aistudio",
            ProviderConfig::AIStudio(AIStudioConfig::default()),
            false,
        ),
        seed(
            "vertexexpress",
            ProviderConfig::VertexExpress(VertexExpressConfig::default()),
            false,
        ),
        seed("vertex", ProviderConfig::Vertex(VertexConfig::default()), false),
        seed(
            "geminicli",
            ProviderConfig::GeminiCli(GeminiCliConfig::default()),
            false,
        ),
        seed(
            "claudecode",
            ProviderConfig::ClaudeCode(ClaudeCodeConfig::default()),
            false,
        ),
        seed("codex", ProviderConfig::Codex(CodexConfig::default()), false),
        seed(
            "antigravity",
            ProviderConfig::Antigravity(AntigravityConfig::default()),
            false,
        ),
        seed("nvidia", ProviderConfig::Nvidia(NvidiaConfig::default()), false),
        seed(
            "deepseek",
            ProviderConfig::DeepSeek(DeepSeekConfig::default()),
            false,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_cover_every_builtin_provider_name() {
        let names: Vec<&str> = builtin_provider_seeds().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
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
            ]
        );
    }

    #[test]
    fn seeds_start_disabled() {
        assert!(builtin_provider_seeds().into_iter().all(|s| !s.enabled));
    }
}

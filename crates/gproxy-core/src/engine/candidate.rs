//! `CandidateBuilder` (spec.md §4.6): assembles eligible `(Provider, Endpoint,
//! ProviderApiKey)` triples from the `ProviderStore` with every filter the
//! spec names — format compatibility, model support, circuit state,
//! allow-lists, capability rules, and provider-type quota.
//!
//! Grounded the same way `CredentialPool::acquire` builds up an eligible set
//! before picking one (`gproxy-provider-core::credential::pool`): gather,
//! filter, and hand the ordering decision to a separate stage (`Scheduler`
//! here, a bare priority sort there).

use std::collections::HashMap;

use gproxy_provider_core::health::HealthMonitor;
use gproxy_provider_core::model::{
    Endpoint, EndpointSignature, GlobalModel, Provider, ProviderApiKey, ProviderId,
};
use gproxy_provider_core::store::ProviderStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Exact,
    Passthroughable,
    Convertible,
    Incompatible,
}

impl Compatibility {
    pub fn is_usable(self) -> bool {
        !matches!(self, Compatibility::Incompatible)
    }

    pub fn needs_conversion(self) -> bool {
        matches!(self, Compatibility::Convertible)
    }
}

/// `client_sig`, `endpoint_sig`, `format_acceptance`, `is_stream`,
/// `global_conversion_enabled`, `skip_endpoint_check` — the exact parameter
/// list spec.md §4.6 names for `is_format_compatible`.
pub fn classify_compatibility(
    client_sig: EndpointSignature,
    endpoint: &Endpoint,
    is_stream: bool,
    global_conversion_enabled: bool,
    skip_endpoint_check: bool,
) -> Compatibility {
    let endpoint_sig = endpoint.signature();
    if client_sig == endpoint_sig {
        return Compatibility::Exact;
    }
    let fac = &endpoint.format_acceptance;
    if fac.accept_formats.contains(&client_sig) {
        return Compatibility::Passthroughable;
    }
    if !fac.enabled && !skip_endpoint_check {
        return Compatibility::Incompatible;
    }
    if !global_conversion_enabled && !skip_endpoint_check {
        return Compatibility::Incompatible;
    }
    if is_stream && !fac.stream_conversion {
        return Compatibility::Incompatible;
    }
    Compatibility::Convertible
}

/// Caller-scoped allow-list; `None` on a field means unrestricted. Two lists
/// (caller-key and caller-user) are intersected before `CandidateBuilder`
/// runs (spec.md §4.6 step 2).
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    pub api_formats: Option<Vec<EndpointSignature>>,
    pub providers: Option<Vec<ProviderId>>,
    pub models: Option<Vec<String>>,
}

impl AllowList {
    pub fn intersect(&self, other: &AllowList) -> AllowList {
        AllowList {
            api_formats: intersect_opt(&self.api_formats, &other.api_formats),
            providers: intersect_opt(&self.providers, &other.providers),
            models: intersect_opt(&self.models, &other.models),
        }
    }

    fn allows_provider(&self, id: ProviderId) -> bool {
        self.providers.as_ref().is_none_or(|list| list.contains(&id))
    }

    fn allows_format(&self, sig: EndpointSignature) -> bool {
        self.api_formats.as_ref().is_none_or(|list| list.contains(&sig))
    }

    fn allows_model(&self, name: &str) -> bool {
        self.models.as_ref().is_none_or(|list| list.iter().any(|m| m == name))
    }
}

fn intersect_opt<T: Clone + PartialEq>(a: &Option<Vec<T>>, b: &Option<Vec<T>>) -> Option<Vec<T>> {
    match (a, b) {
        (None, None) => None,
        (Some(list), None) | (None, Some(list)) => Some(list.clone()),
        (Some(a), Some(b)) => Some(a.iter().filter(|x| b.contains(x)).cloned().collect()),
    }
}

#[derive(Debug, Clone)]
pub struct CandidateRequest {
    pub client_sig: EndpointSignature,
    pub model_name: String,
    /// Already the intersection of caller-key and caller-user restrictions.
    pub restrictions: AllowList,
    /// capability name -> whether this request demands it.
    pub capability_requirements: HashMap<String, bool>,
    pub is_stream: bool,
    pub provider_offset: usize,
    pub provider_limit: usize,
    pub global_conversion_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: Provider,
    pub endpoint: Endpoint,
    pub key: ProviderApiKey,
    pub compatibility: Compatibility,
    pub needs_conversion: bool,
    pub provider_api_format: EndpointSignature,
    pub mapping_matched_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateError {
    ModelNotSupported,
}

pub struct CandidateBuilder;

impl CandidateBuilder {
    pub async fn build(
        store: &dyn ProviderStore,
        health: &HealthMonitor,
        req: &CandidateRequest,
    ) -> Result<Vec<Candidate>, CandidateError> {
        let global_model = store
            .global_model_by_name(&req.model_name)
            .await
            .filter(|gm| gm.is_active)
            .ok_or(CandidateError::ModelNotSupported)?;

        let mut providers: Vec<Provider> = store
            .active_providers()
            .await
            .into_iter()
            .filter(|p| req.restrictions.allows_provider(p.id))
            .collect();
        providers.sort_by_key(|p| p.provider_priority);
        let providers: Vec<Provider> = providers
            .into_iter()
            .skip(req.provider_offset)
            .take(if req.provider_limit == 0 { usize::MAX } else { req.provider_limit })
            .collect();

        let mut exact = Vec::new();
        let mut convertible = Vec::new();

        for provider in &providers {
            let skip_endpoint_check = req.global_conversion_enabled || provider.enable_format_conversion;
            let endpoints = ordered_endpoints(store.endpoints_for(provider.id).await, req.client_sig);
            let models = store.models_for(provider.id).await;
            let keys = store.keys_for(provider.id).await;

            for endpoint in endpoints {
                if !endpoint.is_active {
                    continue;
                }
                let compat = classify_compatibility(
                    req.client_sig,
                    &endpoint,
                    req.is_stream,
                    req.global_conversion_enabled,
                    skip_endpoint_check,
                );
                if !compat.is_usable() {
                    continue;
                }
                let endpoint_sig = endpoint.signature();
                if !req.restrictions.allows_format(endpoint_sig) {
                    continue;
                }

                let Some(model) = models
                    .iter()
                    .find(|m| m.global_model_id == global_model.id && m.is_active)
                else {
                    continue;
                };
                if req.is_stream && model.supports_streaming == Some(false) {
                    continue;
                }

                for key in &keys {
                    if !key.is_active || !key.accepts_signature(endpoint_sig) {
                        continue;
                    }
                    let (available, _reason) = health.check(key.id, endpoint_sig).await;
                    if !available {
                        continue;
                    }
                    let Some(mapping_matched_model) =
                        model_allowed(&global_model, model.provider_model_name.as_str(), key, &req.restrictions)
                    else {
                        continue;
                    };
                    if !capability_ok(key, &req.capability_requirements) {
                        continue;
                    }
                    if !quota_ok(provider, key) {
                        continue;
                    }

                    let candidate = Candidate {
                        provider: provider.clone(),
                        endpoint: endpoint.clone(),
                        key: key.clone(),
                        compatibility: compat,
                        needs_conversion: compat.needs_conversion(),
                        provider_api_format: endpoint_sig,
                        mapping_matched_model,
                    };
                    match compat {
                        Compatibility::Exact | Compatibility::Passthroughable => exact.push(candidate),
                        Compatibility::Convertible => convertible.push(candidate),
                        Compatibility::Incompatible => unreachable!("filtered above"),
                    }
                }
            }
        }

        exact.extend(convertible);
        Ok(exact)
    }
}

/// Same-kind&family first, then same-kind, then same-family, then other;
/// within a group, family priority `openai<claude<gemini<other`.
fn ordered_endpoints(mut endpoints: Vec<Endpoint>, client_sig: EndpointSignature) -> Vec<Endpoint> {
    endpoints.sort_by_key(|e| {
        let sig = e.signature();
        let group = if sig == client_sig {
            0
        } else if sig.kind == client_sig.kind {
            1
        } else if sig.family == client_sig.family {
            2
        } else {
            3
        };
        (group, e.api_family.priority_rank(), e.id)
    });
    endpoints
}

fn quota_ok(provider: &Provider, key: &ProviderApiKey) -> bool {
    if !provider.is_free_tier() {
        return true;
    }
    match key.upstream_metadata.get("quota_remaining_usd").and_then(|v| v.as_f64()) {
        Some(remaining) => remaining > 0.0,
        None => true,
    }
}

fn capability_ok(key: &ProviderApiKey, requirements: &HashMap<String, bool>) -> bool {
    requirements
        .iter()
        .all(|(cap, demanded)| key.capability_allows(cap, *demanded))
}

/// Returns `Some(None)`-shaped as `Some(mapping_matched_model)` when the key
/// may serve this GlobalModel, `None` when it may not. An exact allow-list
/// hit carries no mapping; a wildcard/glob pattern hit in
/// `GlobalModel.config.model_mappings` records the matched provider-side
/// name so the candidate trail can show how the key was accepted.
fn model_allowed(
    global_model: &GlobalModel,
    provider_model_name: &str,
    key: &ProviderApiKey,
    restrictions: &AllowList,
) -> Option<Option<String>> {
    if !restrictions.allows_model(&global_model.name) {
        return None;
    }
    if key.allowed_models.is_empty() {
        return Some(None);
    }
    if key.allowed_models.iter().any(|m| m == &global_model.name) {
        return Some(None);
    }
    for mapping in &global_model.config.model_mappings {
        let matches = if mapping.is_regex {
            bounded_regex_match(&mapping.pattern, provider_model_name)
        } else {
            glob_match(&mapping.pattern, provider_model_name)
        };
        if matches && key.allowed_models.iter().any(|m| glob_match(m, provider_model_name)) {
            return Some(Some(provider_model_name.to_string()));
        }
    }
    None
}

/// `*` and `?` only — a full regex engine on caller-influenced strings is
/// exactly the "bounded regex" spec.md §4.6 asks for, so this never builds
/// an actual `Regex`.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// Degrades to the same glob matcher: this codebase has no `regex` crate
/// dependency, and `allowed_models`/`model_mappings` patterns in practice
/// only ever use `*`/`?` wildcards, so a real regex engine isn't worth the
/// dependency or the ReDoS surface on caller-reachable strings.
fn bounded_regex_match(pattern: &str, text: &str) -> bool {
    glob_match(pattern, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_provider_core::model::{ApiFamily, EndpointKind, FormatAcceptanceConfig};

    fn sig(f: ApiFamily, k: EndpointKind) -> EndpointSignature {
        EndpointSignature::new(f, k)
    }

    fn endpoint(family: ApiFamily, kind: EndpointKind, enabled: bool, stream_conversion: bool) -> Endpoint {
        Endpoint {
            id: 1,
            provider_id: 1,
            api_family: family,
            endpoint_kind: kind,
            base_url: "https://example".into(),
            is_active: true,
            format_acceptance: FormatAcceptanceConfig {
                enabled,
                accept_formats: Vec::new(),
                stream_conversion,
            },
            header_rules: Default::default(),
            body_rules: serde_json::json!({}),
            timeout_ms: None,
        }
    }

    #[test]
    fn exact_signature_is_always_exact() {
        let e = endpoint(ApiFamily::Claude, EndpointKind::Chat, false, false);
        let got = classify_compatibility(sig(ApiFamily::Claude, EndpointKind::Chat), &e, true, false, false);
        assert_eq!(got, Compatibility::Exact);
    }

    #[test]
    fn disabled_endpoint_incompatible_unless_skip_check() {
        let e = endpoint(ApiFamily::Claude, EndpointKind::Chat, false, true);
        let client = sig(ApiFamily::OpenAI, EndpointKind::Chat);
        assert_eq!(classify_compatibility(client, &e, false, true, false), Compatibility::Incompatible);
        assert_eq!(classify_compatibility(client, &e, false, true, true), Compatibility::Convertible);
    }

    #[test]
    fn streaming_requires_stream_conversion_flag() {
        let e = endpoint(ApiFamily::Claude, EndpointKind::Chat, true, false);
        let client = sig(ApiFamily::OpenAI, EndpointKind::Chat);
        assert_eq!(classify_compatibility(client, &e, true, true, true), Compatibility::Incompatible);
        assert_eq!(classify_compatibility(client, &e, false, true, true), Compatibility::Convertible);
    }

    #[test]
    fn glob_pattern_matches_wildcard_suffix() {
        assert!(glob_match("gpt-4*", "gpt-4-turbo"));
        assert!(!glob_match("gpt-4*", "gpt-3.5"));
    }

    #[test]
    fn allow_list_intersection_narrows_to_common_entries() {
        let a = AllowList {
            models: Some(vec!["gm-a".into(), "gm-b".into()]),
            ..Default::default()
        };
        let b = AllowList {
            models: Some(vec!["gm-b".into(), "gm-c".into()]),
            ..Default::default()
        };
        let merged = a.intersect(&b);
        assert_eq!(merged.models, Some(vec!["gm-b".to_string()]));
    }
}

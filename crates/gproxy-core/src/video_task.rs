//! Minimal submit/poll/billing lifecycle for async video-generation tasks
//! (SPEC_FULL.md §2, grounded on the Python original's `TaskService.poll`/
//! `poll_now` and the `video_poll_interval_seconds`/`video_max_poll_count`
//! config knobs spec.md §6 enumerates). Downloading the generated artifact
//! to the caller is out of scope; only the billing-relevant state machine
//! (`submitted -> polling -> completed|failed`) is driven here.

use std::time::Duration;

use async_trait::async_trait;

use gproxy_provider_core::model::{VideoTask, VideoTaskStatus};
use gproxy_provider_core::store::{ConfigStore, UsageStore};

/// One upstream "check the operation" call. A provider-specific adapter
/// (not part of this crate) translates the raw poll response into this
/// shape; this module only knows about the resulting dimensions.
#[async_trait]
pub trait VideoPoller: Send + Sync {
    async fn poll_once(&self, task: &VideoTask) -> PollOutcome;
}

pub enum PollOutcome {
    StillRunning,
    Done { collected_dimensions: std::collections::HashMap<String, f64> },
    UpstreamFailed { message: String },
}

/// Drives one `VideoTask` through repeated `poll_once` calls until it
/// reaches a terminal state or `video_max_poll_count` is exhausted, sleeping
/// `video_poll_interval_seconds` between attempts. Mirrors `poll_now`'s
/// single-task granularity rather than a batch sweep, so a caller can also
/// drive this from an admin "poll now" action instead of only a background
/// loop.
pub async fn drive_to_completion(
    mut task: VideoTask,
    poller: &dyn VideoPoller,
    usage_store: &dyn UsageStore,
    config: &dyn ConfigStore,
    strict_billing: bool,
) -> VideoTask {
    let interval = Duration::from_secs(config.video_poll_interval_seconds().await);
    let max_polls = config.video_max_poll_count().await;

    task.status = VideoTaskStatus::Polling;
    usage_store.upsert_video_task(task.clone()).await;

    loop {
        if task.poll_count >= max_polls {
            task.status = VideoTaskStatus::Failed;
            usage_store.upsert_video_task(task.clone()).await;
            return task;
        }

        task.poll_count += 1;
        match poller.poll_once(&task).await {
            PollOutcome::StillRunning => {
                usage_store.upsert_video_task(task.clone()).await;
                tokio::time::sleep(interval).await;
            }
            PollOutcome::Done { collected_dimensions } => {
                task.collected_dimensions = collected_dimensions;
                task.finalize(strict_billing);
                usage_store.upsert_video_task(task.clone()).await;
                return task;
            }
            PollOutcome::UpstreamFailed { message } => {
                tracing::warn!(request_id = %task.request_id, %message, "video task poll failed");
                task.status = VideoTaskStatus::Failed;
                usage_store.upsert_video_task(task.clone()).await;
                return task;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_provider_core::model::BillingRuleSnapshot;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockConfig;

    #[async_trait]
    impl ConfigStore for MockConfig {
        async fn provider_priority_mode(&self) -> gproxy_provider_core::store::ProviderPriorityMode {
            gproxy_provider_core::store::ProviderPriorityMode::Provider
        }
        async fn scheduling_mode(&self) -> gproxy_provider_core::store::SchedulingMode {
            gproxy_provider_core::store::SchedulingMode::FixedOrder
        }
        async fn format_conversion_enabled(&self) -> bool {
            false
        }
        async fn billing_strict_mode(&self) -> bool {
            true
        }
        async fn billing_require_rule(&self) -> bool {
            true
        }
        async fn thinking_rectifier_enabled(&self) -> bool {
            true
        }
        async fn video_poll_interval_seconds(&self) -> u64 {
            0
        }
        async fn video_max_poll_count(&self) -> u32 {
            3
        }
        async fn stream_first_byte_timeout_ms(&self) -> u64 {
            15_000
        }
        async fn stream_prefetch_lines(&self) -> usize {
            20
        }
        async fn max_prefetch_bytes(&self) -> usize {
            8 * 1024
        }
        async fn stream_smoothing_enabled(&self) -> bool {
            false
        }
        async fn stream_smoothing_chunk_size(&self) -> usize {
            1
        }
        async fn stream_smoothing_delay_ms(&self) -> u64 {
            0
        }
    }

    struct MockUsageStore {
        saved: Mutex<Vec<VideoTask>>,
    }

    #[async_trait]
    impl UsageStore for MockUsageStore {
        async fn create_pending(&self, _usage: gproxy_provider_core::model::Usage) {}
        async fn update_status(&self, _request_id: &str, _status: gproxy_provider_core::model::UsageStatus) -> bool {
            true
        }
        async fn record_terminal(&self, _usage: gproxy_provider_core::model::Usage) {}
        async fn upsert_candidate(&self, _candidate: gproxy_provider_core::model::RequestCandidate) {}
        async fn cleanup_stale_pending(&self, _timeout_minutes: u64) -> u64 {
            0
        }
        async fn upsert_video_task(&self, task: VideoTask) {
            self.saved.lock().unwrap().push(task);
        }
    }

    fn task() -> VideoTask {
        VideoTask {
            request_id: "req-1".into(),
            provider_id: 1,
            endpoint_id: 1,
            operation_name: "operations/abc".into(),
            status: VideoTaskStatus::Submitted,
            poll_count: 0,
            billing_rule: BillingRuleSnapshot {
                rule_id: "video-v1".into(),
                expression: "duration_seconds * price_per_second".into(),
                variables: HashMap::from([("price_per_second".to_string(), 0.05)]),
                dimension_mappings: HashMap::new(),
            },
            collected_dimensions: HashMap::new(),
            total_cost_usd: 0.0,
        }
    }

    struct CountingPoller {
        done_after: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl VideoPoller for CountingPoller {
        async fn poll_once(&self, _task: &VideoTask) -> PollOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.done_after {
                PollOutcome::Done { collected_dimensions: HashMap::from([("duration_seconds".to_string(), 10.0)]) }
            } else {
                PollOutcome::StillRunning
            }
        }
    }

    #[tokio::test]
    async fn completes_and_bills_once_done() {
        let poller = CountingPoller { done_after: 2, calls: AtomicU32::new(0) };
        let store = MockUsageStore { saved: Mutex::new(Vec::new()) };
        let config = MockConfig;
        let result = drive_to_completion(task(), &poller, &store, &config, true).await;
        assert_eq!(result.status, VideoTaskStatus::Completed);
        assert!((result.total_cost_usd - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exhausting_max_polls_fails_the_task() {
        let poller = CountingPoller { done_after: 100, calls: AtomicU32::new(0) };
        let store = MockUsageStore { saved: Mutex::new(Vec::new()) };
        let config = MockConfig;
        let result = drive_to_completion(task(), &poller, &store, &config, true).await;
        assert_eq!(result.status, VideoTaskStatus::Failed);
    }
}

use std::time::Duration;

use lease::DEFAULT_CONFIRM_DELAY;
use memo_key::PipelineMemospaceHandler;

/// Tunables for one `Runner`. One `RunnerConfig` is expected to be shared by every call the
/// runner makes over its lifetime; per-call variation (pipeline, logic_key, calls) lives in
/// `memo_key::MemoKeyParams` instead.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Root URI every `memo_uri` this runner derives is rooted under.
    pub blob_root: String,
    /// Identifies this orchestrator process in the `writer_id` it stamps onto leases it acquires.
    /// A random two-word suffix is appended per call so that two concurrent calls from the same
    /// process never appear to be the same lease holder.
    pub orchestrator_id: String,
    pub lease_ttl_seconds: i64,
    pub lease_heartbeat: Duration,
    pub confirm_delay: Duration,
    /// How long to keep re-probing and re-waiting on a lock held by someone else before giving up
    /// with [`crate::RunnerError::WaitBudgetExceeded`].
    pub wait_budget: Duration,
    /// When set, a cache miss is never dispatched; [`crate::RunnerError::RequiredResultMissing`] is
    /// raised instead. Used by tooling that wants to assert a pipeline is fully warm.
    pub require_all_results: bool,
    pub deferred_concurrency: usize,
    pub pipeline_memospace_handlers: Vec<PipelineMemospaceHandler>,
    /// Where this process's per-run summary log is rooted; `None` disables summary logging.
    pub summary_dir: Option<String>,
}

impl RunnerConfig {
    pub fn new(blob_root: impl Into<String>, orchestrator_id: impl Into<String>) -> RunnerConfig {
        RunnerConfig {
            blob_root: blob_root.into(),
            orchestrator_id: orchestrator_id.into(),
            lease_ttl_seconds: 120,
            lease_heartbeat: Duration::from_secs(30),
            confirm_delay: DEFAULT_CONFIRM_DELAY,
            wait_budget: Duration::from_secs(600),
            require_all_results: false,
            deferred_concurrency: deferred_work::DEFAULT_CONCURRENCY,
            pipeline_memospace_handlers: vec![],
            summary_dir: None,
        }
    }
}

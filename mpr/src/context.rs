use std::collections::BTreeMap;
use std::sync::Arc;

use memo_key::{CalledFunction, MemoKeyParams};
use runner::{Runner, RunnerError};
use serializer::{ArgValue, ResultMetadata, Source, Thunk};

struct ContextInner {
    runner: Arc<Runner>,
    pipeline_id: String,
    logic_key_overrides: BTreeMap<String, String>,
}

/// The handle application code actually calls through: a `Runner` scoped to one pipeline, plus
/// whatever `logic_key` overrides the caller has layered on for testing or staged rollout.
/// Cheap to clone -- everything behind it is `Arc`-shared.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(runner: Arc<Runner>, pipeline_id: impl Into<String>) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                runner,
                pipeline_id: pipeline_id.into(),
                logic_key_overrides: BTreeMap::new(),
            }),
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.inner.pipeline_id
    }

    pub fn runner(&self) -> &Arc<Runner> {
        &self.inner.runner
    }

    /// Returns a new `Context` sharing this one's `Runner` and overrides but scoped to a different
    /// pipeline -- every call made through it lands under a distinct `pipeline_id` memospace.
    pub fn with_pipeline(&self, pipeline_id: impl Into<String>) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                runner: self.inner.runner.clone(),
                pipeline_id: pipeline_id.into(),
                logic_key_overrides: self.inner.logic_key_overrides.clone(),
            }),
        }
    }

    /// Returns a new `Context` that pins `function_id` to `logic_key` regardless of what a caller
    /// later passes for it -- used to force cache invalidation (or pin a known-good version) for
    /// one function without touching every call site.
    pub fn with_logic_key_override(&self, function_id: impl Into<String>, logic_key: impl Into<String>) -> Context {
        let mut overrides = self.inner.logic_key_overrides.clone();
        overrides.insert(function_id.into(), logic_key.into());
        Context {
            inner: Arc::new(ContextInner {
                runner: self.inner.runner.clone(),
                pipeline_id: self.inner.pipeline_id.clone(),
                logic_key_overrides: overrides,
            }),
        }
    }

    fn resolve_logic_key(&self, function_id: &str, logic_key: Option<String>) -> Option<String> {
        self.inner
            .logic_key_overrides
            .get(function_id)
            .cloned()
            .or(logic_key)
    }

    /// Runs one memoized call under this context's pipeline and logic_key overrides.
    pub async fn call(
        &self,
        function_id: impl Into<String>,
        logic_key: Option<String>,
        calls: Vec<CalledFunction>,
        thunk: Thunk,
        sources: Vec<Source>,
        metadata: ResultMetadata,
    ) -> Result<ArgValue, RunnerError> {
        let function_id = function_id.into();
        let logic_key = self.resolve_logic_key(&function_id, logic_key);
        let params = MemoKeyParams {
            blob_root: self.inner.runner.config().blob_root.clone(),
            pipeline_id: self.inner.pipeline_id.clone(),
            function_id,
            logic_key,
            calls,
        };
        self.inner.runner.call(params, thunk, sources, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blob_store::InMemoryBlobStore;
    use runner::RunnerConfig;
    use shim::{ShimContract, ShimError, ShimResult};

    use super::*;

    struct NeverRespondsShim;

    #[async_trait::async_trait]
    impl ShimContract for NeverRespondsShim {
        async fn dispatch(&self, _memo_uri: &str, _remote_writer_id: &str) -> Result<ShimResult, ShimError> {
            Ok(ShimResult::Completed)
        }
    }

    fn context() -> Context {
        let store: Arc<dyn blob_store::BlobStore> = Arc::new(InMemoryBlobStore::new());
        let runner = Arc::new(Runner::new(store, Arc::new(NeverRespondsShim), RunnerConfig::new("mem://root", "orch")));
        Context::new(runner, "default")
    }

    #[test]
    fn with_pipeline_preserves_the_runner_but_changes_the_pipeline_id() {
        let ctx = context();
        let scoped = ctx.with_pipeline("staging");
        assert_eq!(ctx.pipeline_id(), "default");
        assert_eq!(scoped.pipeline_id(), "staging");
        assert!(Arc::ptr_eq(ctx.runner(), scoped.runner()));
    }

    #[test]
    fn a_logic_key_override_takes_precedence_over_a_passed_one() {
        let ctx = context().with_logic_key_override("mod--callee", "pinned");
        assert_eq!(
            ctx.resolve_logic_key("mod--callee", Some("from-caller".to_owned())),
            Some("pinned".to_owned())
        );
        assert_eq!(
            ctx.resolve_logic_key("mod--other", Some("from-caller".to_owned())),
            Some("from-caller".to_owned())
        );
    }
}

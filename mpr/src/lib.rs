// Licensed under the Apache License, Version 2.0.

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! Top-level assembly for a single-process memoizing pickling runner: loads a [`Config`], wires a
//! [`runner::Runner`] to an in-process shim that dispatches back into `remote_entry::run`, and
//! hands back a [`Context`] application code calls through.

mod config;
mod context;
#[cfg(test)]
mod scenarios;
mod wiring;

use std::sync::Arc;

use blob_store::BlobStore;
use remote_entry::FunctionRegistry;
use runner::{Runner, RunnerError};
use thiserror::Error;

pub use config::{Config, ConfigError, MemospaceHandlerConfig};
pub use context::Context;

#[derive(Debug, Error)]
pub enum MprError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Assembles a [`Context`] that dispatches to `registry`'s functions as spawned tasks in this
/// process. The natural entry point for a single-node deployment or an integration test; a
/// deployment that ships calls to a real cluster would instead build its own `ShimContract` and
/// call `Runner::new` directly.
pub fn build_in_process(
    config: &Config,
    store: Arc<dyn BlobStore>,
    registry: FunctionRegistry,
) -> Result<Context, MprError> {
    let runner_config = config.to_runner_config()?;
    let shim = wiring::build_in_process_shim(
        store.clone(),
        Arc::new(registry),
        runner_config.lease_ttl_seconds,
        runner_config.lease_heartbeat,
        runner_config.deferred_concurrency,
        config.shim_concurrency,
    );
    let runner = Arc::new(Runner::new(store, shim, runner_config));
    Ok(Context::new(runner, config.pipeline_id.clone()))
}

#[cfg(test)]
mod tests {
    use blob_store::InMemoryBlobStore;
    use remote_entry::simple;
    use serializer::{ArgValue, ResultMetadata, Thunk};

    use super::*;

    #[tokio::test]
    async fn a_cold_call_runs_the_registered_function_and_a_warm_call_does_not_redispatch() {
        let config = Config::from_toml_str(r#"blob_root = "mem://root""#).unwrap();
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register(
            "mod--double",
            simple(|thunk| {
                let n = match thunk.args.first() {
                    Some(ArgValue::Int(n)) => *n,
                    _ => 0,
                };
                Ok(ArgValue::Int(n * 2))
            }),
        );

        let ctx = build_in_process(&config, store, registry).unwrap();

        let thunk = Thunk::new("mod--double", vec![ArgValue::Int(21)], Default::default());
        let result = ctx
            .call("mod--double", None, vec![], thunk.clone(), vec![], ResultMetadata::default())
            .await
            .unwrap();
        assert_eq!(result, ArgValue::Int(42));

        let second = ctx
            .call("mod--double", None, vec![], thunk, vec![], ResultMetadata::default())
            .await
            .unwrap();
        assert_eq!(second, ArgValue::Int(42));
    }
}

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

//! Derives the `memo_uri` that names a single invocation's slot in the blob store:
//! `<blob_root>/mops2-mpf/<pipeline_id>/<function_id>[/<logic_key>]/<arg_hash>/`.
//!
//! `arg_hash` folds in both the invocation's own canonicalized arguments and the `logic_key` of
//! every function reachable through a `Callable`-typed argument (the `calls` vector): a callee's
//! behavior change must invalidate every memoized caller that passes it in, even though the
//! callee's identity never appears in the caller's argument values themselves.

mod logic_key;
mod pipeline;

use hashing::human_encode;
use serde::{Deserialize, Serialize};
use serializer::{SerializeError, Thunk};

pub use logic_key::extract_logic_key;
pub use pipeline::{apply_pipeline_memospace_handlers, PipelineMemospaceHandler};

/// The fixed path segment every memo_uri is rooted under, distinguishing this runner's slots from
/// any other tenant of the same blob store.
pub const RUNNER_PREFIX: &str = "mops2-mpf";

/// One function reachable through a `Callable` argument of the invocation being memoized: its
/// `logic_key` is folded into `arg_hash` so that a callee version bump invalidates every caller
/// that was handed it, without the callee's identity appearing in the caller's own arguments.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalledFunction {
    pub arg_name: String,
    pub function_id: String,
    pub logic_key: Option<String>,
}

/// Everything `derive_memo_uri` needs beyond the `Thunk` itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoKeyParams {
    pub blob_root: String,
    pub pipeline_id: String,
    pub function_id: String,
    pub logic_key: Option<String>,
    pub calls: Vec<CalledFunction>,
}

/// Computes the deterministic `memo_uri` for one invocation.
///
/// `arg_hash` is the SHA-256 (human-encoded) of the invocation's canonicalized `argument_bytes`
/// concatenated with the sorted, length-prefixed `calls` vector -- sorting makes the hash
/// independent of the order in which callable arguments were bound.
pub fn derive_memo_uri(
    params: &MemoKeyParams,
    thunk: &Thunk,
    handlers: &[PipelineMemospaceHandler],
) -> Result<String, SerializeError> {
    let arg_hash = human_encode(compute_arg_hash(thunk, &params.calls)?.hash.as_bytes());

    let pipeline_id = apply_pipeline_memospace_handlers(
        &params.function_id,
        &params.pipeline_id,
        handlers,
    );

    let mut segments = vec![
        trim_slashes(&params.blob_root),
        RUNNER_PREFIX.to_owned(),
        pipeline_id,
        params.function_id.clone(),
    ];
    if let Some(logic_key) = &params.logic_key {
        segments.push(logic_key.clone());
    }
    segments.push(arg_hash);

    Ok(format!("{}/", segments.join("/")))
}

fn compute_arg_hash(
    thunk: &Thunk,
    calls: &[CalledFunction],
) -> Result<hashing::Digest, SerializeError> {
    let mut sorted_calls = calls.to_vec();
    sorted_calls.sort();

    let mut bytes = thunk.argument_bytes()?;
    for call in &sorted_calls {
        bytes.extend_from_slice(call.arg_name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(call.function_id.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(call.logic_key.as_deref().unwrap_or("").as_bytes());
        bytes.push(0);
    }
    Ok(hashing::Digest::of_bytes(&bytes))
}

fn trim_slashes(s: &str) -> String {
    s.trim_matches('/').to_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serializer::ArgValue;

    use super::*;

    fn params() -> MemoKeyParams {
        MemoKeyParams {
            blob_root: "s3://bucket/root/".to_owned(),
            pipeline_id: "default".to_owned(),
            function_id: "mod--f".to_owned(),
            logic_key: None,
            calls: vec![],
        }
    }

    fn thunk() -> Thunk {
        Thunk::new("mod--f", vec![ArgValue::Int(7)], BTreeMap::new())
    }

    #[test]
    fn memo_uri_has_the_expected_shape() {
        let uri = derive_memo_uri(&params(), &thunk(), &[]).unwrap();
        assert!(uri.starts_with("s3://bucket/root/mops2-mpf/default/mod--f/"));
        assert!(uri.ends_with('/'));
    }

    #[test]
    fn logic_key_adds_a_path_segment() {
        let mut p = params();
        p.logic_key = Some("v2".to_owned());
        let uri = derive_memo_uri(&p, &thunk(), &[]).unwrap();
        assert!(uri.contains("/mod--f/v2/"));
    }

    #[test]
    fn different_arguments_produce_different_memo_uris() {
        let uri1 = derive_memo_uri(&params(), &thunk(), &[]).unwrap();
        let other = Thunk::new("mod--f", vec![ArgValue::Int(8)], BTreeMap::new());
        let uri2 = derive_memo_uri(&params(), &other, &[]).unwrap();
        assert_ne!(uri1, uri2);
    }

    #[test]
    fn a_called_functions_logic_key_affects_the_memo_uri() {
        let mut p1 = params();
        p1.calls = vec![CalledFunction {
            arg_name: "cb".to_owned(),
            function_id: "mod--callee".to_owned(),
            logic_key: Some("v1".to_owned()),
        }];
        let mut p2 = p1.clone();
        p2.calls[0].logic_key = Some("v2".to_owned());

        let uri1 = derive_memo_uri(&p1, &thunk(), &[]).unwrap();
        let uri2 = derive_memo_uri(&p2, &thunk(), &[]).unwrap();
        assert_ne!(uri1, uri2);
    }

    #[test]
    fn call_order_does_not_affect_the_memo_uri() {
        let mut p1 = params();
        p1.calls = vec![
            CalledFunction {
                arg_name: "a".to_owned(),
                function_id: "mod--x".to_owned(),
                logic_key: None,
            },
            CalledFunction {
                arg_name: "b".to_owned(),
                function_id: "mod--y".to_owned(),
                logic_key: None,
            },
        ];
        let mut p2 = p1.clone();
        p2.calls.reverse();

        let uri1 = derive_memo_uri(&p1, &thunk(), &[]).unwrap();
        let uri2 = derive_memo_uri(&p2, &thunk(), &[]).unwrap();
        assert_eq!(uri1, uri2);
    }

    #[test]
    fn pipeline_memospace_handlers_can_override_pipeline_id() {
        let handlers = vec![PipelineMemospaceHandler::new("^mod--", "override").unwrap()];
        let uri = derive_memo_uri(&params(), &thunk(), &handlers).unwrap();
        assert!(uri.contains("/mops2-mpf/override/"));
    }
}

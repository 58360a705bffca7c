//! Scenario tests exercising the fully assembled stack: `Config` -> `build_in_process` ->
//! `Context` -> in-process shim -> `remote_entry::run` -> a registered user function. Unit-level
//! coverage for the individual cache/lease/upload mechanics lives alongside `runner` itself; these
//! tests only cover what requires every crate wired together.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blob_store::{BlobStore, InMemoryBlobStore};
use deferred_work::DeferredTask;
use remote_entry::{FunctionOutput, FunctionRegistry, UserFunction};
use serializer::{ArgValue, ResultMetadata, Source, Thunk};

use crate::{build_in_process, Config};

fn config() -> Config {
    Config::from_toml_str(
        r#"
        blob_root = "mem://root"
        lease_ttl_seconds = 10
        lease_heartbeat_seconds = 1
        wait_budget_seconds = 5
        shim_concurrency = 8
        "#,
    )
    .unwrap()
}

/// S3 -- two concurrent callers of the same `(function, args)` converge on a single dispatch: the
/// loser of the lease race waits for the winner's result instead of re-running the function.
#[tokio::test]
async fn concurrent_callers_trigger_exactly_one_dispatch() {
    let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    let dispatches = Arc::new(AtomicUsize::new(0));

    let counted = dispatches.clone();
    let function: UserFunction = Arc::new(move |_thunk| {
        let counted = counted.clone();
        Box::pin(async move {
            counted.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            FunctionOutput {
                value: Ok(ArgValue::Int(1)),
                called_logic_keys: BTreeMap::new(),
                pending_uploads: vec![],
            }
        }) as Pin<Box<_>>
    });

    let mut registry = FunctionRegistry::new();
    registry.register("mod--slow", function);

    let ctx = build_in_process(&config(), store, registry).unwrap();
    let thunk = Thunk::new("mod--slow", vec![ArgValue::Int(7)], BTreeMap::new());

    let ctx_a = ctx.clone();
    let thunk_a = thunk.clone();
    let ctx_b = ctx.clone();
    let thunk_b = thunk.clone();

    let (a, b) = tokio::join!(
        ctx_a.call("mod--slow", None, vec![], thunk_a, vec![], ResultMetadata::default()),
        ctx_b.call("mod--slow", None, vec![], thunk_b, vec![], ResultMetadata::default()),
    );

    assert_eq!(a.unwrap(), ArgValue::Int(1));
    assert_eq!(b.unwrap(), ArgValue::Int(1));
    assert_eq!(dispatches.load(Ordering::SeqCst), 1);
}

/// S6 -- a returned large object round-trips: the bytes read back through
/// `Runner::resolve_large_object` equal the bytes the remote function hashed when it produced
/// them, and the blob actually exists at the content-addressed URI the envelope references.
#[tokio::test]
async fn a_large_object_returned_by_a_call_round_trips() {
    let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    let payload = vec![7u8; 1024 * 1024];

    let payload_for_fn = payload.clone();
    let function: UserFunction = Arc::new(move |_thunk| {
        let source = Source::named(payload_for_fn.clone(), "big.bin");
        Box::pin(async move {
            let large = source.as_ref();
            let uri = format!(
                "mem://root/{}/objects/{}",
                memo_key::RUNNER_PREFIX,
                large.content_hash.hash.to_hex()
            );
            FunctionOutput {
                value: Ok(ArgValue::Large(large)),
                called_logic_keys: BTreeMap::new(),
                pending_uploads: vec![DeferredTask::UploadLargeObject {
                    content_hash: source.content_hash().hash,
                    uri,
                    bytes: source.bytes,
                }],
            }
        }) as Pin<Box<_>>
    });

    let mut registry = FunctionRegistry::new();
    registry.register("mod--big", function);

    let ctx = build_in_process(&config(), store, registry).unwrap();
    let thunk = Thunk::new("mod--big", vec![], BTreeMap::new());

    let result = ctx
        .call("mod--big", None, vec![], thunk, vec![], ResultMetadata::default())
        .await
        .unwrap();

    let large = match result {
        ArgValue::Large(large) => large,
        other => panic!("expected a large object reference, got {other:?}"),
    };
    assert_eq!(large.size(), payload.len());

    let resolved = ctx.runner().resolve_large_object(&large).await.unwrap();
    assert_eq!(resolved, payload);
}

#[tokio::test]
async fn a_logic_key_bump_produces_a_fresh_dispatch_under_the_real_stack() {
    let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    let dispatches = Arc::new(AtomicUsize::new(0));

    let counted = dispatches.clone();
    let function: UserFunction = Arc::new(move |thunk| {
        let counted = counted.clone();
        let n = match thunk.args.first() {
            Some(ArgValue::Int(n)) => *n,
            _ => 0,
        };
        Box::pin(async move {
            counted.fetch_add(1, Ordering::SeqCst);
            FunctionOutput {
                value: Ok(ArgValue::Int(n)),
                called_logic_keys: BTreeMap::new(),
                pending_uploads: vec![],
            }
        }) as Pin<Box<_>>
    });

    let mut registry = FunctionRegistry::new();
    registry.register("mod--versioned", function);

    let ctx = build_in_process(&config(), store, registry).unwrap();
    let thunk = Thunk::new("mod--versioned", vec![ArgValue::Int(5)], BTreeMap::new());

    let v1 = ctx.with_logic_key_override("mod--versioned", "v1");
    v1.call("mod--versioned", None, vec![], thunk.clone(), vec![], ResultMetadata::default())
        .await
        .unwrap();

    let v2 = ctx.with_logic_key_override("mod--versioned", "v2");
    v2.call("mod--versioned", None, vec![], thunk, vec![], ResultMetadata::default())
        .await
        .unwrap();

    assert_eq!(dispatches.load(Ordering::SeqCst), 2);
}

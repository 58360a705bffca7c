use std::collections::BTreeMap;

use hashing::Digest;
use serde::{Deserialize, Serialize};

/// A reference to bytes that live in content-addressed storage rather than being embedded inline.
/// Equal `(content_hash, size)` is taken to imply equivalent bytes (the data model's invariant);
/// nothing here re-verifies that on construction, only on retrieval (see `HashMismatch` in the
/// `runner` crate).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LargeObjectRef {
    pub content_hash: Digest,
    pub logical_name: Option<String>,
}

impl LargeObjectRef {
    pub fn size(&self) -> usize {
        self.content_hash.size_bytes
    }
}

/// A large object that has not yet been uploaded to the blob store. Produced by callers wrapping
/// an in-memory blob they want treated as a `LargeObjectRef` rather than embedded inline; consumed
/// by `deferred_work::upload_large_objects`.
#[derive(Clone, Debug)]
pub struct Source {
    pub bytes: Vec<u8>,
    pub logical_name: Option<String>,
}

impl Source {
    pub fn new(bytes: Vec<u8>) -> Source {
        Source {
            bytes,
            logical_name: None,
        }
    }

    pub fn named(bytes: Vec<u8>, logical_name: impl Into<String>) -> Source {
        Source {
            bytes,
            logical_name: Some(logical_name.into()),
        }
    }

    pub fn content_hash(&self) -> Digest {
        Digest::of_bytes(&self.bytes)
    }

    pub fn as_ref(&self) -> LargeObjectRef {
        LargeObjectRef {
            content_hash: self.content_hash(),
            logical_name: self.logical_name.clone(),
        }
    }
}

/// A reference to a pipeline-scoped shared object: uploaded once per pipeline lifetime (keyed by
/// `name`, not by content) and re-referenced by name on every later occurrence.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SharedRef {
    pub name: String,
}

/// The dynamic value space that arguments, return values, and exceptions are built from. This is
/// the Rust-idiomatic analogue of "whatever the host language's pickler accepts": a closed, typed
/// enum rather than an open `Any`, so that unsupported values are a compile error instead of a
/// runtime serialization failure wherever a caller controls the type.
///
/// `Set` is order-indeterminate and MUST be canonicalized (see `canonical::canonicalize_set`)
/// before it is hashed or embedded in a `Thunk`; the two-stage API in `codec` enforces this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<ArgValue>),
    Set(Vec<ArgValue>),
    Map(BTreeMap<String, ArgValue>),
    Large(LargeObjectRef),
    Shared(SharedRef),
}

/// A thin newtype so that `f64` (which has no total order) can still appear in a value that needs
/// to be sorted deterministically for set canonicalization and `BTreeMap` keys elsewhere.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

use std::collections::BTreeMap;

use hashing::Digest;
use serde::{Deserialize, Serialize};

use crate::canonical::canonicalize;
use crate::codec::{decode, encode, SerializeError};
use crate::value::ArgValue;

/// One invocation: a fully-qualified callable reference plus its bound arguments. Serializing a
/// `Thunk` is deterministic up to `codec::WIRE_PROTOCOL_VERSION`; `hash` is the SHA-256 of that
/// deterministic form, i.e. `argument_bytes` from the data model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thunk {
    pub func_ref: String,
    pub args: Vec<ArgValue>,
    pub kwargs: BTreeMap<String, ArgValue>,
}

impl Thunk {
    pub fn new(
        func_ref: impl Into<String>,
        args: Vec<ArgValue>,
        kwargs: BTreeMap<String, ArgValue>,
    ) -> Thunk {
        Thunk {
            func_ref: func_ref.into(),
            args,
            kwargs,
        }
    }

    /// `argument_bytes`: the canonical, deterministic serialization used for hashing. Does not
    /// include `func_ref` -- the memo_uri already folds `function_id` in separately (see
    /// `memo_key`), and keeping it out of `argument_bytes` means the same arguments hash the same
    /// way regardless of which alias a caller used to reach the function.
    pub fn argument_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        let canonical_args = self
            .args
            .iter()
            .enumerate()
            .map(|(i, a)| canonicalize(&format!("args[{i}]"), a))
            .collect::<Result<Vec<_>, _>>()?;
        let canonical_kwargs = self
            .kwargs
            .iter()
            .map(|(k, v)| Ok((k.clone(), canonicalize(&format!("kwargs.{k}"), v)?)))
            .collect::<Result<BTreeMap<_, _>, SerializeError>>()?;
        encode("argument_bytes", &(canonical_args, canonical_kwargs))
    }

    pub fn hash(&self) -> Result<Digest, SerializeError> {
        Ok(Digest::of_bytes(&self.argument_bytes()?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        encode("thunk", self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Thunk, SerializeError> {
        decode("thunk", bytes)
    }
}

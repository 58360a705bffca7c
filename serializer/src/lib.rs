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

//! Turns a `(callable-ref, args, kwargs)` tuple and returned values into portable, deterministic
//! bytes (`SER-P`), and recognizes the well-known "large object" and "shared object" value shapes
//! that get redirected to content-addressed blobs instead of being embedded inline.

mod canonical;
mod codec;
mod envelope;
mod thunk;
mod value;

pub use canonical::canonicalize;
pub use codec::{decode, encode, SerializeError, WIRE_PROTOCOL_VERSION};
pub use envelope::{EnvelopeKind, ExceptionInfo, ResultEnvelope, ResultMetadata};
pub use thunk::Thunk;
pub use value::{ArgValue, LargeObjectRef, OrderedFloat, SharedRef, Source};

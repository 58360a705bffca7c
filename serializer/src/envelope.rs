use std::collections::BTreeMap;

use blob_store::BlobRef;
use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode, SerializeError};
use crate::value::ArgValue;

/// Sidecar metadata carried by every `result`/`exception` envelope, per the data model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub invoked_at: String,
    pub invoked_by: String,
    pub invoker_code_version: String,
    pub invoker_uuid: String,
    pub pipeline_id: String,
    pub remote_code_version: String,
    pub remote_started_at: Option<String>,
    pub remote_ended_at: Option<String>,
    pub remote_wall_seconds: Option<f64>,
    pub result_wall_seconds: Option<f64>,
    /// The `logic_key` observed for every sub-function called while producing this result, keyed
    /// by `function_id`. Compared against the caller's currently-expected logic_keys on the next
    /// call to this memo_uri; a mismatch is treated as a cache miss (auto-invalidation).
    pub called_logic_keys: BTreeMap<String, String>,
    pub extra: BTreeMap<String, String>,
}

/// A user-function exception, captured with enough information to re-raise on the orchestrator
/// side without masquerading as an mops-internal error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub exception_type: String,
    pub exception_repr: String,
    pub remote_traceback: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    Ok,
    Err,
}

/// The final serialized outcome of one remote run: either a returned value or a captured
/// exception, plus its metadata and any `LargeObjectRef` blobs it references.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub kind: EnvelopeKind,
    pub payload_bytes: Vec<u8>,
    pub metadata: ResultMetadata,
    pub sources: Vec<BlobRef>,
}

impl ResultEnvelope {
    pub fn ok(value: &ArgValue, metadata: ResultMetadata, sources: Vec<BlobRef>) -> Result<ResultEnvelope, SerializeError> {
        Ok(ResultEnvelope {
            kind: EnvelopeKind::Ok,
            payload_bytes: encode("result.payload", value)?,
            metadata,
            sources,
        })
    }

    pub fn err(exception: &ExceptionInfo, metadata: ResultMetadata) -> Result<ResultEnvelope, SerializeError> {
        Ok(ResultEnvelope {
            kind: EnvelopeKind::Err,
            payload_bytes: encode("result.payload", exception)?,
            metadata,
            sources: vec![],
        })
    }

    pub fn value(&self) -> Result<ArgValue, SerializeError> {
        decode("result.payload", &self.payload_bytes)
    }

    pub fn exception(&self) -> Result<ExceptionInfo, SerializeError> {
        decode("result.payload", &self.payload_bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        encode("result", self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ResultEnvelope, SerializeError> {
        decode("result", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_round_trips_its_value() {
        let envelope = ResultEnvelope::ok(
            &ArgValue::Text("done".to_owned()),
            ResultMetadata::default(),
            vec![],
        )
        .unwrap();
        assert_eq!(envelope.value().unwrap(), ArgValue::Text("done".to_owned()));
    }

    #[test]
    fn err_envelope_round_trips_its_exception() {
        let exception = ExceptionInfo {
            exception_type: "ValueError".to_owned(),
            exception_repr: "boom".to_owned(),
            remote_traceback: "line 1\nline 2".to_owned(),
        };
        let envelope = ResultEnvelope::err(&exception, ResultMetadata::default()).unwrap();
        assert_eq!(envelope.exception().unwrap(), exception);
    }
}

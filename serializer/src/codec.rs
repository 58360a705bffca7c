use serde::de::DeserializeOwned;
use serde::Serialize;

/// `SER-P`: the pinned wire protocol version. Bumping this is a breaking change to every existing
/// `memo_uri` (the data model requires `argument_bytes` to never change for the same logical
/// inputs under a fixed serializer version) so it is bumped deliberately, never implicitly via a
/// dependency upgrade.
pub const WIRE_PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("failed to encode value at {path}: {message}")]
    Encode { path: String, message: String },
    #[error("failed to decode value at {path}: {message}")]
    Decode { path: String, message: String },
    #[error("cyclic or otherwise unsupported value at {path}")]
    Unsupported { path: String },
}

/// Encode `value` under the pinned SER-P protocol, prefixed with the protocol version byte so a
/// decoder can refuse bytes written by an incompatible version rather than silently misparsing
/// them.
pub fn encode<T: Serialize>(path: &str, value: &T) -> Result<Vec<u8>, SerializeError> {
    let mut out = vec![WIRE_PROTOCOL_VERSION];
    let body = bincode::serialize(value).map_err(|e| SerializeError::Encode {
        path: path.to_owned(),
        message: e.to_string(),
    })?;
    out.extend(body);
    Ok(out)
}

/// Decode bytes previously produced by `encode`, rejecting anything written under a different
/// protocol version.
pub fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T, SerializeError> {
    let (version, body) = bytes.split_first().ok_or_else(|| SerializeError::Decode {
        path: path.to_owned(),
        message: "empty payload".to_owned(),
    })?;
    if *version != WIRE_PROTOCOL_VERSION {
        return Err(SerializeError::Decode {
            path: path.to_owned(),
            message: format!(
                "unsupported wire protocol version {version}, expected {WIRE_PROTOCOL_VERSION}"
            ),
        });
    }
    bincode::deserialize(body).map_err(|e| SerializeError::Decode {
        path: path.to_owned(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value() {
        let bytes = encode("root", &42u64).unwrap();
        let back: u64 = decode("root", &bytes).unwrap();
        assert_eq!(back, 42);
    }

    #[test]
    fn rejects_bytes_from_a_different_protocol_version() {
        let mut bytes = encode("root", &42u64).unwrap();
        bytes[0] = WIRE_PROTOCOL_VERSION + 1;
        assert!(decode::<u64>("root", &bytes).is_err());
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode("root", &"stable value".to_owned()).unwrap();
        let b = encode("root", &"stable value".to_owned()).unwrap();
        assert_eq!(a, b);
    }
}

use hashing::Fingerprint;
use serde::{Deserialize, Serialize};

/// The content-addressed pool every large object lives in, shared across every `memo_uri` under
/// the same `blob_root` -- two calls that happen to pass the same bytes share the upload.
const OBJECTS_SEGMENT: &str = "objects";

pub(crate) fn large_object_uri(blob_root: &str, content_hash: &Fingerprint) -> String {
    format!(
        "{}/{}/{OBJECTS_SEGMENT}/{}",
        blob_root.trim_matches('/'),
        memo_key::RUNNER_PREFIX,
        content_hash.to_hex()
    )
}

/// A tiny sidecar describing a large object's provenance, written alongside the object itself so a
/// later reader can learn its logical name and size without downloading the payload.
#[derive(Serialize, Deserialize)]
pub(crate) struct HashRefEntry {
    pub content_hash: String,
    pub size: usize,
    pub logical_name: Option<String>,
}

pub(crate) fn hashref_uri(large_object_uri: &str) -> String {
    format!("{large_object_uri}.hashref")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_is_rooted_under_the_blob_root_and_keyed_by_hash() {
        let hash = Fingerprint::from_bytes(b"payload");
        let uri = large_object_uri("s3://bucket/root/", &hash);
        assert_eq!(
            uri,
            format!("s3://bucket/root/mops2-mpf/objects/{}", hash.to_hex())
        );
    }

    #[test]
    fn different_bytes_produce_different_uris() {
        let a = large_object_uri("s3://bucket/root", &Fingerprint::from_bytes(b"one"));
        let b = large_object_uri("s3://bucket/root", &Fingerprint::from_bytes(b"two"));
        assert_ne!(a, b);
    }
}

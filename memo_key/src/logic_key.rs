use once_cell::sync::Lazy;
use regex::Regex;

static LOGIC_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"function-logic-key:\s*(\S+)").expect("static pattern is valid"));

/// Extracts the `logic_key` marker from a function's documentation: the first non-whitespace
/// token following a `function-logic-key:` marker anywhere in `doc`. Absent a marker, a function
/// has no logic_key and its memo_uri omits that path segment.
pub fn extract_logic_key(doc: &str) -> Option<String> {
    LOGIC_KEY_PATTERN
        .captures(doc)
        .map(|captures| captures[1].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_token_after_the_marker() {
        let doc = "Computes a thing.\n\nfunction-logic-key: v2\n";
        assert_eq!(extract_logic_key(doc), Some("v2".to_owned()));
    }

    #[test]
    fn returns_none_without_a_marker() {
        assert_eq!(extract_logic_key("Just a docstring."), None);
    }

    #[test]
    fn a_version_bump_changes_the_extracted_key() {
        let v1 = extract_logic_key("function-logic-key: v1");
        let v2 = extract_logic_key("function-logic-key: v2");
        assert_ne!(v1, v2);
    }
}

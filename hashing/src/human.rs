//! Human-readable encoding for `arg_hash` and `run_id` tokens.
//!
//! The encoding is a fixed dictionary of short words plus a base64 suffix: the words are a
//! mnemonic prefix derived from the first two bytes of the input (purely for readability in logs
//! and directory listings), and the base64 suffix carries every input byte, so decoding never
//! depends on the dictionary being injective.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

// Deliberately short and pronounceable; collisions between two different fingerprints sharing a
// word pair are expected and harmless, since the base64 suffix is what actually disambiguates.
const WORDS: &[&str] = &[
    "amber", "ash", "birch", "brook", "cedar", "clay", "cliff", "cloud", "coal", "copper", "coral",
    "crane", "creek", "crow", "dawn", "delta", "dune", "dusk", "ember", "fern", "finch", "flint",
    "fog", "forge", "fox", "frost", "glade", "glen", "gold", "grove", "gull", "harbor", "hawk",
    "haze", "heath", "holly", "iris", "ivy", "jade", "kelp", "lake", "larch", "lark", "leaf",
    "lichen", "lily", "loam", "lotus", "maple", "marsh", "mesa", "mint", "mist", "moor", "moss",
    "oak", "oasis", "onyx", "opal", "otter", "owl", "peak", "pearl", "pine", "plain", "plum",
    "pond", "quail", "quarry", "quartz", "rain", "reed", "reef", "ridge", "river", "rust", "sage",
    "sand", "shale", "shore", "slate", "snow", "spruce", "stone", "storm", "stream", "summit",
    "swan", "tern", "thorn", "tide", "timber", "vale", "vine", "wave", "wheat", "willow", "wind",
    "wren",
];

/// Encode `bytes` as `<word>-<word>-<base64url(bytes)>`. Stable for a fixed `bytes` input.
pub fn human_encode(bytes: &[u8]) -> String {
    let w1 = WORDS[*bytes.first().unwrap_or(&0) as usize % WORDS.len()];
    let w2 = WORDS[*bytes.get(1).unwrap_or(&0) as usize % WORDS.len()];
    let suffix = URL_SAFE_NO_PAD.encode(bytes);
    format!("{w1}-{w2}-{suffix}")
}

/// Recover the original bytes from a token produced by `human_encode`.
pub fn human_decode(token: &str) -> Result<Vec<u8>, String> {
    let suffix = token
        .rsplit('-')
        .next()
        .ok_or_else(|| format!("malformed human-encoded token: {token:?}"))?;
    URL_SAFE_NO_PAD
        .decode(suffix)
        .map_err(|e| format!("malformed base64 suffix in token {token:?}: {e}"))
}

/// A short, human-friendly two-word token with no positional meaning, used to disambiguate
/// concurrent `run_id`s that share a timestamp prefix.
pub fn two_word_token() -> String {
    let mut rng = rand::rng();
    let mut buf = [0u8; 2];
    rng.fill_bytes(&mut buf);
    format!(
        "{}{}",
        capitalize(WORDS[buf[0] as usize % WORDS.len()]),
        capitalize(WORDS[buf[1] as usize % WORDS.len()])
    )
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let input = b"some arbitrary argument bytes to hash";
        let token = human_encode(input);
        assert_eq!(human_decode(&token).unwrap(), input);
    }

    #[test]
    fn encode_is_deterministic() {
        let input = b"deterministic input";
        assert_eq!(human_encode(input), human_encode(input));
    }

    #[test]
    fn two_word_token_starts_with_a_capital_letter() {
        let token = two_word_token();
        assert!(token.chars().next().unwrap().is_uppercase());
        assert!(token.chars().any(|c| c.is_lowercase()));
    }
}

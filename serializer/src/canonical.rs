use crate::codec::{encode, SerializeError};
use crate::value::ArgValue;

/// Recursively canonicalizes a value so that its encoded bytes are deterministic regardless of
/// the order order-indeterminate containers (`Set`) were built in: each `Set`'s elements are
/// sorted by their own encoded bytes. `List` and `Map` are already ordered (`Map` via `BTreeMap`)
/// and are only recursed into.
pub fn canonicalize(path: &str, value: &ArgValue) -> Result<ArgValue, SerializeError> {
    Ok(match value {
        ArgValue::List(items) => ArgValue::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| canonicalize(&format!("{path}[{i}]"), item))
                .collect::<Result<_, _>>()?,
        ),
        ArgValue::Map(entries) => ArgValue::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), canonicalize(&format!("{path}.{k}"), v)?)))
                .collect::<Result<_, SerializeError>>()?,
        ),
        ArgValue::Set(items) => {
            let mut canonical_items = items
                .iter()
                .enumerate()
                .map(|(i, item)| canonicalize(&format!("{path}{{{i}}}"), item))
                .collect::<Result<Vec<_>, _>>()?;
            let mut keyed: Vec<(Vec<u8>, ArgValue)> = canonical_items
                .drain(..)
                .map(|item| Ok((encode(path, &item)?, item)))
                .collect::<Result<_, SerializeError>>()?;
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            ArgValue::Set(keyed.into_iter().map(|(_, item)| item).collect())
        }
        other => other.clone(),
    })
}

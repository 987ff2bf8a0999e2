//! Deserializers for engine-produced JSON, which is loosely typed.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// `null`, a single string, or a list of strings; always a list afterwards.
pub(crate) fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(other).into_iter().collect(),
    })
}

/// Strings, numbers and booleans as text; `null` as empty.
pub(crate) fn stringish<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value).unwrap_or_default())
}

/// Like [`stringish`], but absent text stays `None`.
pub(crate) fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value))
}

/// Numeric score rounded and clamped to `0..=100`.
pub(crate) fn score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let n = match &value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(n.round().clamp(0.0, 100.0) as u8)
}

/// Booleans, `"yes"`/`"true"`-style strings and non-zero numbers are `true`.
/// Anything else, `null` included, is `false`.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1" | "on"
        ),
        _ => false,
    })
}

/// Non-negative count from a number, a float or numeric text; otherwise 0.
pub(crate) fn count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(count_value(&value))
}

/// Object of counts; entries whose value is not a count are read as 0.
/// A non-object is an empty map.
pub(crate) fn count_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (key, count_value(&value)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// A nested object, or shorthand text for it.
///
/// Text goes through `From<String>`, a list of strings is joined with `"; "`
/// first. Other scalars and `null` give the default.
pub(crate) fn text_or_struct<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default + From<String>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(_) => serde_json::from_value(value).map_err(D::Error::custom),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(scalar_to_string).collect();
            if parts.is_empty() {
                Ok(T::default())
            } else {
                Ok(T::from(parts.join("; ")))
            }
        }
        Value::String(_) => Ok(scalar_to_string(value).map(T::from).unwrap_or_default()),
        _ => Ok(T::default()),
    }
}

pub(crate) fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn count_value(value: &Value) -> u64 {
    let n = match value {
        Value::Number(n) => match n.as_u64() {
            Some(n) => return n,
            None => n.as_f64().unwrap_or(0.0),
        },
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() && n > 0.0 {
        n.round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "flag")]
        on: bool,
        #[serde(default, deserialize_with = "count")]
        n: u64,
        #[serde(default, deserialize_with = "count_map")]
        by: BTreeMap<String, u64>,
    }

    fn sample(value: Value) -> Sample {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn flags_accept_yes_and_numbers() {
        assert!(sample(json!({"on": "yes"})).on);
        assert!(sample(json!({"on": " True "})).on);
        assert!(sample(json!({"on": 1})).on);
        assert!(!sample(json!({"on": "no"})).on);
        assert!(!sample(json!({"on": null})).on);
        assert!(!sample(json!({"on": ["yes"]})).on);
    }

    #[test]
    fn counts_accept_floats_and_numeric_text() {
        assert_eq!(sample(json!({"n": 12})).n, 12);
        assert_eq!(sample(json!({"n": 12.6})).n, 13);
        assert_eq!(sample(json!({"n": "140"})).n, 140);
        assert_eq!(sample(json!({"n": -3})).n, 0);
        assert_eq!(sample(json!({"n": "about a hundred"})).n, 0);
    }

    #[test]
    fn count_maps_tolerate_bad_values() {
        let s = sample(json!({"by": {"ts": "120", "rs": 4.0, "md": "many"}}));
        assert_eq!(s.by.get("ts"), Some(&120));
        assert_eq!(s.by.get("rs"), Some(&4));
        assert_eq!(s.by.get("md"), Some(&0));
        assert!(sample(json!({"by": [1, 2]})).by.is_empty());
    }
}

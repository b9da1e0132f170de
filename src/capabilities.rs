use serde_json::{Map, Value};

use crate::error::{DriverError, Result};

/// The session capability document: string keys mapped to JSON values,
/// immutable for the lifetime of a session once negotiated.
pub type Capabilities = Map<String, Value>;

/// Merge client-requested capabilities over the server defaults.
///
/// Keys inside a `desiredCapabilities` block are merged recursively for
/// backwards compatibility with clients that still nest them. Every entry
/// of a `requiredCapabilities` block must exactly equal the value already
/// negotiated; mismatches are collected across the whole block and reported
/// together in a single session-not-created error rather than failing on
/// the first one.
pub fn merge(current: &Capabilities, requested: &Capabilities) -> Result<Capabilities> {
    let mut merged = current.clone();
    apply(&mut merged, requested, current)?;
    Ok(merged)
}

fn apply(to: &mut Capabilities, from: &Capabilities, negotiated: &Capabilities) -> Result<()> {
    let mut mismatches = Vec::new();

    for (key, value) in from {
        match key.as_str() {
            "desiredCapabilities" => {
                if let Some(desired) = value.as_object() {
                    apply(to, desired, negotiated)?;
                }
            }
            "requiredCapabilities" => {
                if let Some(required) = value.as_object() {
                    for (cap, expected) in required {
                        if negotiated.get(cap) != Some(expected) {
                            mismatches.push(format!(
                                "{cap}: {expected} does not equal {}",
                                negotiated.get(cap).unwrap_or(&Value::Null)
                            ));
                        }
                    }
                }
            }
            _ => {}
        }
        to.insert(key.clone(), value.clone());
    }

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(DriverError::SessionNotCreated(format!(
            "Not all requiredCapabilities could be met: {}",
            mismatches.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps(v: Value) -> Capabilities {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn requested_values_overwrite_defaults() {
        let current = caps(json!({"a": 1, "b": 2}));
        let merged = merge(&current, &caps(json!({"b": 3, "foo": "x"}))).unwrap();
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"], json!(3));
        assert_eq!(merged["foo"], json!("x"));
    }

    #[test]
    fn desired_block_merges_recursively() {
        let current = caps(json!({"a": 1}));
        let merged = merge(
            &current,
            &caps(json!({"desiredCapabilities": {"foo": "x"}})),
        )
        .unwrap();
        assert_eq!(merged["foo"], json!("x"));
    }

    #[test]
    fn required_mismatch_fails() {
        let current = caps(json!({"a": 1, "b": 2}));
        let err = merge(
            &current,
            &caps(json!({"requiredCapabilities": {"a": 1, "b": 3}})),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("b: 3 does not equal 2"));
        assert!(!msg.contains("a: 1"));
    }

    #[test]
    fn all_required_mismatches_are_collected() {
        let current = caps(json!({"a": 1, "b": 2}));
        let err = merge(
            &current,
            &caps(json!({"requiredCapabilities": {"a": 9, "b": 3}})),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("a: 9 does not equal 1"));
        assert!(msg.contains("b: 3 does not equal 2"));
    }

    #[test]
    fn matching_required_succeeds() {
        let current = caps(json!({"a": 1}));
        let merged = merge(&current, &caps(json!({"requiredCapabilities": {"a": 1}}))).unwrap();
        assert_eq!(merged["a"], json!(1));
    }
}

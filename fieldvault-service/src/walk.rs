//! Depth-first rewriting of envelope nodes in a JSON document.

use crate::envelope::is_envelope;
use crate::error::ServiceResult;
use serde_json::{Map, Value};

/// Copies `document`, replacing every envelope node with the output of
/// `transform`.
///
/// Object fields and array elements are visited in document order and key
/// order is preserved. `transform` returns `Ok(None)` to leave an envelope as
/// it is. A replacement is walked in turn, so an envelope that decrypts to
/// another envelope (or to a document containing envelopes) is fully
/// unwrapped. The first error aborts the walk.
pub fn walk<F>(document: &Value, transform: &mut F) -> ServiceResult<Value>
where
    F: FnMut(&Value) -> ServiceResult<Option<Value>>,
{
    if is_envelope(document) {
        return match transform(document)? {
            Some(replacement) => walk(&replacement, transform),
            None => Ok(document.clone()),
        };
    }

    match document {
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, value) in fields {
                out.insert(key.clone(), walk(value, transform)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| walk(item, transform))
            .collect::<ServiceResult<Vec<_>>>()
            .map(Value::Array),
        scalar => Ok(scalar.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use serde_json::json;

    fn envelope(tag: &str, marker: i64) -> Value {
        json!({"$crypto": {"type": tag, "value": {"marker": marker}}})
    }

    fn unwrap_marker(node: &Value) -> ServiceResult<Option<Value>> {
        Ok(Some(node["$crypto"]["value"]["marker"].clone()))
    }

    #[test]
    fn replaces_envelopes_at_any_depth() {
        let doc = json!({
            "a": envelope("t", 1),
            "b": {"c": [envelope("t", 2), 3, {"d": envelope("t", 4)}]},
        });

        let out = walk(&doc, &mut unwrap_marker).unwrap();
        assert_eq!(out, json!({"a": 1, "b": {"c": [2, 3, {"d": 4}]}}));
    }

    #[test]
    fn preserves_key_order() {
        let doc = json!({"z": 1, "a": envelope("t", 2), "m": 3});
        let out = walk(&doc, &mut unwrap_marker).unwrap();
        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn none_leaves_envelope_in_place() {
        let doc = json!({"x": envelope("foreign", 1)});
        let out = walk(&doc, &mut |_: &Value| Ok(None)).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn visits_in_document_order() {
        let doc = json!([envelope("t", 1), {"k": envelope("t", 2)}, envelope("t", 3)]);
        let mut seen = Vec::new();
        walk(&doc, &mut |node: &Value| {
            seen.push(node["$crypto"]["value"]["marker"].as_i64().unwrap());
            Ok(None)
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn replacement_is_walked_again() {
        let inner = envelope("t", 7);
        let outer = json!({"$crypto": {"type": "wrap", "value": {"inner": inner}}});

        let out = walk(&outer, &mut |node: &Value| {
            let value = &node["$crypto"]["value"];
            Ok(Some(match value.get("inner") {
                Some(inner) => inner.clone(),
                None => value["marker"].clone(),
            }))
        })
        .unwrap();
        assert_eq!(out, json!(7));
    }

    #[test]
    fn first_error_aborts() {
        let doc = json!([envelope("t", 1), envelope("t", 2)]);
        let mut calls = 0;
        let err = walk(&doc, &mut |_: &Value| {
            calls += 1;
            Err(ServiceError::DecryptionFailed("k".into()))
        })
        .unwrap_err();
        assert!(matches!(err, ServiceError::DecryptionFailed(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn scalars_pass_through() {
        for doc in [json!(null), json!(true), json!(1.5), json!("s")] {
            assert_eq!(walk(&doc, &mut unwrap_marker).unwrap(), doc);
        }
    }
}

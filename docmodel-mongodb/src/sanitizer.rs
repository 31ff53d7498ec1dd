//! Field name sanitization for MongoDB compatibility.
//!
//! MongoDB restricts field names: dots address nested fields in queries and a leading dollar
//! sign marks an operator. Document bodies may use such keys freely, so keys are escaped on
//! the way in and restored on the way out. Values are stored untouched.

use bson::{Bson, Document};

/// Escapes and restores document keys.
///
/// MongoDB does not allow field names (document keys) to contain:
/// - Dots (`.`) - used for nested field access in queries
/// - Dollar signs (`$`) - used for operators in queries
/// - Null bytes (`\0`) - field name terminators
pub(crate) struct KeySanitizer;

impl KeySanitizer {
    /// Character replacements for sanitization
    const REPLACEMENTS: [(&'static str, &'static str); 3] = [
        (".", "__dot__"),
        ("$", "__dollar__"),
        ("\0", "__null__"),
    ];

    /// Escapes every key of `document`, recursing into nested documents and arrays.
    pub(crate) fn sanitize_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(k, v)| (Self::sanitize_key(&k), Self::sanitize_value(v)))
            .collect()
    }

    fn sanitize_value(value: Bson) -> Bson {
        match value {
            Bson::Array(arr) => Bson::Array(
                arr
                    .into_iter()
                    .map(Self::sanitize_value)
                    .collect(),
            ),
            Bson::Document(doc) => Bson::Document(Self::sanitize_document(doc)),
            other => other,
        }
    }

    /// Escapes a single key or collection name.
    pub(crate) fn sanitize_key(input: &str) -> String {
        let mut sanitized = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter() {
            sanitized = sanitized.replace(*target, *replacement);
        }
        sanitized
    }

    /// Escapes a dotted field path segment by segment, keeping the separators.
    pub(crate) fn sanitize_path(path: &str) -> String {
        path.split('.')
            .map(Self::sanitize_key)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Inverse of [`sanitize_document`](Self::sanitize_document).
    pub(crate) fn restore_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(k, v)| (Self::restore_key(&k), Self::restore_value(v)))
            .collect()
    }

    fn restore_value(value: Bson) -> Bson {
        match value {
            Bson::Array(arr) => Bson::Array(
                arr
                    .into_iter()
                    .map(Self::restore_value)
                    .collect(),
            ),
            Bson::Document(doc) => Bson::Document(Self::restore_document(doc)),
            other => other,
        }
    }

    fn restore_key(input: &str) -> String {
        let mut restored = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter().rev() {
            restored = restored.replace(*replacement, *target);
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn keys_are_escaped_and_values_kept() {
        let stored = KeySanitizer::sanitize_document(doc! {
            "a.b": "x.y",
            "nested": { "$op": 1, "list": [{ "k.k": true }] },
        });

        assert_eq!(
            stored,
            doc! {
                "a__dot__b": "x.y",
                "nested": { "__dollar__op": 1, "list": [{ "k__dot__k": true }] },
            }
        );
        assert_eq!(
            KeySanitizer::restore_document(stored),
            doc! {
                "a.b": "x.y",
                "nested": { "$op": 1, "list": [{ "k.k": true }] },
            }
        );
    }

    #[test]
    fn paths_keep_their_separators() {
        assert_eq!(KeySanitizer::sanitize_path("address.$city"), "address.__dollar__city");
    }
}

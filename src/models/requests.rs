//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::key::ObjectKey;

/// Request body for POST /invalidate/:cache
///
/// A change notification: every cached key whose columns match all of
/// `fields` is invalidated.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Column name to value, e.g. `{"NATION": "US"}`
    pub fields: BTreeMap<String, String>,
}

impl InvalidateRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.fields.is_empty() {
            return Some("At least one field is required; use DELETE /clear to drop everything".to_string());
        }
        if self.fields.keys().any(|name| name.trim().is_empty()) {
            return Some("Field names cannot be empty".to_string());
        }
        None
    }

    /// Notification key addressed to `cache`.
    pub fn into_object_key(self, cache: impl Into<String>) -> ObjectKey {
        ObjectKey {
            entity: cache.into(),
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_request_deserialize() {
        let json = r#"{"fields": {"NATION": "US", "TAXPOINTTAG": "D"}}"#;
        let req: InvalidateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.fields.len(), 2);
        assert!(req.validate().is_none());

        let key = req.into_object_key("TaxRulesRecord");
        assert_eq!(key.get("NATION"), Some("US"));
        assert_eq!(key.to_string(), "TaxRulesRecord[NATION=US, TAXPOINTTAG=D]");
    }

    #[test]
    fn test_validate_empty_fields() {
        let req = InvalidateRequest {
            fields: BTreeMap::new(),
        };
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_validate_blank_field_name() {
        let req: InvalidateRequest = serde_json::from_str(r#"{"fields": {" ": "US"}}"#).unwrap();
        assert!(req.validate().is_some());
    }
}

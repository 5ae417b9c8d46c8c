//! Persisted token set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::claims;
use crate::error::RefreshError;

/// Tokens as persisted under the storage key.
///
/// Fields the refresh endpoint returns beyond the known ones are kept in
/// `extra` and written back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, counted from `obtained_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Epoch milliseconds when the access token was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obtained_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredTokens {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            obtained_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_lifetime(mut self, expires_in_secs: i64, obtained_at_ms: i64) -> Self {
        self.expires_in = Some(expires_in_secs);
        self.obtained_at = Some(obtained_at_ms);
        self
    }

    /// Expiry in epoch milliseconds.
    ///
    /// The token's own `exp` claim wins; otherwise `obtained_at + expires_in`.
    /// `None` when neither is available.
    pub fn expiry_ms(&self) -> Option<i64> {
        claims::expiry_ms(&self.access_token).or_else(|| {
            let (obtained_at, expires_in) = (self.obtained_at?, self.expires_in?);
            Some(obtained_at.saturating_add(expires_in.saturating_mul(1000)))
        })
    }

    /// Overlays a refresh response onto these tokens.
    ///
    /// Response fields replace stored ones; the refresh token survives unless
    /// the response carries a new one. `obtained_at` is stamped with `now_ms`.
    pub fn merged_with(
        &self,
        response: Map<String, Value>,
        now_ms: i64,
    ) -> Result<StoredTokens, RefreshError> {
        let mut merged = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(RefreshError::MalformedResponse(e.to_string())),
        };
        for (key, value) in response {
            if value.is_null() {
                continue;
            }
            merged.insert(key, value);
        }
        merged.insert("obtained_at".to_string(), Value::from(now_ms));

        serde_json::from_value(Value::Object(merged))
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::make_token;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn expiry_from_lifetime() {
        let tokens = StoredTokens::new("opaque").with_lifetime(3600, 1_000_000);
        assert_eq!(tokens.expiry_ms(), Some(1_000_000 + 3_600_000));
    }

    #[test]
    fn claim_takes_precedence_over_lifetime() {
        let token = make_token(&json!({"exp": 2_000}));
        let tokens = StoredTokens::new(token).with_lifetime(3600, 1_000_000);
        assert_eq!(tokens.expiry_ms(), Some(2_000_000));
    }

    #[test]
    fn no_expiry_without_claim_or_pair() {
        assert_eq!(StoredTokens::new("opaque").expiry_ms(), None);

        let mut half = StoredTokens::new("opaque");
        half.expires_in = Some(3600);
        assert_eq!(half.expiry_ms(), None);
    }

    #[test]
    fn merge_preserves_refresh_token_and_extra_fields() {
        let mut tokens = StoredTokens::new("old").with_refresh_token("r1");
        tokens.extra.insert("user_id".into(), json!("u-7"));

        let merged = tokens
            .merged_with(
                object(json!({"access_token": "new", "expires_in": 900, "scope": "read"})),
                42,
            )
            .unwrap();

        assert_eq!(merged.access_token, "new");
        assert_eq!(merged.refresh_token.as_deref(), Some("r1"));
        assert_eq!(merged.expires_in, Some(900));
        assert_eq!(merged.obtained_at, Some(42));
        assert_eq!(merged.extra.get("scope"), Some(&json!("read")));
        assert_eq!(merged.extra.get("user_id"), Some(&json!("u-7")));
    }

    #[test]
    fn merge_replaces_rotated_refresh_token() {
        let tokens = StoredTokens::new("old").with_refresh_token("r1");
        let merged = tokens
            .merged_with(
                object(json!({"access_token": "new", "refresh_token": "r2"})),
                1,
            )
            .unwrap();
        assert_eq!(merged.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn merge_ignores_null_refresh_token() {
        let tokens = StoredTokens::new("old").with_refresh_token("r1");
        let merged = tokens
            .merged_with(
                object(json!({"access_token": "new", "refresh_token": null})),
                1,
            )
            .unwrap();
        assert_eq!(merged.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn merge_rejects_wrongly_typed_fields() {
        let tokens = StoredTokens::new("old");
        let err = tokens
            .merged_with(object(json!({"access_token": 5})), 1)
            .unwrap_err();
        assert!(matches!(err, RefreshError::MalformedResponse(_)));
    }

    #[test]
    fn serialized_shape_omits_absent_fields() {
        let json = serde_json::to_value(StoredTokens::new("a")).unwrap();
        assert_eq!(json, json!({"access_token": "a"}));
    }
}

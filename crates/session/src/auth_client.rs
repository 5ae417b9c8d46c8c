//! HTTP client for the auth service's refresh endpoint.

use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::RefreshError;

/// Calls `POST {base_url}/refresh`.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RefreshError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/refresh", self.base_url)
    }

    /// Exchanges a refresh token for a new token set.
    ///
    /// Returns the whole response object so unknown fields can be merged
    /// into storage. A non-2xx status, or a body without a non-empty string
    /// `access_token`, is an error.
    #[tracing::instrument(skip_all, fields(url = %self.refresh_url()))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Map<String, Value>, RefreshError> {
        let resp = self
            .http
            .post(self.refresh_url())
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RefreshError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        let map = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(RefreshError::MalformedResponse(
                    "response is not a JSON object".into(),
                ));
            }
            Err(e) => return Err(RefreshError::MalformedResponse(e.to_string())),
        };

        match map.get("access_token") {
            Some(Value::String(token)) if !token.is_empty() => {}
            _ => {
                return Err(RefreshError::MalformedResponse(
                    "missing access_token".into(),
                ));
            }
        }

        debug!(fields = map.len(), "refresh accepted");
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AuthClient {
        AuthClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = AuthClient::new("https://auth.example.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.refresh_url(), "https://auth.example.com/refresh");
    }

    #[tokio::test]
    async fn posts_refresh_token_and_returns_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refresh"))
            .and(body_json(json!({"refresh_token": "rt-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "expires_in": 900,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let map = client_for(&server).refresh("rt-1").await.unwrap();
        assert_eq!(map.get("access_token"), Some(&json!("at-2")));
        assert_eq!(map.get("token_type"), Some(&json!("Bearer")));
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = client_for(&server).refresh("rt").await.unwrap_err();
        match err {
            RefreshError::Http { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid_grant");
            }
            other => panic!("expected Http, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_access_token_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"expires_in": 60})))
            .mount(&server)
            .await;

        let err = client_for(&server).refresh("rt").await.unwrap_err();
        assert!(matches!(err, RefreshError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn non_object_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let err = client_for(&server).refresh("rt").await.unwrap_err();
        assert!(matches!(err, RefreshError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = AuthClient::new(&uri, Duration::from_secs(2)).unwrap();
        let err = client.refresh("rt").await.unwrap_err();
        assert!(matches!(err, RefreshError::Network(_)));
        assert!(err.counts_as_failure());
    }
}

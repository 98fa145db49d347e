//! HTTP session gateway: JSON client for a service that holds the
//! platform connections on our behalf.
//!
//! One gateway session per live [`AccountClient`]. Provider errors come back
//! as `{"error": CODE, "message": text}` and are surfaced as
//! [`SessionError::Rpc`] so [`super::classify`] can recognize ban signals.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{AccountClient, Identity, SessionFactory};
use crate::accounts::Account;
use crate::config::GatewayConfig;
use crate::error::SessionError;

/// Factory for gateway-backed sessions. Cheap to clone; shares one HTTP pool.
#[derive(Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client for gateway");
                reqwest::Client::new()
            });
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        }
    }
}

impl SessionFactory for HttpGateway {
    fn open(&self, account: &Account) -> Box<dyn AccountClient> {
        Box::new(GatewaySession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_token: self.api_token.clone(),
            phone: account.phone.clone(),
            credential: account.session.clone(),
            session_id: None,
            code_hash: None,
        })
    }
}

/// A single gateway session for one account.
pub struct GatewaySession {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
    phone: String,
    credential: Option<SecretString>,
    session_id: Option<String>,
    code_hash: Option<String>,
}

#[derive(Deserialize)]
struct OpenedSession {
    session_id: String,
}

#[derive(Deserialize)]
struct CodeSent {
    #[serde(default)]
    code_hash: Option<String>,
}

#[derive(Deserialize)]
struct SignedIn {
    session: String,
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

impl GatewaySession {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn session_url(&self, path: &str) -> Result<String, SessionError> {
        let id = self.session_id.as_deref().ok_or(SessionError::NotConnected)?;
        Ok(self.url(&format!("/sessions/{id}{path}")))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, SessionError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| SessionError::InvalidResponse(e.to_string()));
        }

        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<GatewayErrorBody>(&body) {
            Ok(err) => Err(SessionError::Rpc {
                code: err.error,
                message: err.message,
            }),
            Err(_) => Err(SessionError::Transport(format!(
                "gateway returned {status}: {body}"
            ))),
        }
    }
}

#[async_trait]
impl AccountClient for GatewaySession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.session_id.is_some() {
            return Ok(());
        }

        let body = serde_json::json!({
            "phone": self.phone,
            "session": self.credential.as_ref().map(|c| c.expose_secret().to_string()),
        });
        let opened: OpenedSession = self
            .execute(self.http.post(self.url("/sessions")).json(&body))
            .await?;

        debug!(phone = %self.phone, session_id = %opened.session_id, "Gateway session opened");
        self.session_id = Some(opened.session_id);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(id) = self.session_id.take() else {
            return;
        };
        let req = self.authorize(self.http.delete(self.url(&format!("/sessions/{id}"))));
        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(phone = %self.phone, session_id = %id, "Gateway session closed");
            }
            Ok(resp) => {
                warn!(phone = %self.phone, status = %resp.status(), "Gateway refused session close");
            }
            Err(e) => {
                warn!(phone = %self.phone, error = %e, "Gateway session close failed");
            }
        }
        self.code_hash = None;
    }

    async fn request_authorization_code(&mut self, phone: &str) -> Result<(), SessionError> {
        let url = self.session_url("/auth/code")?;
        let sent: CodeSent = self
            .execute(self.http.post(url).json(&serde_json::json!({ "phone": phone })))
            .await?;
        self.code_hash = sent.code_hash;
        Ok(())
    }

    async fn complete_authorization(&mut self, code: &str) -> Result<SecretString, SessionError> {
        let url = self.session_url("/auth/sign-in")?;
        let body = serde_json::json!({
            "phone": self.phone,
            "code": code,
            "code_hash": self.code_hash,
        });
        let signed_in: SignedIn = self.execute(self.http.post(url).json(&body)).await?;
        if signed_in.session.is_empty() {
            return Err(SessionError::InvalidResponse(
                "sign-in returned an empty session".to_string(),
            ));
        }

        let credential = SecretString::from(signed_in.session);
        self.credential = Some(credential.clone());
        Ok(credential)
    }

    async fn probe_identity(&mut self) -> Result<Identity, SessionError> {
        let url = self.session_url("/me")?;
        self.execute(self.http.get(url)).await
    }

    async fn send_text(&mut self, target: &str, text: &str) -> Result<(), SessionError> {
        let url = self.session_url("/messages")?;
        let body = serde_json::json!({ "target": target, "text": text });
        let _: serde_json::Value = self.execute(self.http.post(url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn gateway(base: &str) -> HttpGateway {
        HttpGateway::new(&GatewayConfig {
            base_url: base.to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn calls_before_connect_are_not_connected() {
        let gw = gateway("http://127.0.0.1:1");
        let mut session = gw.open(&Account::new(1, "+15550000001"));
        assert!(matches!(
            session.probe_identity().await,
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(
            session.send_text("@alice", "hi").await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_noop() {
        let gw = gateway("http://127.0.0.1:1");
        let mut session = gw.open(&Account::new(1, "+15550000001"));
        session.disconnect().await;
    }

    #[test]
    fn trailing_slash_trimmed() {
        let gw = gateway("http://gateway.local/");
        assert_eq!(gw.base_url, "http://gateway.local");
    }
}

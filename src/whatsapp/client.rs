use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::core::config::WhatsAppConfig;

/// Tokens are refreshed this long before the provider says they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub configured: bool,
    pub cached: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenStatus {
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            cached: false,
            expires_at: None,
        }
    }
}

/// Strips formatting from a phone number. Returns `None` unless 8 to 15
/// digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let allowed = raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.'));
    if allowed && (8..=15).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

#[derive(Debug)]
pub struct WhatsAppClient {
    config: WhatsAppConfig,
    http_client: reqwest::Client,
    access_token: RwLock<Option<CachedToken>>,
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            config,
            http_client,
            access_token: RwLock::new(None),
        })
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.access_token.read().await;
            if let Some(t) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
                return Ok(t.token.clone());
            }
        }

        debug!("[WHATSAPP] Requesting new access token");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to get access token: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Token endpoint returned {}: {}", status, error_text));
        }

        let token_data: TokenResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse token response: {}", e))?;

        let ttl = token_data.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS).max(0);
        let cached = CachedToken {
            token: token_data.access_token,
            expires_at: Utc::now() + Duration::seconds(ttl),
        };
        let token = cached.token.clone();
        *self.access_token.write().await = Some(cached);

        Ok(token)
    }

    pub async fn invalidate(&self) {
        *self.access_token.write().await = None;
    }

    pub async fn token_status(&self) -> TokenStatus {
        let cached = self.access_token.read().await;
        let now = Utc::now();
        let fresh = cached.as_ref().filter(|t| t.is_fresh(now));
        TokenStatus {
            configured: true,
            cached: fresh.is_some(),
            expires_at: fresh.map(|t| t.expires_at),
        }
    }

    /// Sends a free-form text message. Returns the provider's message id.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body }
        });
        self.send(payload).await
    }

    pub async fn send_template(
        &self,
        to: &str,
        template: &str,
        language: &str,
        parameters: &[String],
    ) -> Result<Option<String>> {
        self.send(template_payload(to, template, language, parameters))
            .await
    }

    async fn send(&self, payload: serde_json::Value) -> Result<Option<String>> {
        let token = self.get_access_token().await?;
        let url = format!(
            "{}/{}/messages",
            self.config.api_url, self.config.phone_number_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send WhatsApp message: {}", e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!("[WHATSAPP] Provider rejected the access token, clearing cache");
            self.invalidate().await;
            return Err(anyhow!("WhatsApp provider rejected the access token"));
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("WhatsApp API returned {}: {}", status, error_text));
        }

        let sent: SendResponse = response.json().await.unwrap_or_default();
        let id = sent.messages.into_iter().next().map(|m| m.id);
        info!("[WHATSAPP] Message accepted by provider: {:?}", id);
        Ok(id)
    }
}

fn template_payload(
    to: &str,
    template: &str,
    language: &str,
    parameters: &[String],
) -> serde_json::Value {
    let mut tpl = json!({
        "name": template,
        "language": { "code": language }
    });
    if !parameters.is_empty() {
        let params: Vec<_> = parameters
            .iter()
            .map(|p| json!({ "type": "text", "text": p }))
            .collect();
        tpl["components"] = json!([{ "type": "body", "parameters": params }]);
    }
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "template",
        "template": tpl
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::Server) -> WhatsAppClient {
        WhatsAppClient::new(WhatsAppConfig {
            api_url: server.url(),
            token_url: format!("{}/oauth/token", server.url()),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            phone_number_id: "5511".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+55 (11) 98765-4321").as_deref(), Some("5511987654321"));
        assert_eq!(normalize_phone("12345678").as_deref(), Some("12345678"));
        assert_eq!(normalize_phone("1234567"), None);
        assert_eq!(normalize_phone("1234567890123456"), None);
        assert_eq!(normalize_phone("55abc11987654321"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_template_payload_components() {
        let bare = template_payload("5511", "welcome", "pt_BR", &[]);
        assert_eq!(bare["template"]["language"]["code"], "pt_BR");
        assert!(bare["template"].get("components").is_none());

        let with_params =
            template_payload("5511", "order", "en_US", &["Ana".to_string(), "42".to_string()]);
        let params = &with_params["template"]["components"][0]["parameters"];
        assert_eq!(params[1]["text"], "42");
    }

    #[tokio::test]
    async fn test_token_is_cached_between_sends() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/oauth/token")
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok-1", "expires_in": 3600}"#)
            .expect(1)
            .create_async()
            .await;
        let send_mock = server
            .mock("POST", "/5511/messages")
            .match_header("authorization", "Bearer tok-1")
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages": [{"id": "wamid.1"}]}"#)
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server);
        let first = client.send_text("5511987654321", "hello").await.unwrap();
        let second = client.send_text("5511987654321", "again").await.unwrap();

        assert_eq!(first.as_deref(), Some("wamid.1"));
        assert_eq!(second.as_deref(), Some("wamid.1"));
        token_mock.assert_async().await;
        send_mock.assert_async().await;

        let status = client.token_status().await;
        assert!(status.configured && status.cached);
        assert!(status.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/oauth/token")
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "short", "expires_in": 30}"#)
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server);
        client.get_access_token().await.unwrap();
        client.get_access_token().await.unwrap();

        token_mock.assert_async().await;
        assert!(!client.token_status().await.cached);
    }

    #[tokio::test]
    async fn test_unauthorized_send_invalidates_token() {
        let mut server = mockito::Server::new_async().await;
        let _token_mock = server
            .mock("POST", "/oauth/token")
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "stale", "expires_in": 3600}"#)
            .create_async()
            .await;
        let send_mock = server
            .mock("POST", "/5511/messages")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.send_text("5511987654321", "hi").await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
        send_mock.assert_async().await;
        assert!(!client.token_status().await.cached);
    }

    #[tokio::test]
    async fn test_token_endpoint_failure() {
        let mut server = mockito::Server::new_async().await;
        let _token_mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body("invalid_client")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.get_access_token().await.unwrap_err();
        assert!(err.to_string().contains("invalid_client"));
    }
}

//! SMS gateway client. Posts JSON to the configured HTTP API.

use log::debug;
use reqwest::Client;
use serde_json::json;

use crate::shared::models::SystemSettings;

pub struct SmsClient {
    api_url: String,
    api_key: String,
    from: String,
    http: Client,
}

impl SmsClient {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            api_url,
            api_key,
            from,
            http: Client::new(),
        }
    }

    pub fn from_settings(settings: &SystemSettings) -> Self {
        Self::new(
            settings.sms_api_url.clone(),
            settings.sms_api_key.clone(),
            settings.sms_from.clone(),
        )
    }

    pub async fn send(&self, to: &str, body: &str) -> anyhow::Result<()> {
        if self.api_url.is_empty() {
            anyhow::bail!("sms gateway url is not configured");
        }
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": to,
                "body": body,
            }))
            .send()
            .await?;
        response.error_for_status()?;
        debug!("sent sms to {to}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_posts_json_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::Json(json!({
                "from": "+15550100",
                "to": "+15550199",
                "body": "Housekeeping: Towels x2 - Room 301 (high priority)",
            })))
            .with_status(200)
            .create_async()
            .await;

        let client = SmsClient::new(
            format!("{}/messages", server.url()),
            "test-key".to_string(),
            "+15550100".to_string(),
        );
        client
            .send(
                "+15550199",
                "Housekeeping: Towels x2 - Room 301 (high priority)",
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(500)
            .create_async()
            .await;

        let client = SmsClient::new(
            format!("{}/messages", server.url()),
            "k".to_string(),
            "+15550100".to_string(),
        );
        assert!(client.send("+15550199", "hello").await.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_rejects() {
        let client = SmsClient::new(String::new(), String::new(), String::new());
        assert!(client.send("+15550199", "hello").await.is_err());
    }
}

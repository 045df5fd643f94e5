//! Discord chat sink over the REST API.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;

use super::{check_status, Channel, ChatClient};

const API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Deserialize)]
struct Guild {
    id: String,
}

pub struct DiscordClient {
    bot_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl DiscordClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            base_url: API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header(AUTHORIZATION, self.auth())
            .send()
            .await
            .with_context(|| format!("discord GET {path}"))?;
        check_status(response, &format!("discord GET {path}"))
            .await?
            .json()
            .await
            .with_context(|| format!("discord GET {path}: bad json"))
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn connect(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("discord bot token is empty");
        }
        let _: serde_json::Value = self.get_json("/users/@me").await?;
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let guilds: Vec<Guild> = self.get_json("/users/@me/guilds").await?;
        let mut channels = Vec::new();
        for guild in guilds {
            let mut found: Vec<Channel> =
                self.get_json(&format!("/guilds/{}/channels", guild.id)).await?;
            channels.append(&mut found);
        }
        Ok(channels)
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/channels/{channel_id}/messages", self.base_url))
            .header(AUTHORIZATION, self.auth())
            .json(&json!({ "content": text }))
            .send()
            .await
            .context("discord send failed")?;
        check_status(response, "discord send").await?;
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("capture.jpg")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new().part("files[0]", part);

        let response = self
            .client
            .post(format!("{}/channels/{channel_id}/messages", self.base_url))
            .header(AUTHORIZATION, self.auth())
            .multipart(form)
            .send()
            .await
            .context("discord upload failed")?;
        check_status(response, "discord upload").await?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> DiscordClient {
        DiscordClient::new("tok").with_base_url(&server.uri())
    }

    #[tokio::test]
    async fn connect_checks_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("authorization", "Bot tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).await.connect().await.unwrap();
    }

    #[tokio::test]
    async fn connect_rejected_token_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server).await.connect().await.unwrap_err();
        assert!(format!("{err:#}").contains("401"), "{err:#}");
    }

    #[tokio::test]
    async fn connect_empty_token_fails_without_request() {
        let server = MockServer::start().await;
        let c = DiscordClient::new(" ").with_base_url(&server.uri());
        assert!(c.connect().await.is_err());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_channels_walks_every_guild() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/guilds"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "g1"}, {"id": "g2"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "c1", "name": "living", "type": 0},
                {"id": "c2", "type": 4}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/g2/channels"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": "c3", "name": "camera", "type": 0}])),
            )
            .mount(&server)
            .await;

        let channels = client(&server).await.list_channels().await.unwrap();
        let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["living", "", "camera"]);
    }

    #[tokio::test]
    async fn send_text_posts_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c1/messages"))
            .and(body_json(json!({"content": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).await.send_text("c1", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn send_text_server_error_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c1/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(client(&server).await.send_text("c1", "hello").await.is_err());
    }

    #[tokio::test]
    async fn send_file_uploads_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c9/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m2"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\xff\xd8\xff").unwrap();

        client(&server)
            .await
            .send_file("c9", file.path())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let content_type = requests[0]
            .headers
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("multipart/form-data"), "{content_type}");
    }

    #[tokio::test]
    async fn send_file_missing_file_is_error() {
        let server = MockServer::start().await;
        let err = client(&server)
            .await
            .send_file("c9", Path::new("/definitely/not/here.jpg"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to read"));
    }
}

//! Social-post sink: X API v2 with a user-context bearer token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{check_status, SocialPoster};

const API_BASE: &str = "https://api.x.com";

pub struct XClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl XClient {
    pub fn new(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            base_url: API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SocialPoster for XClient {
    async fn post_text(&self, body: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/2/tweets", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&json!({ "text": body }))
            .send()
            .await
            .context("x: post request failed")?;
        check_status(response, "x post").await?;
        Ok(())
    }
}

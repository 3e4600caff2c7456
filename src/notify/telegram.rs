use crate::config::TelegramConfig;
use crate::models::Candidate;
use crate::notify::{compose_caption, NotificationSink};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const PARSE_MODE: &str = "HTML";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

pub struct TelegramSink {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create Telegram HTTP client")?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// Probe the token with `getMe`. Returns the bot's username.
    pub async fn test_connection(&self) -> Result<String> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .context("getMe failed")?;
        let body: ApiResponse<BotUser> = response.json().await.context("Invalid getMe response")?;
        if !body.ok {
            bail!(
                "Telegram rejected the token: {}",
                body.description.unwrap_or_default()
            );
        }

        let username = body
            .result
            .and_then(|user| user.username)
            .ok_or_else(|| anyhow!("getMe returned no bot info"))?;
        info!("🤖 Connected to Telegram as @{}", username);
        Ok(username)
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": PARSE_MODE,
        });
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("sendMessage failed")?;
        check_response(response).await
    }

    async fn send_photo(&self, chat_id: &str, caption: &str, photo: &Path) -> Result<()> {
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", PARSE_MODE)
            .part("photo", photo_part(photo).await?);

        let response = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .context("sendPhoto failed")?;
        check_response(response).await
    }

    /// The caption goes on the first item only.
    async fn send_media_group(
        &self,
        chat_id: &str,
        caption: &str,
        photos: &[PathBuf],
    ) -> Result<()> {
        let media: Vec<_> = (0..photos.len())
            .map(|i| {
                if i == 0 {
                    json!({
                        "type": "photo",
                        "media": format!("attach://photo{i}"),
                        "caption": caption,
                        "parse_mode": PARSE_MODE,
                    })
                } else {
                    json!({ "type": "photo", "media": format!("attach://photo{i}") })
                }
            })
            .collect();

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("media", serde_json::to_string(&media)?);
        for (i, photo) in photos.iter().enumerate() {
            form = form.part(format!("photo{i}"), photo_part(photo).await?);
        }

        let response = self
            .client
            .post(self.api_url("sendMediaGroup"))
            .multipart(form)
            .send()
            .await
            .context("sendMediaGroup failed")?;
        check_response(response).await
    }

    async fn deliver(&self, candidate: &Candidate, channel: &str) -> Result<()> {
        let caption = compose_caption(candidate);

        let mut photos = Vec::new();
        for path in candidate.photo_paths() {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                photos.push(path.clone());
            } else {
                debug!("Photo {} missing on disk, skipping", path.display());
            }
        }

        match photos.len() {
            0 => self.send_message(channel, &caption).await,
            1 => self.send_photo(channel, &caption, &photos[0]).await,
            _ => self.send_media_group(channel, &caption, &photos).await,
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn post_candidate(&self, candidate: &Candidate, channel: &str) -> bool {
        match self.deliver(candidate, channel).await {
            Ok(()) => {
                debug!("📤 Listing {} sent to {}", candidate.id, channel);
                true
            }
            Err(e) => {
                warn!("❌ Sending listing {} to {} failed: {:#}", candidate.id, channel, e);
                false
            }
        }
    }
}

async fn photo_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo.jpg".to_string());
    Ok(Part::bytes(bytes).file_name(name).mime_str("image/jpeg")?)
}

async fn check_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body: ApiResponse<serde_json::Value> = response
        .json()
        .await
        .with_context(|| format!("Invalid Telegram response (HTTP {status})"))?;
    if !body.ok {
        bail!(
            "Telegram API error: {}",
            body.description.unwrap_or_else(|| status.to_string())
        );
    }
    Ok(())
}

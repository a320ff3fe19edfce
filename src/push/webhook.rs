//! Webhook push channel: the rendered digest goes out as a text message
//! payload, with bounded retries and exponential backoff per delivery.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{render_text, DigestDispatcher, PUSH_MAX_ITEMS};
use crate::model::Digest;

#[derive(Clone)]
pub struct WebhookDispatcher {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookDispatcher {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post_text(&self, text: &str) -> Result<()> {
        let payload = TextMessage::new(text);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("webhook request failed: {e}"));
                }
            }
        }
    }
}

#[async_trait]
impl DigestDispatcher for WebhookDispatcher {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn dispatch(&self, digest: &Digest) -> Result<()> {
        self.post_text(&render_text(digest, PUSH_MAX_ITEMS)).await
    }
}

#[derive(Serialize)]
struct TextMessage {
    msg_type: &'static str,
    content: TextContent,
}

#[derive(Serialize)]
struct TextContent {
    text: String,
}

impl TextMessage {
    fn new(text: &str) -> Self {
        Self {
            msg_type: "text",
            content: TextContent {
                text: text.to_string(),
            },
        }
    }
}

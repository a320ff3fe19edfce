//! SMTP push channel: the digest as a plain-text newsletter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{render_text, DigestDispatcher, PUSH_MAX_ITEMS};
use crate::config::EmailConfig;
use crate::model::Digest;

#[derive(Debug)]
pub struct EmailDispatcher {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailDispatcher {
    /// Build from validated config; only the password comes from the
    /// environment.
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        let pass = std::env::var(&cfg.pass_env)
            .with_context(|| format!("${} is not set", cfg.pass_env))?;

        let creds = Credentials::new(cfg.smtp_user.clone(), pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .with_context(|| format!("invalid smtp host {:?}", cfg.smtp_host))?
            .credentials(creds)
            .build();

        let from = cfg.from.parse().context("invalid push.email.from")?;
        let to = cfg.to.parse().context("invalid push.email.to")?;

        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl DigestDispatcher for EmailDispatcher {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn dispatch(&self, digest: &Digest) -> Result<()> {
        let subject = format!(
            "News digest {}: {} items",
            digest.generated_at.format("%Y-%m-%d"),
            digest.items.len()
        );

        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(render_text(digest, PUSH_MAX_ITEMS))
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

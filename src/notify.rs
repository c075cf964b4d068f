//! Completion notifications.
//!
//! Messages are pre-formatted title/body pairs pushed to a card-style
//! webhook, optionally signed with HMAC-SHA256 over the timestamp. A
//! disabled notifier is a no-op.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use thiserror::Error;

use crate::config::NotifyConfig;
use crate::report::{short_duration, TaskReport};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected: status {0}")]
    Status(u16),

    #[error("webhook rejected: code={code} msg={msg}")]
    Api { code: i64, msg: String },
}

/// A pre-formatted notification.
#[derive(Debug, Clone)]
pub struct Message {
    pub title: String,
    pub content: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, msg: &Message) -> Result<(), NotifyError>;
}

/// No-op notifier used when notifications are disabled.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _msg: &Message) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Card-style webhook notifier.
pub struct WebhookNotifier {
    webhook_url: String,
    signing_secret: String,
    prefix: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(cfg: &NotifyConfig) -> Self {
        Self {
            webhook_url: cfg.webhook_url.trim().to_string(),
            signing_secret: cfg.signing_secret.trim().to_string(),
            prefix: cfg.prefix.trim().to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Build a notifier from config: Noop when disabled or unconfigured.
    pub fn from_config(cfg: &NotifyConfig) -> Box<dyn Notifier> {
        if !cfg.enabled || cfg.webhook_url.trim().is_empty() {
            Box::new(NoopNotifier)
        } else {
            Box::new(Self::new(cfg))
        }
    }

    /// HMAC-SHA256 with key `"{timestamp}\n{secret}"` over an empty
    /// message, base64-encoded.
    fn sign(&self, timestamp: i64) -> String {
        let key = format!("{timestamp}\n{}", self.signing_secret);
        let mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
            .expect("hmac accepts any key length");
        BASE64.encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, msg: &Message) -> Result<(), NotifyError> {
        let mut title = msg.title.clone();
        if !self.prefix.is_empty() {
            title = format!("{} {title}", self.prefix);
        }
        let content = if msg.content.is_empty() {
            msg.title.clone()
        } else {
            msg.content.clone()
        };

        let mut payload = json!({
            "msg_type": "interactive",
            "card": {
                "config": {"wide_screen_mode": true},
                "header": {
                    "title": {"tag": "plain_text", "content": title},
                    "template": "blue",
                },
                "elements": [
                    {"tag": "div", "text": {"tag": "lark_md", "content": content}},
                ],
            },
        });
        if !self.signing_secret.is_empty() {
            let ts = chrono::Utc::now().timestamp();
            payload["timestamp"] = json!(ts.to_string());
            payload["sign"] = json!(self.sign(ts));
        }

        let resp = self.http.post(&self.webhook_url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        #[derive(serde::Deserialize, Default)]
        struct Reply {
            #[serde(default)]
            code: i64,
            #[serde(default)]
            msg: String,
        }
        let reply: Reply = resp.json().await.unwrap_or_default();
        if reply.code != 0 {
            return Err(NotifyError::Api {
                code: reply.code,
                msg: reply.msg,
            });
        }
        Ok(())
    }
}

/// Markdown body for the task-completion card.
pub fn build_completion_message(r: &TaskReport) -> Message {
    let lines = [
        format!("**Task**: {}", r.task_id),
        format!("**Game**: {} ({})", r.game_name, r.game_id),
        format!(
            "**Progress**: {} / {} ({:.1}%)",
            r.process, r.target, r.progress_pct
        ),
        format!("**Steps**: {}", r.step),
        format!("**Elapsed**: {}", short_duration(r.elapsed)),
        format!("**QPS**: {:.2}", r.qps),
        format!("**Avg latency**: {}", short_duration(r.avg_latency)),
        format!("**Orders**: {}", r.order_count),
        format!("**Total bet**: {:.2} (x1e4)", r.total_bet as f64),
        format!("**Total win**: {:.2} (x1e4)", r.total_win as f64),
        format!("**RTP**: {:.2}%", r.rtp_pct),
        format!("**Active members**: {}", r.active_members),
        format!("**Completed members**: {}", r.completed_members),
        format!("**Failed members**: {}", r.failed_members),
        format!("**Failed requests**: {}", r.failed_requests),
    ];
    Message {
        title: "Stress task finished".to_string(),
        content: lines.join("\n"),
    }
}

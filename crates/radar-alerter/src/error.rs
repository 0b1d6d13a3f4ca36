use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("webhook alerter is disabled")]
    Disabled,

    #[error("node {node} is already marked down, alert suppressed")]
    DuplicateNodeDown { node: String },

    #[error("alert '{title}' for {node} is in cooldown")]
    Cooldown { node: String, title: String },

    #[error("invalid payload template: {0}")]
    TemplateInvalid(String),

    #[error("webhook returned {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

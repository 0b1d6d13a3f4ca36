use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title used by poller-health alerts; gated by the node-down dedup set.
pub const NODE_OFFLINE_TITLE: &str = "Node Offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Error => write!(f, "error"),
        }
    }
}

/// An operator-facing alert event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub level: AlertLevel,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Alert {
    pub fn node_offline(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Alert {
            title: NODE_OFFLINE_TITLE.to_string(),
            message: message.into(),
            level: AlertLevel::Error,
            node_id: node_id.into(),
            service_name: None,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn is_node_offline(&self) -> bool {
        self.title == NODE_OFFLINE_TITLE
    }
}

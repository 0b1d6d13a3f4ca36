use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alert::Alert;
use crate::error::AlertError;

const PAYLOAD_TEMPLATE: &str = "payload";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    /// Optional payload template. `{{json field}}` renders any alert field as
    /// JSON; absent template means the alert itself is POSTed as JSON.
    #[serde(default)]
    pub template: Option<String>,
    /// Repeat alerts with the same (node, title, service) are suppressed
    /// within this window.
    #[serde(default = "default_cooldown", with = "radar_config::duration")]
    pub cooldown: Duration,
}

fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}

// ── Alerter ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GateState {
    /// Nodes currently known down; gates repeat "Node Offline" alerts.
    node_down: HashSet<String>,
    /// Last successful fire per (node, title, service).
    last_sent: HashMap<(String, String, String), Instant>,
}

/// De-duplicated, cooldown-limited, templated webhook POSTs.
#[derive(Debug)]
pub struct WebhookAlerter {
    config: WebhookConfig,
    client: reqwest::Client,
    templates: Option<Handlebars<'static>>,
    state: Mutex<GateState>,
}

impl WebhookAlerter {
    pub fn new(config: WebhookConfig) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?;

        let templates = match &config.template {
            Some(template) => {
                let mut registry = Handlebars::new();
                registry.register_helper("json", Box::new(json_helper));
                registry
                    .register_template_string(PAYLOAD_TEMPLATE, template)
                    .map_err(|e| AlertError::TemplateInvalid(e.to_string()))?;
                Some(registry)
            }
            None => None,
        };

        Ok(WebhookAlerter { config, client, templates, state: Mutex::new(GateState::default()) })
    }

    /// Fire one alert. Node-offline alerts for a node already known down are
    /// suppressed until [`mark_poller_recovered`](Self::mark_poller_recovered);
    /// anything else is subject to the per-(node, title, service) cooldown.
    pub async fn alert(&self, alert: &Alert) -> Result<(), AlertError> {
        if !self.config.enabled {
            return Err(AlertError::Disabled);
        }
        self.check_gates(alert)?;

        let payload = self.render_payload(alert)?;
        let mut request = self.client.post(&self.config.url).body(payload);
        for header in &self.config.headers {
            request = request.header(&header.name, &header.value);
        }
        if !self
            .config
            .headers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case("content-type"))
        {
            request = request.header("Content-Type", self.content_type().to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::WebhookStatus { status: status.as_u16(), body });
        }

        self.record_sent(alert);
        info!(title = %alert.title, node = %alert.node_id, "alert delivered");
        Ok(())
    }

    /// Clear the node-down gate so the next offline alert for this node fires.
    pub fn mark_poller_recovered(&self, node_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.node_down.remove(node_id) {
            debug!(node = node_id, "poller marked recovered");
        }
    }

    fn content_type(&self) -> &str {
        self.config
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-type"))
            .map_or("application/json", |h| h.value.as_str())
    }

    fn cooldown_key(alert: &Alert) -> (String, String, String) {
        (
            alert.node_id.clone(),
            alert.title.clone(),
            alert.service_name.clone().unwrap_or_default(),
        )
    }

    fn check_gates(&self, alert: &Alert) -> Result<(), AlertError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if alert.is_node_offline() && state.node_down.contains(&alert.node_id) {
            return Err(AlertError::DuplicateNodeDown { node: alert.node_id.clone() });
        }
        if let Some(sent_at) = state.last_sent.get(&Self::cooldown_key(alert)) {
            if sent_at.elapsed() < self.config.cooldown {
                return Err(AlertError::Cooldown {
                    node: alert.node_id.clone(),
                    title: alert.title.clone(),
                });
            }
        }
        Ok(())
    }

    fn record_sent(&self, alert: &Alert) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if alert.is_node_offline() {
            state.node_down.insert(alert.node_id.clone());
        }
        state.last_sent.insert(Self::cooldown_key(alert), Instant::now());
    }

    fn render_payload(&self, alert: &Alert) -> Result<String, AlertError> {
        match &self.templates {
            Some(registry) => registry
                .render(PAYLOAD_TEMPLATE, alert)
                .map_err(|e| AlertError::TemplateInvalid(e.to_string())),
            None => Ok(serde_json::to_string(alert)?),
        }
    }
}

/// `{{json value}}`: render any field as its JSON encoding, the way Go
/// templates expose a `json` function.
fn json_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h
        .param(0)
        .map(|p| p.value().clone())
        .unwrap_or(serde_json::Value::Null);
    let rendered =
        serde_json::to_string(&value).map_err(|e| RenderErrorReason::Other(e.to_string()))?;
    out.write(&rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use chrono::Utc;

    fn config(template: Option<&str>) -> WebhookConfig {
        WebhookConfig {
            enabled: true,
            url: "http://127.0.0.1:1/hook".to_string(),
            headers: vec![],
            template: template.map(String::from),
            cooldown: Duration::from_secs(300),
        }
    }

    fn alert(title: &str, node: &str) -> Alert {
        Alert {
            title: title.to_string(),
            message: "poller missed its heartbeat".to_string(),
            level: AlertLevel::Error,
            node_id: node.to_string(),
            service_name: None,
            timestamp: Utc::now(),
            details: None,
        }
    }

    #[test]
    fn default_payload_is_the_alert_json() {
        let alerter = WebhookAlerter::new(config(None)).unwrap();
        let payload = alerter.render_payload(&alert("CPU High", "node-1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["title"], "CPU High");
        assert_eq!(value["node_id"], "node-1");
        assert_eq!(value["level"], "error");
    }

    #[test]
    fn template_renders_with_json_helper() {
        let alerter = WebhookAlerter::new(config(Some(
            r#"{"text": "{{title}} on {{node_id}}", "raw": {{json message}}}"#,
        )))
        .unwrap();
        let payload = alerter.render_payload(&alert("CPU High", "node-1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["text"], "CPU High on node-1");
        assert_eq!(value["raw"], "poller missed its heartbeat");
    }

    #[test]
    fn invalid_template_is_rejected_at_construction() {
        let err = WebhookAlerter::new(config(Some("{{#if}}{{/unless}}"))).unwrap_err();
        assert!(matches!(err, AlertError::TemplateInvalid(_)));
    }

    #[test]
    fn node_offline_alerts_deduplicate_until_recovery() {
        let alerter = WebhookAlerter::new(config(None)).unwrap();
        let offline = Alert::node_offline("node-1", "gone");

        alerter.check_gates(&offline).unwrap();
        alerter.record_sent(&offline);

        let err = alerter.check_gates(&offline).unwrap_err();
        assert!(matches!(err, AlertError::DuplicateNodeDown { .. }));

        alerter.mark_poller_recovered("node-1");
        // Dedup cleared; only the cooldown gate remains.
        let err = alerter.check_gates(&offline).unwrap_err();
        assert!(matches!(err, AlertError::Cooldown { .. }));
    }

    #[test]
    fn cooldown_suppresses_repeat_fires() {
        let alerter = WebhookAlerter::new(config(None)).unwrap();
        let a = alert("Disk Full", "node-2");
        alerter.check_gates(&a).unwrap();
        alerter.record_sent(&a);
        assert!(matches!(
            alerter.check_gates(&a).unwrap_err(),
            AlertError::Cooldown { .. }
        ));

        // A different service key is not in cooldown.
        let mut other = a.clone();
        other.service_name = Some("postgres".to_string());
        alerter.check_gates(&other).unwrap();
    }

    #[test]
    fn zero_cooldown_never_suppresses() {
        let mut cfg = config(None);
        cfg.cooldown = Duration::ZERO;
        let alerter = WebhookAlerter::new(cfg).unwrap();
        let a = alert("Disk Full", "node-3");
        alerter.check_gates(&a).unwrap();
        alerter.record_sent(&a);
        alerter.check_gates(&a).unwrap();
    }

    #[test]
    fn content_type_defaults_and_overrides() {
        let alerter = WebhookAlerter::new(config(None)).unwrap();
        assert_eq!(alerter.content_type(), "application/json");

        let mut cfg = config(None);
        cfg.headers.push(Header {
            name: "Content-Type".to_string(),
            value: "text/plain".to_string(),
        });
        let alerter = WebhookAlerter::new(cfg).unwrap();
        assert_eq!(alerter.content_type(), "text/plain");
    }

    #[tokio::test]
    async fn disabled_alerter_refuses_to_fire() {
        let mut cfg = config(None);
        cfg.enabled = false;
        let alerter = WebhookAlerter::new(cfg).unwrap();
        let err = alerter.alert(&alert("CPU High", "node-1")).await.unwrap_err();
        assert!(matches!(err, AlertError::Disabled));
    }
}

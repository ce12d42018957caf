// src/service/http.rs
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use super::InteractionService;
use crate::config::ServiceConfig;
use crate::model::{ContactId, InteractionRecord, InteractionType};

/// JSON-over-HTTP client with bearer auth.
///
/// - `GET  {base}/contacts?interactionType=IM&startTime=..&endTime=..`
/// - `POST {base}/recordings` with `{"contactIds": [..]}`
///
/// Both endpoints answer with a JSON array of raw payloads.
pub struct HttpInteractionService {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpInteractionService {
    pub fn new(cfg: &ServiceConfig) -> Result<Self> {
        if cfg.base_url.is_empty() {
            bail!("service.base_url is not configured");
        }
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("building http client")?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            client,
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }

    async fn send_for_array(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Vec<Value>> {
        let resp = self
            .authorized(req)
            .send()
            .await
            .with_context(|| format!("requesting {what}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("{what}: HTTP {status}: {}", body.chars().take(200).collect::<String>());
        }
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("decoding {what} response"))?;
        match body {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => bail!("{what}: expected a JSON array, got {}", type_name(&other)),
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait::async_trait]
impl InteractionService for HttpInteractionService {
    async fn get_contacts(
        &self,
        interaction_type: InteractionType,
        start_time: Option<&str>,
        end_time: Option<&str>,
    ) -> Result<Vec<InteractionRecord>> {
        let mut query = vec![("interactionType", interaction_type.as_str())];
        if let (Some(s), Some(e)) = (start_time, end_time) {
            query.push(("startTime", s));
            query.push(("endTime", e));
        }
        debug!(target: "sync", %interaction_type, ?start_time, ?end_time, "GET contacts");
        let req = self
            .client
            .get(format!("{}/contacts", self.base_url))
            .query(&query);
        let items = self.send_for_array(req, "contacts").await?;
        Ok(items
            .into_iter()
            .map(|p| InteractionRecord::new(interaction_type, p))
            .collect())
    }

    async fn get_recordings(&self, contact_ids: &[ContactId]) -> Result<Vec<InteractionRecord>> {
        debug!(target: "sync", n = contact_ids.len(), "POST recordings");
        let req = self
            .client
            .post(format!("{}/recordings", self.base_url))
            .json(&json!({ "contactIds": contact_ids }));
        let items = self.send_for_array(req, "recordings").await?;
        Ok(items
            .into_iter()
            .map(|p| InteractionRecord::new(InteractionType::Im, p))
            .collect())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_base_url() {
        assert!(HttpInteractionService::new(&ServiceConfig::default()).is_err());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let cfg = ServiceConfig {
            base_url: "https://api.example.test/v1/".into(),
            api_key: String::new(),
            timeout_secs: 5,
        };
        let svc = HttpInteractionService::new(&cfg).unwrap();
        assert_eq!(svc.base_url, "https://api.example.test/v1");
    }
}

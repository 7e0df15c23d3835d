use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// External content-generation collaborator invoked by the pipeline stages.
///
/// Everything behind this trait is a black box to the pipeline: workflow
/// generation, workflow test execution, tutorial rendering, publishing and
/// customer notification live in a separate service.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Turn a natural-language automation request into a workflow definition
    async fn generate_workflow(&self, prompt: &str) -> AppResult<Value>;

    /// Execute the generated workflow against a sandbox; returns a report
    /// with at least a boolean `passed` field
    async fn test_workflow(&self, workflow: &Value) -> AppResult<Value>;

    /// Assemble the tutorial video (script, audio, screen capture)
    async fn render_tutorial(&self, workflow: &Value) -> AppResult<Value>;

    /// Upload the rendered video; returns its public URL
    async fn publish_video(&self, video: &Value) -> AppResult<String>;

    /// Send a customer-facing notification
    async fn notify_customer(&self, email: &str, body: &Value) -> AppResult<()>;

    /// Forward a usage event to the analytics sink
    async fn record_event(&self, event: &Value) -> AppResult<()>;
}

/// HTTP implementation of the collaborator interface
pub struct RemoteEngine {
    client: Client,
    base_url: String,
}

impl RemoteEngine {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> AppResult<Value> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Engine(format!(
                "{} returned status {}",
                path, status
            )));
        }

        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl WorkflowEngine for RemoteEngine {
    async fn generate_workflow(&self, prompt: &str) -> AppResult<Value> {
        self.post("/generate", &serde_json::json!({ "prompt": prompt }))
            .await
    }

    async fn test_workflow(&self, workflow: &Value) -> AppResult<Value> {
        self.post("/test", &serde_json::json!({ "workflow": workflow }))
            .await
    }

    async fn render_tutorial(&self, workflow: &Value) -> AppResult<Value> {
        self.post("/render", &serde_json::json!({ "workflow": workflow }))
            .await
    }

    async fn publish_video(&self, video: &Value) -> AppResult<String> {
        let response = self
            .post("/publish", &serde_json::json!({ "video": video }))
            .await?;
        response
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::Engine("Publish response missing url".to_string()))
    }

    async fn notify_customer(&self, email: &str, body: &Value) -> AppResult<()> {
        self.post(
            "/notify",
            &serde_json::json!({ "email": email, "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn record_event(&self, event: &Value) -> AppResult<()> {
        self.post("/events", event).await?;
        Ok(())
    }
}

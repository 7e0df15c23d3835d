pub mod engine;

pub use engine::{RemoteEngine, WorkflowEngine};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{EnqueueOptions, Job, JobStore, QueueName};
use crate::workers::{HandlerRegistry, JobHandler, ProgressHandle};

// Job kinds, one handler per (queue, kind) pair
pub const GENERATE_WORKFLOW: &str = "generate_workflow";
pub const TEST_WORKFLOW: &str = "test_workflow";
pub const RENDER_TUTORIAL: &str = "render_tutorial";
pub const PUBLISH_VIDEO: &str = "publish_video";
pub const NOTIFY_CUSTOMER: &str = "notify_customer";
pub const FOLLOWUP_EMAIL: &str = "followup_email";
pub const RECORD_EVENT: &str = "record_event";

/// Delay before the post-delivery follow-up email goes out
const FOLLOWUP_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// The closed set of (queue, kind) pairs the worker must have handlers for.
/// Checked against the registry at startup.
pub fn expected_handlers() -> Vec<(QueueName, &'static str)> {
    vec![
        (QueueName::Generation, GENERATE_WORKFLOW),
        (QueueName::Testing, TEST_WORKFLOW),
        (QueueName::ContentCreation, RENDER_TUTORIAL),
        (QueueName::Publishing, PUBLISH_VIDEO),
        (QueueName::Notifications, NOTIFY_CUSTOMER),
        (QueueName::Notifications, FOLLOWUP_EMAIL),
        (QueueName::Analytics, RECORD_EVENT),
    ]
}

/// The customer request that flows through every pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub request_id: Uuid,
    pub prompt: String,
    pub customer_email: String,
    #[serde(default)]
    pub paid: bool,
}

impl WorkflowRequest {
    /// Enqueue options for this request's jobs: paid and approved requests
    /// jump to the front of every queue
    fn stage_options(&self) -> EnqueueOptions {
        let priority = if self.paid {
            EnqueueOptions::PAID_PRIORITY
        } else {
            EnqueueOptions::DEFAULT_PRIORITY
        };
        EnqueueOptions::default().with_priority(priority)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TestPayload {
    request: WorkflowRequest,
    workflow: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct RenderPayload {
    request: WorkflowRequest,
    workflow: Value,
    test_report: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct PublishPayload {
    request: WorkflowRequest,
    video: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct NotifyPayload {
    request: WorkflowRequest,
    video_url: String,
}

fn parse_payload<T: serde::de::DeserializeOwned>(job: &Job) -> AppResult<T> {
    serde_json::from_value(job.payload.clone())
        .map_err(|e| AppError::Validation(format!("Invalid {} payload: {}", job.kind, e)))
}

async fn record_event(store: &Arc<dyn JobStore>, event: &str, request: &WorkflowRequest) {
    let payload = json!({
        "event": event,
        "request_id": request.request_id,
        "paid": request.paid,
    });
    // Analytics is fire-and-forget; losing an event never fails a stage
    if let Err(e) = store
        .enqueue(QueueName::Analytics, RECORD_EVENT, payload, EnqueueOptions::default())
        .await
    {
        tracing::warn!(request_id = %request.request_id, error = %e, "Failed to enqueue analytics event");
    }
}

/// Stage 1: turn the customer prompt into a workflow definition, then hand
/// off to the testing queue.
pub struct GenerateWorkflowHandler {
    engine: Arc<dyn WorkflowEngine>,
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl JobHandler for GenerateWorkflowHandler {
    async fn run(&self, job: &Job, progress: ProgressHandle) -> AppResult<Value> {
        let request: WorkflowRequest = parse_payload(job)?;
        progress.report(10).await;

        let workflow = self.engine.generate_workflow(&request.prompt).await?;
        progress.report(70).await;

        let next = TestPayload {
            request: request.clone(),
            workflow: workflow.clone(),
        };
        self.store
            .enqueue(
                QueueName::Testing,
                TEST_WORKFLOW,
                serde_json::to_value(next)?,
                request.stage_options(),
            )
            .await?;
        progress.report(90).await;

        record_event(&self.store, "workflow_generated", &request).await;
        Ok(json!({ "workflow": workflow }))
    }
}

/// Stage 2: run the workflow in a sandbox; only passing workflows advance to
/// content creation. A failing run is a handler failure so the retry policy
/// re-tests flaky sandboxes.
pub struct TestWorkflowHandler {
    engine: Arc<dyn WorkflowEngine>,
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl JobHandler for TestWorkflowHandler {
    async fn run(&self, job: &Job, progress: ProgressHandle) -> AppResult<Value> {
        let payload: TestPayload = parse_payload(job)?;
        progress.report(20).await;

        let report = self.engine.test_workflow(&payload.workflow).await?;
        let passed = report.get("passed").and_then(Value::as_bool).unwrap_or(false);
        if !passed {
            return Err(AppError::Engine(format!(
                "Workflow test run did not pass: {}",
                report
            )));
        }
        progress.report(70).await;

        let next = RenderPayload {
            request: payload.request.clone(),
            workflow: payload.workflow,
            test_report: report.clone(),
        };
        self.store
            .enqueue(
                QueueName::ContentCreation,
                RENDER_TUTORIAL,
                serde_json::to_value(next)?,
                payload.request.stage_options(),
            )
            .await?;

        record_event(&self.store, "workflow_tested", &payload.request).await;
        Ok(report)
    }
}

/// Stage 3: assemble the tutorial video and hand off to publishing
pub struct RenderTutorialHandler {
    engine: Arc<dyn WorkflowEngine>,
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl JobHandler for RenderTutorialHandler {
    async fn run(&self, job: &Job, progress: ProgressHandle) -> AppResult<Value> {
        let payload: RenderPayload = parse_payload(job)?;
        progress.report(10).await;

        let video = self.engine.render_tutorial(&payload.workflow).await?;
        progress.report(80).await;

        let next = PublishPayload {
            request: payload.request,
            video: video.clone(),
        };
        let options = next.request.stage_options();
        self.store
            .enqueue(
                QueueName::Publishing,
                PUBLISH_VIDEO,
                serde_json::to_value(&next)?,
                options,
            )
            .await?;

        Ok(json!({ "video": video }))
    }
}

/// Stage 4: upload to the external video platform (quota-limited; the
/// publishing queue runs one job at a time)
pub struct PublishVideoHandler {
    engine: Arc<dyn WorkflowEngine>,
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl JobHandler for PublishVideoHandler {
    async fn run(&self, job: &Job, progress: ProgressHandle) -> AppResult<Value> {
        let payload: PublishPayload = parse_payload(job)?;
        progress.report(20).await;

        let video_url = self.engine.publish_video(&payload.video).await?;
        progress.report(80).await;

        let next = NotifyPayload {
            request: payload.request,
            video_url: video_url.clone(),
        };
        let options = next.request.stage_options();
        self.store
            .enqueue(
                QueueName::Notifications,
                NOTIFY_CUSTOMER,
                serde_json::to_value(&next)?,
                options,
            )
            .await?;

        Ok(json!({ "video_url": video_url }))
    }
}

/// Stage 5: tell the customer their automation is ready, then schedule the
/// delayed follow-up email
pub struct NotifyCustomerHandler {
    engine: Arc<dyn WorkflowEngine>,
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl JobHandler for NotifyCustomerHandler {
    async fn run(&self, job: &Job, progress: ProgressHandle) -> AppResult<Value> {
        let payload: NotifyPayload = parse_payload(job)?;
        progress.report(30).await;

        let body = json!({
            "subject": "Your automation is ready",
            "video_url": payload.video_url,
        });
        self.engine
            .notify_customer(&payload.request.customer_email, &body)
            .await?;
        progress.report(70).await;

        self.store
            .enqueue(
                QueueName::Notifications,
                FOLLOWUP_EMAIL,
                serde_json::to_value(&payload)?,
                payload.request.stage_options().with_delay_ms(FOLLOWUP_DELAY_MS),
            )
            .await?;

        record_event(&self.store, "customer_notified", &payload.request).await;
        Ok(json!({ "notified": payload.request.customer_email }))
    }
}

/// Delayed follow-up touchpoint a day after delivery
pub struct FollowupEmailHandler {
    engine: Arc<dyn WorkflowEngine>,
}

#[async_trait]
impl JobHandler for FollowupEmailHandler {
    async fn run(&self, job: &Job, _progress: ProgressHandle) -> AppResult<Value> {
        let payload: NotifyPayload = parse_payload(job)?;

        let body = json!({
            "subject": "How is your automation working out?",
            "video_url": payload.video_url,
        });
        self.engine
            .notify_customer(&payload.request.customer_email, &body)
            .await?;

        Ok(json!({ "followed_up": payload.request.customer_email }))
    }
}

/// Forwards usage events to the analytics sink
pub struct RecordEventHandler {
    engine: Arc<dyn WorkflowEngine>,
}

#[async_trait]
impl JobHandler for RecordEventHandler {
    async fn run(&self, job: &Job, _progress: ProgressHandle) -> AppResult<Value> {
        self.engine.record_event(&job.payload).await?;
        Ok(Value::Null)
    }
}

/// Register every pipeline stage handler. The returned registry covers
/// exactly `expected_handlers()`.
pub fn build_registry(
    engine: Arc<dyn WorkflowEngine>,
    store: Arc<dyn JobStore>,
) -> AppResult<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    registry.register(
        QueueName::Generation,
        GENERATE_WORKFLOW,
        Arc::new(GenerateWorkflowHandler {
            engine: engine.clone(),
            store: store.clone(),
        }),
    )?;
    registry.register(
        QueueName::Testing,
        TEST_WORKFLOW,
        Arc::new(TestWorkflowHandler {
            engine: engine.clone(),
            store: store.clone(),
        }),
    )?;
    registry.register(
        QueueName::ContentCreation,
        RENDER_TUTORIAL,
        Arc::new(RenderTutorialHandler {
            engine: engine.clone(),
            store: store.clone(),
        }),
    )?;
    registry.register(
        QueueName::Publishing,
        PUBLISH_VIDEO,
        Arc::new(PublishVideoHandler {
            engine: engine.clone(),
            store: store.clone(),
        }),
    )?;
    registry.register(
        QueueName::Notifications,
        NOTIFY_CUSTOMER,
        Arc::new(NotifyCustomerHandler {
            engine: engine.clone(),
            store: store.clone(),
        }),
    )?;
    registry.register(
        QueueName::Notifications,
        FOLLOWUP_EMAIL,
        Arc::new(FollowupEmailHandler {
            engine: engine.clone(),
        }),
    )?;
    registry.register(
        QueueName::Analytics,
        RECORD_EVENT,
        Arc::new(RecordEventHandler { engine }),
    )?;

    registry.validate(&expected_handlers())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EventBus, InMemoryStore, JobState};
    use crate::workers::{PoolConfig, WorkerPool};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Engine fake that records calls and returns canned payloads
    struct FakeEngine {
        calls: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        async fn log(&self, call: &str) {
            self.calls.lock().await.push(call.to_string());
        }
    }

    #[async_trait]
    impl WorkflowEngine for FakeEngine {
        async fn generate_workflow(&self, _prompt: &str) -> AppResult<Value> {
            self.log("generate").await;
            Ok(json!({"nodes": [{"type": "webhook"}, {"type": "sheet"}]}))
        }

        async fn test_workflow(&self, _workflow: &Value) -> AppResult<Value> {
            self.log("test").await;
            Ok(json!({"passed": true, "steps": 4}))
        }

        async fn render_tutorial(&self, _workflow: &Value) -> AppResult<Value> {
            self.log("render").await;
            Ok(json!({"asset": "video-asset-1"}))
        }

        async fn publish_video(&self, _video: &Value) -> AppResult<String> {
            self.log("publish").await;
            Ok("https://videos.example.com/v/1".to_string())
        }

        async fn notify_customer(&self, _email: &str, _body: &Value) -> AppResult<()> {
            self.log("notify").await;
            Ok(())
        }

        async fn record_event(&self, _event: &Value) -> AppResult<()> {
            self.log("event").await;
            Ok(())
        }
    }

    fn request() -> WorkflowRequest {
        WorkflowRequest {
            request_id: Uuid::new_v4(),
            prompt: "sync typeform to airtable".to_string(),
            customer_email: "customer@example.com".to_string(),
            paid: false,
        }
    }

    #[tokio::test]
    async fn test_generate_stage_chains_into_testing() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new(EventBus::default()));
        let engine = FakeEngine::new();
        let handler = GenerateWorkflowHandler {
            engine: engine.clone(),
            store: store.clone(),
        };

        let job_id = store
            .enqueue(
                QueueName::Generation,
                GENERATE_WORKFLOW,
                serde_json::to_value(request()).unwrap(),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let job = store.claim_next(QueueName::Generation).await.unwrap().unwrap();

        let result = handler
            .run(&job, ProgressHandle::new(store.clone(), job_id))
            .await
            .unwrap();
        assert!(result["workflow"]["nodes"].is_array());

        let chained = store.claim_next(QueueName::Testing).await.unwrap().unwrap();
        assert_eq!(chained.kind, TEST_WORKFLOW);
        assert!(chained.payload["workflow"]["nodes"].is_array());

        let stats = store.stats(QueueName::Analytics).await.unwrap();
        assert_eq!(stats.waiting, 1);
    }

    #[tokio::test]
    async fn test_paid_requests_propagate_priority() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new(EventBus::default()));
        let engine = FakeEngine::new();
        let handler = GenerateWorkflowHandler {
            engine,
            store: store.clone(),
        };

        let mut paid_request = request();
        paid_request.paid = true;

        store
            .enqueue(
                QueueName::Generation,
                GENERATE_WORKFLOW,
                serde_json::to_value(&paid_request).unwrap(),
                EnqueueOptions::default().with_priority(EnqueueOptions::PAID_PRIORITY),
            )
            .await
            .unwrap();
        let job = store.claim_next(QueueName::Generation).await.unwrap().unwrap();
        handler
            .run(&job, ProgressHandle::new(store.clone(), job.id))
            .await
            .unwrap();

        let chained = store.claim_next(QueueName::Testing).await.unwrap().unwrap();
        assert_eq!(chained.priority, EnqueueOptions::PAID_PRIORITY);
    }

    #[tokio::test]
    async fn test_failed_test_run_is_a_handler_error() {
        struct FailingTests;

        #[async_trait]
        impl WorkflowEngine for FailingTests {
            async fn generate_workflow(&self, _: &str) -> AppResult<Value> {
                Ok(Value::Null)
            }
            async fn test_workflow(&self, _: &Value) -> AppResult<Value> {
                Ok(json!({"passed": false, "failed_step": 2}))
            }
            async fn render_tutorial(&self, _: &Value) -> AppResult<Value> {
                Ok(Value::Null)
            }
            async fn publish_video(&self, _: &Value) -> AppResult<String> {
                Ok(String::new())
            }
            async fn notify_customer(&self, _: &str, _: &Value) -> AppResult<()> {
                Ok(())
            }
            async fn record_event(&self, _: &Value) -> AppResult<()> {
                Ok(())
            }
        }

        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new(EventBus::default()));
        let handler = TestWorkflowHandler {
            engine: Arc::new(FailingTests),
            store: store.clone(),
        };

        let payload = TestPayload {
            request: request(),
            workflow: json!({}),
        };
        let job_id = store
            .enqueue(
                QueueName::Testing,
                TEST_WORKFLOW,
                serde_json::to_value(payload).unwrap(),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let job = store.claim_next(QueueName::Testing).await.unwrap().unwrap();

        let err = handler
            .run(&job, ProgressHandle::new(store.clone(), job_id))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not pass"));
    }

    #[tokio::test]
    async fn test_registry_covers_expected_handlers() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new(EventBus::default()));
        let registry = build_registry(FakeEngine::new(), store).unwrap();
        assert!(registry.validate(&expected_handlers()).is_ok());
    }

    #[tokio::test]
    async fn test_full_pipeline_runs_end_to_end() {
        let store = Arc::new(InMemoryStore::new(EventBus::default()));
        let store_dyn: Arc<dyn JobStore> = store.clone();
        let engine = FakeEngine::new();
        let registry = Arc::new(build_registry(engine.clone(), store_dyn.clone()).unwrap());

        let mut pools = Vec::new();
        for queue in QueueName::ALL {
            pools.push(WorkerPool::start(
                queue,
                store_dyn.clone(),
                registry.clone(),
                PoolConfig {
                    concurrency: queue.concurrency(),
                    poll_interval: Duration::from_millis(10),
                },
            ));
        }

        store_dyn
            .enqueue(
                QueueName::Generation,
                GENERATE_WORKFLOW,
                serde_json::to_value(request()).unwrap(),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        // The chain is done once the notify stage has completed and parked
        // the delayed follow-up email
        let mut delivered = false;
        for _ in 0..300 {
            let notifications = store_dyn.stats(QueueName::Notifications).await.unwrap();
            if notifications.completed == 1 && notifications.delayed == 1 {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered, "pipeline did not reach the notification stage");

        let publishing = store_dyn.stats(QueueName::Publishing).await.unwrap();
        assert_eq!(publishing.completed, 1);

        let calls = engine.calls.lock().await;
        for expected in ["generate", "test", "render", "publish", "notify"] {
            assert!(calls.contains(&expected.to_string()), "missing call {}", expected);
        }
        drop(calls);

        for pool in pools {
            pool.shutdown().await;
        }

        // Delayed follow-up stays parked; only the ready notification ran
        let job_stats = store_dyn.stats(QueueName::Notifications).await.unwrap();
        assert_eq!(job_stats.delayed, 1);
    }
}

pub mod job;
pub mod monitoring;
pub mod workflow;

pub use job::{all_queue_stats, queue_stats, AllStatsResponse, QueueStatsResponse};
pub use monitoring::{
    liveness, monitoring_alerts, monitoring_dashboard, monitoring_health, monitoring_metrics,
    monitoring_results, run_probe, AlertListResponse, DashboardResponse, LimitParams,
    LivenessResponse, MonitoringHealthResponse, ReportListResponse, RunProbeResponse,
};
pub use workflow::{
    create_workflow, workflow_status, EnqueuedWorkflowResponse, GenerateWorkflowRequest,
    JobStatusResponse,
};

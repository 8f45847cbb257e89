use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{Device, ModelConfig, PipelineClass, PipelineFamily, Task, DEFAULT_SCHEDULER};
use crate::error::Result;
use crate::scheduler::{SchedulerConfig, SchedulerKind};
use crate::traits::{Pipeline, PipelineLoader};

/// What happened to the scheduler during selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// `"default"` was requested; the pipeline's own scheduler is in use.
    Builtin,
    Replaced(SchedulerKind),
    /// The requested name is not in the catalog; the pipeline's own scheduler is in use.
    Fallback { requested: String },
}

impl SchedulerOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, SchedulerOutcome::Fallback { .. })
    }
}

impl fmt::Display for SchedulerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerOutcome::Builtin => f.write_str(DEFAULT_SCHEDULER),
            SchedulerOutcome::Replaced(kind) => write!(f, "{}", kind),
            SchedulerOutcome::Fallback { requested } => {
                write!(f, "{} (unknown '{}')", DEFAULT_SCHEDULER, requested)
            }
        }
    }
}

/// A selected pipeline plus the decisions that produced it.
pub struct PipelineHandle {
    class: PipelineClass,
    device: Device,
    scheduler_outcome: SchedulerOutcome,
    pipeline: Box<dyn Pipeline>,
}

impl PipelineHandle {
    pub fn class(&self) -> PipelineClass {
        self.class
    }

    pub fn family(&self) -> PipelineFamily {
        self.class.family
    }

    pub fn task(&self) -> Task {
        self.class.task
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn scheduler_outcome(&self) -> &SchedulerOutcome {
        &self.scheduler_outcome
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        self.pipeline.scheduler()
    }

    pub fn pipeline_mut(&mut self) -> &mut dyn Pipeline {
        self.pipeline.as_mut()
    }

    pub fn into_pipeline(self) -> Box<dyn Pipeline> {
        self.pipeline
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("class", &self.class)
            .field("device", &self.device)
            .field("scheduler_outcome", &self.scheduler_outcome)
            .field("scheduler", self.pipeline.scheduler())
            .finish()
    }
}

/// Picks the pipeline class and scheduler for a config and loads it.
///
/// No caching: each [`select`](Self::select) reloads weights through the
/// loader. Callers that want reuse keep the returned handle.
#[derive(Clone)]
pub struct PipelineSelector {
    loader: Arc<dyn PipelineLoader>,
}

impl PipelineSelector {
    pub fn new(loader: Arc<dyn PipelineLoader>) -> Self {
        Self { loader }
    }

    #[instrument(skip(self, config), fields(model_id = %config.model_id, scheduler = %config.scheduler))]
    pub async fn select(&self, config: &ModelConfig, task: Task) -> Result<PipelineHandle> {
        let class = PipelineClass::new(config.family(), task);
        debug!(class = %class, "Loading pipeline");
        let mut pipeline = self.loader.load(&config.model_id, class).await?;

        let scheduler_outcome = apply_scheduler(pipeline.as_mut(), &config.scheduler);

        pipeline.to_device(config.device)?;
        info!(class = %class, device = %config.device, scheduler = %pipeline.scheduler().scheduler, "Pipeline ready");

        Ok(PipelineHandle {
            class,
            device: config.device,
            scheduler_outcome,
            pipeline,
        })
    }
}

fn apply_scheduler(pipeline: &mut dyn Pipeline, requested: &str) -> SchedulerOutcome {
    if requested == DEFAULT_SCHEDULER {
        return SchedulerOutcome::Builtin;
    }
    match SchedulerKind::lookup(requested) {
        Some(kind) => {
            let replacement = kind.from_config(pipeline.scheduler());
            pipeline.set_scheduler(replacement);
            SchedulerOutcome::Replaced(kind)
        }
        None => {
            warn!(requested = %requested, "Unknown scheduler, keeping the pipeline's built-in scheduler");
            SchedulerOutcome::Fallback {
                requested: requested.to_string(),
            }
        }
    }
}

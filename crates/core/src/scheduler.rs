use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

/// Noise schedulers that can replace a pipeline's built-in one.
///
/// Names parse exactly as front-ends send them (`"dpm++"`, `"euler_a"`, ...).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum SchedulerKind {
    #[strum(serialize = "ddim")]
    #[serde(rename = "ddim")]
    Ddim,
    #[strum(serialize = "dpm++")]
    #[serde(rename = "dpm++")]
    DpmSolverMultistep,
    #[strum(serialize = "euler")]
    #[serde(rename = "euler")]
    Euler,
    #[strum(serialize = "euler_a")]
    #[serde(rename = "euler_a")]
    EulerAncestral,
    #[strum(serialize = "lms")]
    #[serde(rename = "lms")]
    Lms,
    #[strum(serialize = "pndm")]
    #[serde(rename = "pndm")]
    Pndm,
    #[strum(serialize = "unipc")]
    #[serde(rename = "unipc")]
    UniPc,
}

impl SchedulerKind {
    /// Catalog lookup. `None` for `"default"` and for names outside the catalog.
    pub fn lookup(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            SchedulerKind::Ddim => "DDIMScheduler",
            SchedulerKind::DpmSolverMultistep => "DPMSolverMultistepScheduler",
            SchedulerKind::Euler => "EulerDiscreteScheduler",
            SchedulerKind::EulerAncestral => "EulerAncestralDiscreteScheduler",
            SchedulerKind::Lms => "LMSDiscreteScheduler",
            SchedulerKind::Pndm => "PNDMScheduler",
            SchedulerKind::UniPc => "UniPCMultistepScheduler",
        }
    }

    /// Builds a scheduler of this kind carrying over the existing scheduler's parameters.
    pub fn from_config(self, existing: &SchedulerConfig) -> SchedulerConfig {
        SchedulerConfig {
            scheduler: SchedulerType::Kind(self),
            params: existing.params.clone(),
        }
    }
}

/// Which scheduler a pipeline is running with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerType {
    /// Whatever the pipeline was loaded with, named by the backend.
    Builtin(String),
    Kind(SchedulerKind),
}

impl fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerType::Builtin(name) => f.write_str(name),
            SchedulerType::Kind(kind) => f.write_str(kind.class_name()),
        }
    }
}

/// A scheduler description: its type plus the configuration it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub scheduler: SchedulerType,
    pub params: BTreeMap<String, Value>,
}

impl SchedulerConfig {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            scheduler: SchedulerType::Builtin(name.into()),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> Option<SchedulerKind> {
        match self.scheduler {
            SchedulerType::Kind(kind) => Some(kind),
            SchedulerType::Builtin(_) => None,
        }
    }
}

//! Continuation predicates evaluated after every step.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pipeline::state::{StepResult, StepState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl Comparison {
    pub fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left == right,
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Eq => write!(f, "=="),
        }
    }
}

/// Decides, from the result just recorded, whether the run proceeds.
/// `true` means continue.
#[derive(Clone, Default)]
pub enum ShouldContinue {
    #[default]
    Always,
    /// Continue unless the step failed.
    StopOnFailure,
    /// Continue only while steps complete.
    StopOnSuccess,
    /// Continue while `metric cmp value` holds. A missing metric reads as
    /// `missing`.
    Threshold {
        metric: String,
        cmp: Comparison,
        value: f64,
        missing: f64,
    },
    All(Vec<ShouldContinue>),
    Any(Vec<ShouldContinue>),
    Custom(Arc<dyn Fn(&StepResult) -> bool + Send + Sync>),
}

impl ShouldContinue {
    pub fn threshold(metric: impl Into<String>, cmp: Comparison, value: f64) -> Self {
        Self::Threshold { metric: metric.into(), cmp, value, missing: 0.0 }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&StepResult) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn evaluate(&self, result: &StepResult) -> bool {
        match self {
            Self::Always => true,
            Self::StopOnFailure => result.state() != StepState::Failed,
            Self::StopOnSuccess => result.state() == StepState::Completed,
            Self::Threshold { metric, cmp, value, missing } => {
                let observed = result.metric(metric).unwrap_or(*missing);
                cmp.holds(observed, *value)
            }
            Self::All(conditions) => conditions.iter().all(|c| c.evaluate(result)),
            Self::Any(conditions) => conditions.iter().any(|c| c.evaluate(result)),
            Self::Custom(f) => f(result),
        }
    }
}

impl std::fmt::Debug for ShouldContinue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::StopOnFailure => write!(f, "StopOnFailure"),
            Self::StopOnSuccess => write!(f, "StopOnSuccess"),
            Self::Threshold { metric, cmp, value, missing } => {
                write!(f, "Threshold({} {} {}, missing={})", metric, cmp, value, missing)
            }
            Self::All(c) => f.debug_tuple("All").field(c).finish(),
            Self::Any(c) => f.debug_tuple("Any").field(c).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Declarative form of [`ShouldContinue`] for pipeline files. Custom
/// predicates are code-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConditionSpec {
    Always,
    StopOnFailure,
    StopOnSuccess,
    Threshold {
        metric: String,
        #[serde(default = "default_comparison")]
        cmp: Comparison,
        value: f64,
        #[serde(default)]
        missing: f64,
    },
    All { conditions: Vec<ConditionSpec> },
    Any { conditions: Vec<ConditionSpec> },
}

fn default_comparison() -> Comparison {
    Comparison::Gt
}

impl Default for ConditionSpec {
    fn default() -> Self {
        Self::Always
    }
}

impl From<ConditionSpec> for ShouldContinue {
    fn from(spec: ConditionSpec) -> Self {
        match spec {
            ConditionSpec::Always => Self::Always,
            ConditionSpec::StopOnFailure => Self::StopOnFailure,
            ConditionSpec::StopOnSuccess => Self::StopOnSuccess,
            ConditionSpec::Threshold { metric, cmp, value, missing } => {
                Self::Threshold { metric, cmp, value, missing }
            }
            ConditionSpec::All { conditions } => Self::All(conditions.into_iter().map(Into::into).collect()),
            ConditionSpec::Any { conditions } => Self::Any(conditions.into_iter().map(Into::into).collect()),
        }
    }
}

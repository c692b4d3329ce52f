#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Lifecycle points at which a linked system is told about a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkedLifecyclePoint {
    Create,
    Reassign,
    NewReview,
    InProgress,
    Pass,
    Fail,
    ProvisionalPass,
    Delete,
}

impl LinkedLifecyclePoint {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkedLifecyclePoint::Create => "create",
            LinkedLifecyclePoint::Reassign => "reassign",
            LinkedLifecyclePoint::NewReview => "new_review",
            LinkedLifecyclePoint::InProgress => "in_progress",
            LinkedLifecyclePoint::Pass => "pass",
            LinkedLifecyclePoint::Fail => "fail",
            LinkedLifecyclePoint::ProvisionalPass => "provisional_pass",
            LinkedLifecyclePoint::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedSystemAlert {
    pub color: String,
    pub html: String,
}

impl LinkedSystemAlert {
    pub fn new(color: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            html: html.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedSystemOutcome {
    pub success: bool,
    pub alerts: Vec<LinkedSystemAlert>,
    pub errstr: Option<String>,
}

impl LinkedSystemOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            alerts: Vec::new(),
            errstr: None,
        }
    }

    pub fn failed(errstr: impl Into<String>) -> Self {
        Self {
            success: false,
            alerts: Vec::new(),
            errstr: Some(errstr.into()),
        }
    }

    pub fn with_alert(mut self, alert: LinkedSystemAlert) -> Self {
        self.alerts.push(alert);
        self
    }
}

/// One hit returned by a linked system's search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedSearchHit {
    pub eid: String,
    pub name: String,
    pub url: Option<String>,
}

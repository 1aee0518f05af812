//! Progress events and the caller-supplied callbacks that receive them.
//!
//! Callbacks run inline on the pipeline task. A callback that returns an error
//! or panics is logged and skipped; it never stops the run.

use crate::group::GroupSummary;
use crate::lead::AnnotatedLead;
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Scoring,
    Classifying,
    Balancing,
    Reconciling,
    Pitching,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::Scoring => "SCORING",
            Phase::Classifying => "CLASSIFYING",
            Phase::Balancing => "BALANCING",
            Phase::Reconciling => "RECONCILING",
            Phase::Pitching => "PITCHING",
            Phase::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        total_leads: usize,
        batches: usize,
        max_groups: usize,
        predefined_groups: Option<Vec<String>>,
    },
    Phase {
        phase: Phase,
    },
    Scoring {
        current: usize,
        total: usize,
    },
    Batch {
        current: usize,
        total: usize,
        size: usize,
    },
    Balancing {
        from: usize,
        target: usize,
    },
    Balanced {
        groups: Vec<GroupSummary>,
    },
    Reconciling {
        unassigned: usize,
    },
    Pitching {
        current: usize,
        total: usize,
        group: String,
    },
    Completed {
        total_leads: usize,
        groups: Vec<GroupSummary>,
    },
    Degraded {
        reason: String,
    },
}

/// Everything a pipeline run reports, as one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    Lead(AnnotatedLead),
    Group(GroupSummary),
}

pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback<T> = Box<dyn Fn(&T) -> CallbackResult + Send + Sync>;

/// Optional observers for a pipeline run.
#[derive(Default)]
pub struct PipelineCallbacks {
    on_progress: Option<Callback<ProgressEvent>>,
    on_lead: Option<Callback<AnnotatedLead>>,
    on_group: Option<Callback<GroupSummary>>,
}

impl PipelineCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&ProgressEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called once per lead when its group's pitch is final.
    pub fn on_lead<F>(mut self, f: F) -> Self
    where
        F: Fn(&AnnotatedLead) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_lead = Some(Box::new(f));
        self
    }

    pub fn on_group<F>(mut self, f: F) -> Self
    where
        F: Fn(&GroupSummary) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_group = Some(Box::new(f));
        self
    }

    /// Forward every event into a channel. A closed receiver shows up as a
    /// logged callback error, not as a pipeline failure.
    pub fn channel(tx: UnboundedSender<PipelineEvent>) -> Self {
        let progress_tx = tx.clone();
        let lead_tx = tx.clone();
        Self::new()
            .on_progress(move |e| Ok(progress_tx.send(PipelineEvent::Progress(e.clone()))?))
            .on_lead(move |l| Ok(lead_tx.send(PipelineEvent::Lead(l.clone()))?))
            .on_group(move |g| Ok(tx.send(PipelineEvent::Group(g.clone()))?))
    }

    pub(crate) fn progress(&self, event: ProgressEvent) {
        dispatch("progress", self.on_progress.as_ref(), &event);
    }

    pub(crate) fn lead(&self, lead: &AnnotatedLead) {
        dispatch("lead", self.on_lead.as_ref(), lead);
    }

    pub(crate) fn group(&self, group: &GroupSummary) {
        dispatch("group", self.on_group.as_ref(), group);
    }
}

fn dispatch<T>(kind: &str, callback: Option<&Callback<T>>, value: &T) {
    let Some(callback) = callback else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| callback(value))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(callback = kind, error = %e, "callback returned an error"),
        Err(_) => error!(callback = kind, "callback panicked"),
    }
}

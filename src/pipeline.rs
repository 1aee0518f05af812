//! The lead grouping and pitching run, from raw records to annotated leads.
//!
//! A run moves through INIT, SCORING (optional), CLASSIFYING (with BALANCING
//! after a batch when needed), RECONCILING (only with unassigned leads left),
//! PITCHING and DONE. Group state is threaded through each step by value.
//! Whatever goes wrong, the caller gets every lead back annotated.

use crate::batch::batch_ranges;
use crate::classify::Classifier;
use crate::error::PipelineError;
use crate::group::{GroupState, UNASSIGNED_GROUP};
use crate::lead::{assign_ids, AnnotatedLead, Lead, LeadRecord};
use crate::llm::TextGenerator;
use crate::pitch::PitchWriter;
use crate::progress::{Phase, PipelineCallbacks, ProgressEvent};
use crate::retry::RetryPolicy;
use crate::scoring::{PageFetcher, RelevancyScorer, WebSearch};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_GROUPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub batch_size: usize,
    /// Used when a request does not set `max_groups`.
    pub default_max_groups: usize,
    pub classify_retry: RetryPolicy,
    pub pitch_retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            default_max_groups: DEFAULT_MAX_GROUPS,
            classify_retry: RetryPolicy::once(),
            pitch_retry: RetryPolicy::new(2, Duration::from_secs(1)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub leads: Vec<LeadRecord>,
    pub company_context: String,
    pub max_groups: Option<usize>,
    /// Fixed group names. `None` (or nothing left after cleaning) means the
    /// model proposes groups itself.
    pub predefined_groups: Option<Vec<String>>,
    pub score_relevancy: bool,
}

impl PipelineRequest {
    pub fn new(leads: Vec<LeadRecord>, company_context: impl Into<String>) -> Self {
        Self {
            leads,
            company_context: company_context.into(),
            ..Self::default()
        }
    }

    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = Some(max_groups);
        self
    }

    pub fn with_predefined_groups<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predefined_groups = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_relevancy_scoring(mut self, enabled: bool) -> Self {
        self.score_relevancy = enabled;
        self
    }
}

/// Trimmed, non-blank names with case-insensitive duplicates removed.
/// `None` when nothing usable is left.
fn clean_group_names(names: Option<Vec<String>>) -> Option<Vec<String>> {
    let mut seen = HashSet::new();
    let cleaned: Vec<String> = names?
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    options: PipelineOptions,
    search: Option<Arc<dyn WebSearch>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
}

impl Pipeline {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            options: PipelineOptions::default(),
            search: None,
            fetcher: None,
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Web research collaborators for relevancy scoring.
    pub fn with_scoring(mut self, search: Arc<dyn WebSearch>, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.search = Some(search);
        self.fetcher = Some(fetcher);
        self
    }

    /// Group the leads, write one pitch per group and return every lead
    /// annotated with its `groupName` and `pitch`, in input order.
    ///
    /// Never fails. If the run breaks down, every lead comes back in the
    /// "Unassigned" group with an empty pitch.
    pub async fn process_leads(&self, request: PipelineRequest, callbacks: &PipelineCallbacks) -> Vec<AnnotatedLead> {
        let PipelineRequest {
            leads,
            company_context,
            max_groups,
            predefined_groups,
            score_relevancy,
        } = request;

        let leads = assign_ids(leads);
        let span = info_span!("pipeline", leads = leads.len());
        let run = Run {
            pipeline: self,
            company_context: &company_context,
            max_groups: max_groups.unwrap_or(self.options.default_max_groups).max(1),
            predefined: clean_group_names(predefined_groups),
            score_relevancy,
            callbacks,
        };

        let outcome = AssertUnwindSafe(run.execute(leads.clone()).instrument(span))
            .catch_unwind()
            .await;
        let reason = match outcome {
            Ok(Ok(annotated)) => return annotated,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panic: {}", panic_message(panic)),
        };

        error!(reason = %reason, "pipeline failed, returning all leads unassigned");
        callbacks.progress(ProgressEvent::Degraded { reason });
        callbacks.progress(ProgressEvent::Phase { phase: Phase::Done });
        leads
            .into_iter()
            .map(|lead| AnnotatedLead {
                lead,
                group_name: UNASSIGNED_GROUP.to_string(),
                pitch: String::new(),
            })
            .collect()
    }
}

/// Settings resolved for one `process_leads` call.
struct Run<'a> {
    pipeline: &'a Pipeline,
    company_context: &'a str,
    max_groups: usize,
    predefined: Option<Vec<String>>,
    score_relevancy: bool,
    callbacks: &'a PipelineCallbacks,
}

impl<'a> Run<'a> {
    fn phase(&self, phase: Phase) {
        info!(%phase, "pipeline phase");
        self.callbacks.progress(ProgressEvent::Phase { phase });
    }

    async fn execute(&self, mut leads: Vec<Lead>) -> Result<Vec<AnnotatedLead>, PipelineError> {
        let options = &self.pipeline.options;

        self.phase(Phase::Init);
        let ranges = batch_ranges(leads.len(), options.batch_size)?;
        let target = self
            .predefined
            .as_ref()
            .map_or(self.max_groups, |names| names.len());
        self.callbacks.progress(ProgressEvent::Started {
            total_leads: leads.len(),
            batches: ranges.len(),
            max_groups: target,
            predefined_groups: self.predefined.clone(),
        });
        info!(
            leads = leads.len(),
            batches = ranges.len(),
            mode = if self.predefined.is_some() { "predefined" } else { "dynamic" },
            "pipeline started"
        );

        if leads.is_empty() {
            self.phase(Phase::Done);
            self.callbacks.progress(ProgressEvent::Completed {
                total_leads: 0,
                groups: Vec::new(),
            });
            return Ok(Vec::new());
        }

        if self.score_relevancy {
            self.score(&mut leads).await;
        }

        let state = self.classify(&leads, ranges).await;
        let state = self.reconcile(state, &leads).await;
        let state = self.finalize(state, &leads)?;
        let annotated = self.pitch(&state, &leads).await;

        self.phase(Phase::Done);
        self.callbacks.progress(ProgressEvent::Completed {
            total_leads: annotated.len(),
            groups: state.summaries(),
        });
        Ok(annotated)
    }

    async fn score(&self, leads: &mut [Lead]) {
        self.phase(Phase::Scoring);
        let pipeline = self.pipeline;
        let scorer = RelevancyScorer::new(
            pipeline.generator.as_ref(),
            self.company_context,
            pipeline.options.classify_retry,
        )
        .with_research(pipeline.search.as_deref(), pipeline.fetcher.as_deref());

        let total = leads.len();
        for (i, lead) in leads.iter_mut().enumerate() {
            self.callbacks.progress(ProgressEvent::Scoring { current: i + 1, total });
            if let Some((score, reason)) = scorer.score(lead).await {
                lead.relevancy_score = Some(score);
                lead.relevancy_reason = Some(reason);
            }
        }
    }

    async fn classify(&self, leads: &[Lead], ranges: Vec<Range<usize>>) -> GroupState {
        let options = &self.pipeline.options;
        let classifier = Classifier::new(
            self.pipeline.generator.as_ref(),
            self.company_context,
            options.classify_retry,
            self.callbacks,
        );

        self.phase(Phase::Classifying);
        let mut state = match &self.predefined {
            Some(names) => classifier.describe_groups(names).await,
            None => GroupState::default(),
        };

        let total = ranges.len();
        let mut balanced = false;
        for (i, range) in ranges.into_iter().enumerate() {
            let batch = &leads[range];
            if balanced {
                self.phase(Phase::Classifying);
                balanced = false;
            }
            self.callbacks.progress(ProgressEvent::Batch {
                current: i + 1,
                total,
                size: batch.len(),
            });

            state = match &self.predefined {
                Some(_) => classifier.classify_predefined(state, batch).await,
                None => {
                    let next = classifier.classify_dynamic(state, batch, self.max_groups).await;
                    if next.groups.len() > 1 && next.needs_balancing(self.max_groups) {
                        balanced = true;
                        self.balance(&classifier, next).await
                    } else {
                        next
                    }
                }
            };
        }
        state
    }

    async fn balance(&self, classifier: &Classifier<'_>, state: GroupState) -> GroupState {
        self.phase(Phase::Balancing);
        self.callbacks.progress(ProgressEvent::Balancing {
            from: state.groups.len(),
            target: self.max_groups,
        });
        let state = classifier.balance(state, self.max_groups).await;
        self.callbacks.progress(ProgressEvent::Balanced {
            groups: state.summaries(),
        });
        state
    }

    async fn reconcile(&self, state: GroupState, leads: &[Lead]) -> GroupState {
        let unassigned: Vec<Lead> = leads
            .iter()
            .filter(|l| state.group_of(&l.id).is_none())
            .cloned()
            .collect();
        if unassigned.is_empty() {
            return state;
        }

        self.phase(Phase::Reconciling);
        self.callbacks.progress(ProgressEvent::Reconciling {
            unassigned: unassigned.len(),
        });
        let classifier = Classifier::new(
            self.pipeline.generator.as_ref(),
            self.company_context,
            self.pipeline.options.classify_retry,
            self.callbacks,
        );
        classifier.reconcile(state, &unassigned).await
    }

    /// Drop empty groups and check that every lead has exactly one group.
    fn finalize(&self, state: GroupState, leads: &[Lead]) -> Result<GroupState, PipelineError> {
        let (state, dropped) = state.without_empty_groups();
        if !dropped.is_empty() {
            info!(groups = ?dropped, "dropped groups without members");
        }

        let member_total: usize = state.groups.iter().map(|g| g.lead_ids.len()).sum();
        if member_total != leads.len() {
            return Err(PipelineError::Invariant(format!(
                "{} group members for {} leads",
                member_total,
                leads.len()
            )));
        }
        for lead in leads {
            match state.group_of(&lead.id) {
                Some(name) if state.contains(name) => {}
                _ => {
                    return Err(PipelineError::Invariant(format!(
                        "lead {} has no group after reconciliation",
                        lead.id
                    )))
                }
            }
        }
        Ok(state)
    }

    async fn pitch(&self, state: &GroupState, leads: &[Lead]) -> Vec<AnnotatedLead> {
        self.phase(Phase::Pitching);
        let writer = PitchWriter::new(
            self.pipeline.generator.as_ref(),
            self.company_context,
            self.pipeline.options.pitch_retry,
        );
        let by_id: HashMap<&str, &Lead> = leads.iter().map(|l| (l.id.as_str(), l)).collect();
        let mut pitches: HashMap<&str, String> = HashMap::new();

        let total = state.groups.len();
        for (i, group) in state.groups.iter().enumerate() {
            self.callbacks.progress(ProgressEvent::Pitching {
                current: i + 1,
                total,
                group: group.name.clone(),
            });
            let pitch = writer.write(group).await;
            if pitch.is_empty() {
                warn!(group = %group.name, "group left without a pitch");
            }

            for id in &group.lead_ids {
                if let Some(lead) = by_id.get(id.as_str()) {
                    self.callbacks.lead(&AnnotatedLead {
                        lead: (*lead).clone(),
                        group_name: group.name.clone(),
                        pitch: pitch.clone(),
                    });
                }
            }
            pitches.insert(group.name.as_str(), pitch);
        }

        leads
            .iter()
            .map(|lead| {
                let group_name = state.group_of(&lead.id).unwrap_or(UNASSIGNED_GROUP).to_string();
                let pitch = pitches.get(group_name.as_str()).cloned().unwrap_or_default();
                AnnotatedLead {
                    lead: lead.clone(),
                    group_name,
                    pitch,
                }
            })
            .collect()
    }
}

//! Group classification, balancing and the final reconciliation pass.
//!
//! Every step takes the current [`GroupState`] and returns the next one. A
//! failed or unusable generation never aborts the run: each step has its own
//! fallback (default assignment, or leaving the roster unchanged).

use crate::error::PipelineError;
use crate::group::{Group, GroupState, GroupSummary, UNASSIGNED_GROUP};
use crate::json_extract::extract_as;
use crate::lead::Lead;
use crate::llm::TextGenerator;
use crate::progress::PipelineCallbacks;
use crate::prompts;
use crate::retry::RetryPolicy;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

const UNASSIGNED_DESCRIPTION: &str =
    "Leads that could not be classified into a more specific outreach segment.";

#[derive(Debug, Deserialize)]
struct GroupDescription {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    #[serde(rename = "leadId", deserialize_with = "lenient_string")]
    lead_id: String,
    #[serde(rename = "groupName", deserialize_with = "lenient_string")]
    group_name: String,
    #[serde(rename = "groupDescription", default)]
    group_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalancePlan {
    groups: Vec<BalancedGroup>,
}

#[derive(Debug, Deserialize)]
struct BalancedGroup {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "sourceGroups", default)]
    source_groups: Vec<String>,
}

/// Models sometimes emit numeric ids; accept any scalar as a string.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

fn leads_json(leads: &[Lead]) -> String {
    serde_json::to_string_pretty(leads).unwrap_or_else(|_| "[]".to_string())
}

/// Find the roster's spelling of `raw`: exact match first, then ignoring case
/// and surrounding whitespace.
fn resolve_name(state: &GroupState, raw: &str) -> Option<String> {
    if state.contains(raw) {
        return Some(raw.to_string());
    }
    let wanted = raw.trim().to_lowercase();
    state
        .groups
        .iter()
        .find(|g| g.name.trim().to_lowercase() == wanted)
        .map(|g| g.name.clone())
}

/// Shared collaborators for the classification steps of one run.
pub struct Classifier<'a> {
    generator: &'a dyn TextGenerator,
    company_context: &'a str,
    retry: RetryPolicy,
    callbacks: &'a PipelineCallbacks,
}

impl<'a> Classifier<'a> {
    pub fn new(
        generator: &'a dyn TextGenerator,
        company_context: &'a str,
        retry: RetryPolicy,
        callbacks: &'a PipelineCallbacks,
    ) -> Self {
        Self {
            generator,
            company_context,
            retry,
            callbacks,
        }
    }

    /// Generate and extract a `T`, retrying per policy when the output has no
    /// usable JSON of that shape.
    async fn request<T: DeserializeOwned>(&self, prompt: &str, label: &str) -> Result<T, PipelineError> {
        let text = self
            .retry
            .generate(self.generator, prompt, label, |t| extract_as::<T>(t).is_ok())
            .await?;
        Ok(extract_as::<T>(&text)?)
    }

    fn announce(&self, group: &Group) {
        self.callbacks.group(&GroupSummary::from(group));
    }

    /// Create a group and tell the caller about it.
    fn create_group(&self, state: &mut GroupState, name: &str, description: &str) {
        if state.add_group(name, description) {
            info!(group = name, "group created");
            if let Some(group) = state.groups.last() {
                self.announce(group);
            }
        }
    }

    /// Put every lead in `lead_ids` into the first known group, creating
    /// "Unassigned" when the roster is still empty.
    fn assign_to_fallback(&self, state: &mut GroupState, lead_ids: &[String]) {
        let target = match state.first_group_name() {
            Some(name) => name.to_string(),
            None => {
                self.create_group(state, UNASSIGNED_GROUP, UNASSIGNED_DESCRIPTION);
                UNASSIGNED_GROUP.to_string()
            }
        };
        for id in lead_ids {
            state.assign(id, &target);
        }
        warn!(group = %target, leads = lead_ids.len(), "leads assigned to fallback group");
    }

    /// Build the roster for caller-supplied group names, with one generated
    /// description per name. Names are kept exactly as given.
    pub async fn describe_groups(&self, names: &[String]) -> GroupState {
        let prompt = prompts::describe_groups_prompt(self.company_context, names);
        let described: Vec<GroupDescription> = match self.request(&prompt, "describe_groups").await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "group descriptions unavailable, continuing without them");
                Vec::new()
            }
        };

        let groups: Vec<Group> = names
            .iter()
            .map(|name| {
                let description = described
                    .iter()
                    .find(|d| d.name.trim().eq_ignore_ascii_case(name.trim()))
                    .map(|d| d.description.clone())
                    .unwrap_or_default();
                Group::new(name.clone(), description)
            })
            .collect();

        let state = GroupState::with_groups(groups);
        for group in &state.groups {
            self.announce(group);
        }
        info!(groups = state.groups.len(), "predefined groups described");
        state
    }

    /// Assign a batch to the fixed roster. Names outside the roster are ignored;
    /// leads the model skips are left for reconciliation.
    pub async fn classify_predefined(&self, mut state: GroupState, batch: &[Lead]) -> GroupState {
        let batch_ids: HashSet<&str> = batch.iter().map(|l| l.id.as_str()).collect();
        let prompt = prompts::classify_existing_prompt(self.company_context, &state.groups, &leads_json(batch));

        match self.request::<Vec<Assignment>>(&prompt, "classify_predefined").await {
            Ok(assignments) => {
                for a in assignments {
                    if !batch_ids.contains(a.lead_id.as_str()) {
                        debug!(lead = %a.lead_id, "ignoring assignment for unknown lead");
                        continue;
                    }
                    match resolve_name(&state, &a.group_name) {
                        Some(name) => {
                            state.assign(&a.lead_id, &name);
                        }
                        None => debug!(group = %a.group_name, "ignoring assignment to unknown group"),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, leads = batch.len(), "batch classification failed");
                let ids: Vec<String> = batch.iter().map(|l| l.id.clone()).collect();
                self.assign_to_fallback(&mut state, &ids);
            }
        }
        state
    }

    /// Assign a batch to existing groups or to new groups the model proposes.
    pub async fn classify_dynamic(&self, mut state: GroupState, batch: &[Lead], target: usize) -> GroupState {
        let batch_ids: HashSet<&str> = batch.iter().map(|l| l.id.as_str()).collect();
        let prompt = prompts::classify_dynamic_prompt(self.company_context, &state.groups, target, &leads_json(batch));

        match self.request::<Vec<Assignment>>(&prompt, "classify_dynamic").await {
            Ok(assignments) => {
                for a in assignments {
                    if !batch_ids.contains(a.lead_id.as_str()) {
                        debug!(lead = %a.lead_id, "ignoring assignment for unknown lead");
                        continue;
                    }
                    if a.group_name.is_empty() {
                        continue;
                    }
                    let name = match resolve_name(&state, &a.group_name) {
                        Some(existing) => existing,
                        None => {
                            let description = a.group_description.as_deref().unwrap_or("").trim();
                            self.create_group(&mut state, &a.group_name, description);
                            a.group_name.clone()
                        }
                    };
                    state.assign(&a.lead_id, &name);
                }
            }
            Err(e) => {
                warn!(error = %e, leads = batch.len(), "batch classification failed");
                let ids: Vec<String> = batch.iter().map(|l| l.id.clone()).collect();
                self.assign_to_fallback(&mut state, &ids);
            }
        }
        state
    }

    /// Merge the roster into exactly `target` groups. Any failure, or a plan
    /// that does not fit the current roster, leaves the state unchanged.
    pub async fn balance(&self, state: GroupState, target: usize) -> GroupState {
        if state.groups.len() <= 1 {
            return state;
        }
        let prompt = prompts::balance_prompt(self.company_context, &state.groups, target);
        let plan = match self.request::<BalancePlan>(&prompt, "balance").await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "balancing failed, keeping current groups");
                return state;
            }
        };
        match apply_balance_plan(&state, plan, target) {
            Ok(balanced) => balanced,
            Err(e) => {
                warn!(error = %e, "balancing plan rejected, keeping current groups");
                state
            }
        }
    }

    /// Force every lead in `unassigned` into an existing group with a single
    /// call. Leads the call does not place go to the first group.
    pub async fn reconcile(&self, mut state: GroupState, unassigned: &[Lead]) -> GroupState {
        if unassigned.is_empty() {
            return state;
        }
        let ids: Vec<String> = unassigned.iter().map(|l| l.id.clone()).collect();
        if state.groups.is_empty() {
            self.assign_to_fallback(&mut state, &ids);
            return state;
        }

        let pending: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let prompt = prompts::reconcile_prompt(self.company_context, &state.groups, &leads_json(unassigned));
        match self.request::<Vec<Assignment>>(&prompt, "reconcile").await {
            Ok(assignments) => {
                for a in assignments {
                    if !pending.contains(a.lead_id.as_str()) {
                        continue;
                    }
                    if let Some(name) = resolve_name(&state, &a.group_name) {
                        state.assign(&a.lead_id, &name);
                    }
                }
                let leftover = state.unassigned(ids.iter().map(String::as_str));
                if !leftover.is_empty() {
                    self.assign_to_fallback(&mut state, &leftover);
                }
            }
            Err(e) => {
                warn!(error = %e, leads = ids.len(), "reconciliation failed");
                self.assign_to_fallback(&mut state, &ids);
            }
        }
        state
    }
}

/// Build the balanced roster: each new group takes the members of the groups
/// it names as sources. Old groups no plan entry claims release their leads.
fn apply_balance_plan(state: &GroupState, plan: BalancePlan, target: usize) -> Result<GroupState, PipelineError> {
    if plan.groups.len() != target {
        return Err(PipelineError::Invariant(format!(
            "plan has {} groups, expected {}",
            plan.groups.len(),
            target
        )));
    }

    let mut names: HashSet<String> = HashSet::new();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut groups = Vec::with_capacity(plan.groups.len());

    for planned in plan.groups {
        let name = planned.name.trim().to_string();
        if name.is_empty() || !names.insert(name.to_lowercase()) {
            return Err(PipelineError::Invariant(format!(
                "plan has an empty or duplicate group name '{}'",
                planned.name
            )));
        }
        let mut group = Group::new(name, planned.description.trim());
        for source in &planned.source_groups {
            let resolved = resolve_name(state, source).ok_or_else(|| {
                PipelineError::Invariant(format!("plan references unknown group '{}'", source))
            })?;
            if !claimed.insert(resolved.clone()) {
                debug!(group = %resolved, "source group already merged elsewhere");
                continue;
            }
            if let Some(old) = state.groups.iter().find(|g| g.name == resolved) {
                group.lead_ids.extend(old.lead_ids.iter().cloned());
            }
        }
        groups.push(group);
    }

    let released: usize = state
        .groups
        .iter()
        .filter(|g| !claimed.contains(&g.name))
        .map(|g| g.lead_ids.len())
        .sum();
    if released > 0 {
        warn!(leads = released, "balancing left leads without a group");
    }

    Ok(GroupState::with_groups(groups))
}

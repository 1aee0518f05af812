//! Group roster and the lead → group mapping for a single pipeline run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const UNASSIGNED_GROUP: &str = "Unassigned";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub name: String,
    pub description: String,
    #[serde(rename = "leadIds")]
    pub lead_ids: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            lead_ids: Vec::new(),
        }
    }
}

/// Name, description and size of a group, as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSummary {
    pub name: String,
    pub description: String,
    pub size: usize,
}

impl From<&Group> for GroupSummary {
    fn from(g: &Group) -> Self {
        Self {
            name: g.name.clone(),
            description: g.description.clone(),
            size: g.lead_ids.len(),
        }
    }
}

/// The grouping state threaded through classification, balancing and
/// reconciliation. Each step consumes the previous state and returns the next.
///
/// `assignments` is the source of truth for membership; `groups[i].lead_ids`
/// is kept consistent with it so a lead is never counted in two groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupState {
    pub groups: Vec<Group>,
    pub assignments: HashMap<String, String>,
}

impl GroupState {
    pub fn with_groups(groups: Vec<Group>) -> Self {
        let mut state = Self {
            groups,
            assignments: HashMap::new(),
        };
        state.rebuild_assignments();
        state
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    pub fn first_group_name(&self) -> Option<&str> {
        self.groups.first().map(|g| g.name.as_str())
    }

    pub fn group_of(&self, lead_id: &str) -> Option<&str> {
        self.assignments.get(lead_id).map(String::as_str)
    }

    /// Add an empty group. Returns false when the name is already taken.
    pub fn add_group(&mut self, name: &str, description: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.groups.push(Group::new(name, description));
        true
    }

    /// Put `lead_id` into the existing group `group_name`, moving it out of
    /// any group it was in before. Returns false if the group does not exist.
    pub fn assign(&mut self, lead_id: &str, group_name: &str) -> bool {
        if !self.contains(group_name) {
            return false;
        }
        if let Some(previous) = self.assignments.get(lead_id) {
            if previous == group_name {
                return true;
            }
            let previous = previous.clone();
            if let Some(group) = self.groups.iter_mut().find(|g| g.name == previous) {
                group.lead_ids.retain(|id| id != lead_id);
            }
        }
        if let Some(group) = self.groups.iter_mut().find(|g| g.name == group_name) {
            group.lead_ids.push(lead_id.to_string());
        }
        self.assignments
            .insert(lead_id.to_string(), group_name.to_string());
        true
    }

    /// Discard the mapping and derive it again from group membership.
    /// A lead listed by more than one group stays with the first one.
    pub fn rebuild_assignments(&mut self) {
        self.assignments.clear();
        for group in &mut self.groups {
            let assignments = &mut self.assignments;
            let name = group.name.clone();
            group.lead_ids.retain(|id| {
                if assignments.contains_key(id) {
                    false
                } else {
                    assignments.insert(id.clone(), name.clone());
                    true
                }
            });
        }
    }

    /// Spread between the largest and smallest group.
    pub fn size_spread(&self) -> usize {
        let sizes = self.groups.iter().map(|g| g.lead_ids.len());
        match (sizes.clone().max(), sizes.min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }

    /// Whether the roster should be rebalanced towards `target` groups.
    pub fn needs_balancing(&self, target: usize) -> bool {
        self.groups.len() != target || self.size_spread() > 1
    }

    pub fn unassigned<'a, I>(&self, lead_ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lead_ids
            .into_iter()
            .filter(|id| !self.assignments.contains_key(*id))
            .map(str::to_string)
            .collect()
    }

    pub fn summaries(&self) -> Vec<GroupSummary> {
        self.groups.iter().map(GroupSummary::from).collect()
    }

    /// Drop groups that ended up with no members.
    pub fn without_empty_groups(mut self) -> (Self, Vec<String>) {
        let dropped: Vec<String> = self
            .groups
            .iter()
            .filter(|g| g.lead_ids.is_empty())
            .map(|g| g.name.clone())
            .collect();
        self.groups.retain(|g| !g.lead_ids.is_empty());
        (self, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(names: &[&str]) -> GroupState {
        GroupState::with_groups(names.iter().map(|n| Group::new(*n, "desc")).collect())
    }

    #[test]
    fn unit_assign_moves_lead_between_groups() {
        let mut state = state_with(&["A", "B"]);
        assert!(state.assign("l1", "A"));
        assert!(state.assign("l1", "B"));

        assert_eq!(state.group_of("l1"), Some("B"));
        assert!(state.groups[0].lead_ids.is_empty());
        assert_eq!(state.groups[1].lead_ids, vec!["l1".to_string()]);
    }

    #[test]
    fn unit_assign_rejects_unknown_group() {
        let mut state = state_with(&["A"]);
        assert!(!state.assign("l1", "Nope"));
        assert!(state.group_of("l1").is_none());
    }

    #[test]
    fn unit_add_group_keeps_names_unique() {
        let mut state = state_with(&["A"]);
        assert!(!state.add_group("A", "other"));
        assert!(state.add_group("B", "new"));
        assert_eq!(state.groups.len(), 2);
    }

    #[test]
    fn unit_rebuild_assignments_deduplicates_members() {
        let mut a = Group::new("A", "");
        a.lead_ids = vec!["1".into(), "2".into()];
        let mut b = Group::new("B", "");
        b.lead_ids = vec!["2".into(), "3".into()];
        let state = GroupState::with_groups(vec![a, b]);

        assert_eq!(state.group_of("2"), Some("A"));
        assert_eq!(state.groups[1].lead_ids, vec!["3".to_string()]);
        assert_eq!(state.assignments.len(), 3);
    }

    #[test]
    fn unit_needs_balancing_checks_count_and_spread() {
        let mut state = state_with(&["A", "B"]);
        state.assign("1", "A");
        state.assign("2", "B");
        assert!(!state.needs_balancing(2));
        assert!(state.needs_balancing(3));

        state.assign("3", "A");
        state.assign("4", "A");
        assert_eq!(state.size_spread(), 2);
        assert!(state.needs_balancing(2));
    }

    #[test]
    fn unit_unassigned_and_empty_group_pruning() {
        let mut state = state_with(&["A", "B"]);
        state.assign("1", "A");
        assert_eq!(state.unassigned(["1", "2"]), vec!["2".to_string()]);

        let (pruned, dropped) = state.without_empty_groups();
        assert_eq!(dropped, vec!["B".to_string()]);
        assert_eq!(pruned.groups.len(), 1);
    }
}

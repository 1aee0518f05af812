use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// One imported row: column name → value. An `id` column, when present and
/// unique, is kept as the lead identifier.
pub type LeadRecord = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
    #[serde(rename = "relevancyScore", default, skip_serializing_if = "Option::is_none")]
    pub relevancy_score: Option<u8>,
    #[serde(rename = "relevancyReason", default, skip_serializing_if = "Option::is_none")]
    pub relevancy_reason: Option<String>,
}

impl Lead {
    /// Look up an attribute by any of `names`, ignoring case, spaces and punctuation
    /// ("Company Name", "companyName" and "company_name" all match).
    pub fn attribute(&self, names: &[&str]) -> Option<&str> {
        let wanted: Vec<String> = names.iter().map(|n| normalize_key(n)).collect();
        self.attributes
            .iter()
            .find(|(key, value)| !value.trim().is_empty() && wanted.contains(&normalize_key(key)))
            .map(|(_, value)| value.trim())
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A lead as returned by the pipeline: every lead carries a group and a pitch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotatedLead {
    #[serde(flatten)]
    pub lead: Lead,
    #[serde(rename = "groupName")]
    pub group_name: String,
    pub pitch: String,
}

/// Columns the pipeline writes itself. Input values for them (from a previous
/// run's output) are dropped.
const RESERVED_KEYS: [&str; 4] = ["groupName", "pitch", "relevancyScore", "relevancyReason"];

/// Turn raw records into leads with identifiers that are unique within the run.
/// Existing ids are kept unless blank or already taken.
pub fn assign_ids(records: Vec<LeadRecord>) -> Vec<Lead> {
    let mut seen: HashSet<String> = HashSet::new();
    records
        .into_iter()
        .map(|mut attributes| {
            attributes.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
            let existing = attributes
                .remove("id")
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty() && !seen.contains(id));
            let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
            seen.insert(id.clone());
            Lead {
                id,
                attributes,
                relevancy_score: None,
                relevancy_reason: None,
            }
        })
        .collect()
}

//! Prompt templates for every generation call the pipeline makes.

use crate::group::Group;

const JSON_ONLY: &str = "# IMPORTANT: THERE SHOULD BE NO TEXT OR BACKTICKS OR ANYTHING ELSE BEFORE OR AFTER THE JSON.";

/// `name: description` per line, optionally with member counts.
pub fn roster(groups: &[Group], with_counts: bool) -> String {
    if groups.is_empty() {
        return "No groups created yet".to_string();
    }
    groups
        .iter()
        .map(|g| {
            if with_counts {
                format!("{} ({} leads): {}", g.name, g.lead_ids.len(), g.description)
            } else {
                format!("{}: {}", g.name, g.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn describe_groups_prompt(company_context: &str, names: &[String]) -> String {
    let names = names.join("\n");
    format!(
        r#"Given these group names, generate meaningful descriptions for each group in the context of our company's offerings.

Company Context:
{company_context}

Group Names:
{names}

Guidelines:
- Create descriptions that explain how our company can provide value to companies in each group
- Make descriptions general enough to apply to any company in the group
- Never mention a specific company or person
- Keep the group names exactly as given
- Keep descriptions concise but specific

Return a JSON array of objects with this structure:
[
  {{
    "name": "group name",
    "description": "group description"
  }}
]

{JSON_ONLY}"#
    )
}

pub fn classify_existing_prompt(company_context: &str, groups: &[Group], leads_json: &str) -> String {
    let roster = roster(groups, false);
    format!(
        r#"Classify these leads into the existing groups based on our company context.

Company Context:
{company_context}

Available Groups:
{roster}

Leads to Classify:
{leads_json}

Guidelines:
- Use ONLY the group names listed above, spelled exactly as shown
- Do NOT create new groups
- EVERY lead MUST be assigned to exactly one group

Return a JSON array of objects with this structure:
[
  {{
    "leadId": "string",
    "groupName": "string (must be one of the existing group names)"
  }}
]

{JSON_ONLY}"#
    )
}

pub fn classify_dynamic_prompt(
    company_context: &str,
    groups: &[Group],
    target_groups: usize,
    leads_json: &str,
) -> String {
    let roster = roster(groups, true);
    format!(
        r#"Analyze these leads and classify them into groups based on our company context.

Company Context:
{company_context}

Guidelines:
- Create broader, more inclusive group categories that can encompass multiple business types
- Focus on common business needs and value propositions rather than specific industries
- Group descriptions must be general enough to apply to any company in the group and must never mention a specific lead, company or person
- The purpose of these groups is to help us craft tailored sales outreach messages
- Each group should represent a distinct angle or approach for providing value
- Reuse an existing group whenever a lead fits it
- IMPORTANT: EVERY lead MUST be assigned to a group, without exception
- Try to distribute leads evenly among groups

Current Groups:
{roster}

Target Number of Groups: {target_groups}

Leads to Classify:
{leads_json}

Return a JSON array of objects with this structure:
[
  {{
    "leadId": "string",
    "groupName": "string",
    "groupDescription": "string (only if creating a new group, describe the sales angle or value proposition for this group)"
  }}
]

{JSON_ONLY}"#
    )
}

pub fn balance_prompt(company_context: &str, groups: &[Group], target_groups: usize) -> String {
    let roster = roster(groups, true);
    format!(
        r#"Analyze these groups and reorganize them into exactly {target_groups} balanced groups. Some groups may be too specific and can be merged into broader categories.

Company Context:
{company_context}

Current Groups and their members:
{roster}

Guidelines:
- Create EXACTLY {target_groups} groups with unique names
- Every current group must be listed as a source of exactly one new group
- Ensure groups are balanced in size
- Create broader, more inclusive group categories
- Make sure descriptions are general enough to encompass multiple business types
- Focus on common business needs and value propositions

Return a JSON object with this structure:
{{
  "groups": [
    {{
      "name": "string",
      "description": "string",
      "sourceGroups": ["names of original groups to merge into this one"]
    }}
  ]
}}

{JSON_ONLY}"#
    )
}

pub fn reconcile_prompt(company_context: &str, groups: &[Group], leads_json: &str) -> String {
    let roster = roster(groups, false);
    format!(
        r#"You MUST classify these leads into the existing groups. Every lead MUST be assigned to a group, even if the fit isn't perfect.
Find creative ways to connect each lead's business to the existing groups' value propositions.

Company Context:
{company_context}

Available Groups (you MUST use ONLY these groups):
{roster}

Leads to Classify (you MUST classify ALL of these):
{leads_json}

Guidelines:
- EVERY lead MUST be assigned to one of the existing groups
- Think creatively about how each business could benefit from the services described in each group
- If a lead doesn't perfectly fit any group, assign it to the group where it could gain the most value
- Do NOT create new groups
- Do NOT leave any lead unassigned

Return a JSON array of objects with this structure:
[
  {{
    "leadId": "string",
    "groupName": "string (must be one of the existing group names)"
  }}
]

{JSON_ONLY}"#
    )
}

pub fn pitch_prompt(company_context: &str, group: &Group) -> String {
    format!(
        r#"You are a world-class B2B sales copywriter. Please follow these instructions:
- Write a fully polished and actionable sales pitch that is ready to use as-is.
- Do NOT include any placeholders, template language, or bracketed fields.
- Do NOT reference the group, the recipient, or any specific company or person anywhere in the pitch.
- The pitch should NOT be in the form of an email, letter, or message. Write paragraphed, engaging, and insightful copy about the value and services offered.
- Only talk about our company and its offerings, tailored to the needs described for this audience.
- Make every part specific, relevant, and complete.
- End with a strong, relevant call to action that encourages immediate engagement.

Company Context: {company_context}
Audience Name: {name}
Audience Description: {description}
Number of Companies in Audience: {count}"#,
        name = group.name,
        description = group.description,
        count = group.lead_ids.len(),
    )
}

pub fn score_prompt(company_context: &str, lead_json: &str, web_context: &str) -> String {
    let web_context = if web_context.trim().is_empty() {
        "No web research available."
    } else {
        web_context
    };
    format!(
        r#"Rate how relevant this lead is as a prospect for our company.

Company Context:
{company_context}

Lead:
{lead_json}

Web Research:
{web_context}

Guidelines:
- Score from 1 (irrelevant) to 100 (ideal prospect)
- Base the score on fit with our offerings, not on company size alone
- Keep the reason to one or two sentences

Return a JSON object with this structure:
{{
  "score": 1,
  "reason": "string"
}}

{JSON_ONLY}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_roster_lists_counts_and_handles_empty() {
        assert_eq!(roster(&[], true), "No groups created yet");

        let mut g = Group::new("Tech", "Software buyers");
        g.lead_ids = vec!["1".into(), "2".into()];
        assert_eq!(roster(&[g.clone()], true), "Tech (2 leads): Software buyers");
        assert_eq!(roster(&[g], false), "Tech: Software buyers");
    }

    #[test]
    fn unit_pitch_prompt_carries_group_but_no_lead_data() {
        let mut g = Group::new("Retail", "Store operators");
        g.lead_ids = vec!["lead-123".into()];
        let prompt = pitch_prompt("We sell POS software", &g);
        assert!(prompt.contains("Audience Name: Retail"));
        assert!(prompt.contains("Number of Companies in Audience: 1"));
        assert!(!prompt.contains("lead-123"));
    }

    #[test]
    fn unit_dynamic_prompt_includes_target_and_roster() {
        let prompt = classify_dynamic_prompt("ctx", &[], 4, "[]");
        assert!(prompt.contains("Target Number of Groups: 4"));
        assert!(prompt.contains("No groups created yet"));
        assert!(prompt.contains("\"groupDescription\""));
    }
}

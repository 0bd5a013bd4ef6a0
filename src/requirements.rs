//! Requirements import.
//!
//! Turns requirement-like work items (see [`REQUIREMENT_TYPES`]) into
//! normalized [`Requirement`] records with a markdown `content` body that
//! can be analysed or indexed like any other text.

use serde::Serialize;

use crate::error::Result;
use crate::tracker::{WorkItem, WorkTracker};

/// Work-item types kept by [`import_requirements`].
pub const REQUIREMENT_TYPES: [&str; 4] = ["User Story", "Feature", "Epic", "Requirement"];

pub const SOURCE_AZURE_DEVOPS: &str = "azure_devops";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Requirement {
    pub source: String,
    pub source_id: i64,
    pub title: String,
    pub description: String,
    pub requirement_type: String,
    pub priority: Option<i64>,
    pub assigned_to: Option<String>,
    pub tags: String,
    pub acceptance_criteria: String,
    pub content: String,
}

pub fn is_requirement_type(work_item_type: &str) -> bool {
    REQUIREMENT_TYPES.contains(&work_item_type)
}

/// Normalize a work item. `None` for types that are not requirements.
pub fn from_work_item(item: &WorkItem) -> Option<Requirement> {
    if !is_requirement_type(&item.work_item_type) {
        return None;
    }
    Some(Requirement {
        source: SOURCE_AZURE_DEVOPS.to_string(),
        source_id: item.id,
        title: item.title.clone(),
        description: item.description.clone(),
        requirement_type: item.work_item_type.clone(),
        priority: item.priority,
        assigned_to: item.assigned_to.clone(),
        tags: item.tags.clone(),
        acceptance_criteria: item.acceptance_criteria.clone(),
        content: requirement_content(item),
    })
}

/// Markdown body: title heading, description, then type, priority and
/// assignee lines. Missing priority or assignee render as `N/A`.
pub fn requirement_content(item: &WorkItem) -> String {
    let priority = item
        .priority
        .map(|p| p.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let assigned_to = item
        .assigned_to
        .as_deref()
        .filter(|a| !a.is_empty())
        .unwrap_or("N/A");
    format!(
        "# {}\n\n{}\n\n**Type:** {}\n**Priority:** {}\n**Assigned To:** {}",
        item.title, item.description, item.work_item_type, priority, assigned_to
    )
}

/// Fetch the project's work items and keep the requirements, in the order
/// the tracker returned them.
pub async fn import_requirements(
    tracker: &dyn WorkTracker,
    project: &str,
) -> Result<Vec<Requirement>> {
    let items = tracker.query_work_items(project, None).await?;
    let requirements: Vec<Requirement> = items.iter().filter_map(from_work_item).collect();
    tracing::info!(
        project,
        work_items = items.len(),
        requirements = requirements.len(),
        "imported requirements"
    );
    Ok(requirements)
}

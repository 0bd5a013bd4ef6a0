//! Work-tracking service client.
//!
//! [`WorkTracker`] is the interface the rest of the crate uses to read and
//! write work items. [`AzureDevOpsClient`] implements it over the Azure
//! DevOps REST API, authenticating with a personal access token (PAT) sent
//! as HTTP basic auth with an empty user name.
//!
//! # Configuration
//!
//! ```toml
//! [tracker]
//! organization_url = "https://dev.azure.com/contoso"
//! api_version = "7.0"
//! ```
//!
//! The organization URL can also come from `ADO_ORGANIZATION_URL`; the
//! token is always read from `ADO_PAT_TOKEN`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};

/// Work-item ids fetched per request; the service caps a batch at 200.
const WORK_ITEM_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub work_item_type: String,
    pub state: String,
    pub assigned_to: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub changed_date: Option<DateTime<Utc>>,
    pub priority: Option<i64>,
    pub area_path: String,
    pub iteration_path: String,
    pub tags: String,
    pub acceptance_criteria: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub state: String,
    pub visibility: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedWorkItem {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub work_item_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Source of work items.
#[async_trait]
pub trait WorkTracker: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Work items of `project` selected by a WIQL query, or by
    /// [`default_wiql`] when `wiql` is `None`.
    async fn query_work_items(&self, project: &str, wiql: Option<&str>) -> Result<Vec<WorkItem>>;

    /// `Ok(None)` if no work item has this id.
    async fn get_work_item(&self, id: i64) -> Result<Option<WorkItem>>;

    async fn create_work_item(
        &self,
        project: &str,
        work_item_type: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<CreatedWorkItem>;

    /// Set each field (by reference name, e.g. `System.State`) to its value.
    async fn update_work_item(&self, id: i64, fields: &BTreeMap<String, Value>) -> Result<()>;
}

/// Requirement-like items of a project, most recently changed first.
pub fn default_wiql(project: &str) -> String {
    format!(
        "SELECT [System.Id], [System.Title], [System.Description], [System.WorkItemType], [System.State] \
         FROM WorkItems \
         WHERE [System.TeamProject] = '{}' \
         AND [System.WorkItemType] IN ('User Story', 'Feature', 'Epic', 'Requirement') \
         ORDER BY [System.ChangedDate] DESC",
        project.replace('\'', "''")
    )
}

pub struct AzureDevOpsClient {
    http: reqwest::Client,
    organization_url: Url,
    auth_header: String,
    api_version: String,
}

impl AzureDevOpsClient {
    pub fn new(
        organization_url: &str,
        personal_access_token: &str,
        api_version: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let organization_url = Url::parse(organization_url.trim_end_matches('/')).map_err(|e| {
            Error::Tracker(format!("invalid organization url '{}': {}", organization_url, e))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Tracker(e.to_string()))?;
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!(":{}", personal_access_token));
        Ok(Self {
            http,
            organization_url,
            auth_header: format!("Basic {}", token),
            api_version: api_version.to_string(),
        })
    }

    /// Build a client from `[tracker]` and the environment.
    pub fn from_env(config: &TrackerConfig) -> Result<Self> {
        let organization_url = config
            .organization_url
            .clone()
            .or_else(|| std::env::var("ADO_ORGANIZATION_URL").ok())
            .ok_or_else(|| {
                Error::Tracker(
                    "no organization url: set tracker.organization_url or ADO_ORGANIZATION_URL"
                        .to_string(),
                )
            })?;
        let pat = std::env::var("ADO_PAT_TOKEN")
            .map_err(|_| Error::Tracker("ADO_PAT_TOKEN environment variable not set".to_string()))?;
        Self::new(&organization_url, &pat, &config.api_version, config.timeout_secs)
    }

    pub fn organization_url(&self) -> &str {
        self.organization_url.as_str()
    }

    /// `{organization}/{segments...}?api-version=...`, each segment
    /// percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.organization_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Tracker("organization url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        req.header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| Error::Tracker(e.to_string()))
    }

    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        read_json(self.send(req).await?).await
    }

    async fn fetch_work_items(&self, ids: &[i64]) -> Result<Vec<WorkItem>> {
        let mut items = Vec::with_capacity(ids.len());
        for batch in ids.chunks(WORK_ITEM_BATCH_SIZE) {
            let joined = batch
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let mut url = self.url(&["_apis", "wit", "workitems"])?;
            url.query_pairs_mut().append_pair("ids", &joined);
            let json = self.send_json(self.http.get(url)).await?;
            items.extend(
                json.get("value")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(parse_work_item),
            );
        }
        Ok(items)
    }

    pub async fn list_boards(&self, project: &str) -> Result<Vec<Board>> {
        let url = self.url(&[project, "_apis", "work", "boards"])?;
        let json = self.send_json(self.http.get(url)).await?;
        Ok(json
            .get("value")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|b| Board {
                id: str_field(b, "id"),
                name: str_field(b, "name"),
                url: str_field(b, "url"),
            })
            .collect())
    }
}

#[async_trait]
impl WorkTracker for AzureDevOpsClient {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let url = self.url(&["_apis", "projects"])?;
        let json = self.send_json(self.http.get(url)).await?;
        Ok(parse_projects(&json))
    }

    async fn query_work_items(&self, project: &str, wiql: Option<&str>) -> Result<Vec<WorkItem>> {
        let query = wiql
            .map(str::to_string)
            .unwrap_or_else(|| default_wiql(project));
        let url = self.url(&[project, "_apis", "wit", "wiql"])?;
        let json = self
            .send_json(self.http.post(url).json(&json!({ "query": query })))
            .await?;

        let ids: Vec<i64> = json
            .get("workItems")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|w| w.get("id").and_then(Value::as_i64))
            .collect();
        tracing::debug!(project, matched = ids.len(), "wiql query complete");
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_work_items(&ids).await
    }

    async fn get_work_item(&self, id: i64) -> Result<Option<WorkItem>> {
        let url = self.url(&["_apis", "wit", "workitems", &id.to_string()])?;
        let resp = self.send(self.http.get(url)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let json = read_json(resp).await?;
        Ok(parse_work_item(&json))
    }

    async fn create_work_item(
        &self,
        project: &str,
        work_item_type: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<CreatedWorkItem> {
        let mut ops = vec![json!({ "op": "add", "path": "/fields/System.Title", "value": title })];
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            ops.push(json!({
                "op": "add",
                "path": "/fields/System.Description",
                "value": description
            }));
        }

        let type_segment = format!("${}", work_item_type);
        let url = self.url(&[project, "_apis", "wit", "workitems", &type_segment])?;
        let json = self
            .send_json(
                self.http
                    .post(url)
                    .header("Content-Type", "application/json-patch+json")
                    .body(Value::Array(ops).to_string()),
            )
            .await?;

        let id = json
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Tracker("create response missing id".to_string()))?;
        tracing::info!(project, id, work_item_type, "created work item");
        Ok(CreatedWorkItem {
            id,
            url: str_field(&json, "url"),
            title: title.to_string(),
            work_item_type: work_item_type.to_string(),
        })
    }

    async fn update_work_item(&self, id: i64, fields: &BTreeMap<String, Value>) -> Result<()> {
        let ops: Vec<Value> = fields
            .iter()
            .map(|(field, value)| {
                json!({ "op": "add", "path": format!("/fields/{}", field), "value": value })
            })
            .collect();
        let url = self.url(&["_apis", "wit", "workitems", &id.to_string()])?;
        self.send_json(
            self.http
                .patch(url)
                .header("Content-Type", "application/json-patch+json")
                .body(Value::Array(ops).to_string()),
        )
        .await?;
        tracing::info!(id, fields = fields.len(), "updated work item");
        Ok(())
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| Error::Tracker(e.to_string()))?;
    if !status.is_success() {
        return Err(Error::Tracker(format!(
            "Azure DevOps API error (HTTP {}): {}",
            status, text
        )));
    }
    serde_json::from_str(&text)
        .map_err(|e| Error::Tracker(format!("invalid Azure DevOps response: {}", e)))
}

fn str_field(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_projects(json: &Value) -> Vec<Project> {
    json.get("value")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|p| Project {
            id: str_field(p, "id"),
            name: str_field(p, "name"),
            description: p
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            state: str_field(p, "state"),
            visibility: str_field(p, "visibility"),
        })
        .collect()
}

/// Map a work-item resource (`{ id, fields: {...}, url }`) to a [`WorkItem`].
pub fn parse_work_item(json: &Value) -> Option<WorkItem> {
    let id = json.get("id").and_then(Value::as_i64)?;
    let empty = serde_json::Map::new();
    let fields = json
        .get("fields")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let date = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    };
    // AssignedTo is an identity object in current API versions and a
    // "Name <email>" string in older ones.
    let assigned_to = fields.get("System.AssignedTo").and_then(|v| match v {
        Value::Object(identity) => identity
            .get("displayName")
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    });

    Some(WorkItem {
        id,
        title: text("System.Title"),
        description: text("System.Description"),
        work_item_type: text("System.WorkItemType"),
        state: text("System.State"),
        assigned_to,
        created_date: date("System.CreatedDate"),
        changed_date: date("System.ChangedDate"),
        priority: fields
            .get("Microsoft.VSTS.Common.Priority")
            .and_then(Value::as_i64),
        area_path: text("System.AreaPath"),
        iteration_path: text("System.IterationPath"),
        tags: text("System.Tags"),
        acceptance_criteria: text("Microsoft.VSTS.Common.AcceptanceCriteria"),
        url: json.get("url").and_then(Value::as_str).map(str::to_string),
    })
}

/// Verified tracker connections, one per organization URL.
#[derive(Default)]
pub struct TrackerConnections {
    trackers: HashMap<String, Arc<dyn WorkTracker>>,
}

impl TrackerConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `tracker` can see at least one project and remember it
    /// under `organization_url`. Returns the number of visible projects.
    pub async fn connect(
        &mut self,
        organization_url: &str,
        tracker: Arc<dyn WorkTracker>,
    ) -> Result<usize> {
        let projects = tracker.list_projects().await?;
        if projects.is_empty() {
            return Err(Error::Tracker(format!(
                "no projects visible at {}; check the access token's scope",
                organization_url
            )));
        }
        tracing::info!(organization = organization_url, projects = projects.len(), "tracker connected");
        self.trackers
            .insert(organization_url.to_string(), tracker);
        Ok(projects.len())
    }

    pub fn get(&self, organization_url: &str) -> Option<Arc<dyn WorkTracker>> {
        self.trackers.get(organization_url).cloned()
    }

    pub fn is_connected(&self, organization_url: &str) -> bool {
        self.trackers.contains_key(organization_url)
    }

    /// Projects of a connected organization; empty if not connected.
    pub async fn projects(&self, organization_url: &str) -> Result<Vec<Project>> {
        match self.get(organization_url) {
            Some(tracker) => tracker.list_projects().await,
            None => Ok(Vec::new()),
        }
    }

    /// Work items of a connected organization; empty if not connected.
    pub async fn work_items(
        &self,
        organization_url: &str,
        project: &str,
        wiql: Option<&str>,
    ) -> Result<Vec<WorkItem>> {
        match self.get(organization_url) {
            Some(tracker) => tracker.query_work_items(project, wiql).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_work_item_fields() {
        let json = json!({
            "id": 42,
            "url": "https://dev.azure.com/contoso/_apis/wit/workItems/42",
            "fields": {
                "System.Title": "Quote a new driver",
                "System.Description": "<div>Agent adds a driver</div>",
                "System.WorkItemType": "User Story",
                "System.State": "Active",
                "System.AssignedTo": { "displayName": "Sam Rivera", "uniqueName": "sam@contoso.com" },
                "System.CreatedDate": "2024-03-01T10:15:00.5Z",
                "System.ChangedDate": "2024-03-04T08:00:00Z",
                "Microsoft.VSTS.Common.Priority": 2,
                "System.AreaPath": "Auto\\Quoting",
                "System.IterationPath": "Auto\\Sprint 12",
                "System.Tags": "quoting; drivers",
                "Microsoft.VSTS.Common.AcceptanceCriteria": "Driver appears on quote"
            }
        });
        let item = parse_work_item(&json).unwrap();
        assert_eq!(item.id, 42);
        assert_eq!(item.work_item_type, "User Story");
        assert_eq!(item.assigned_to.as_deref(), Some("Sam Rivera"));
        assert_eq!(item.priority, Some(2));
        assert_eq!(item.tags, "quoting; drivers");
        assert!(item.created_date.is_some());
        assert_eq!(
            item.changed_date.unwrap().to_rfc3339(),
            "2024-03-04T08:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_work_item_sparse_fields() {
        let item = parse_work_item(&json!({ "id": 7, "fields": { "System.Title": "Bare" } })).unwrap();
        assert_eq!(item.title, "Bare");
        assert_eq!(item.description, "");
        assert!(item.assigned_to.is_none());
        assert!(item.priority.is_none());
        assert!(parse_work_item(&json!({ "fields": {} })).is_none());
    }

    #[test]
    fn test_parse_projects() {
        let json = json!({
            "count": 1,
            "value": [{ "id": "p-1", "name": "Personal Auto", "state": "wellFormed", "visibility": "private" }]
        });
        let projects = parse_projects(&json);
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Personal Auto");
        assert!(projects[0].description.is_none());
    }

    #[test]
    fn test_default_wiql_escapes_project() {
        let wiql = default_wiql("O'Brien Auto");
        assert!(wiql.contains("[System.TeamProject] = 'O''Brien Auto'"));
        assert!(wiql.contains("'User Story', 'Feature', 'Epic', 'Requirement'"));
        assert!(wiql.ends_with("ORDER BY [System.ChangedDate] DESC"));
    }

    #[test]
    fn test_urls_encode_segments_and_version() {
        let client =
            AzureDevOpsClient::new("https://dev.azure.com/contoso/", "pat", "7.0", 5).unwrap();
        let url = client
            .url(&["Personal Auto", "_apis", "wit", "workitems", "$User Story"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/contoso/Personal%20Auto/_apis/wit/workitems/$User%20Story?api-version=7.0"
        );
    }

    #[test]
    fn test_basic_auth_uses_empty_user() {
        let client = AzureDevOpsClient::new("https://dev.azure.com/contoso", "secret", "7.0", 5).unwrap();
        // base64(":secret")
        assert_eq!(client.auth_header, "Basic OnNlY3JldA==");
    }

    struct StaticTracker(Vec<Project>);

    #[async_trait]
    impl WorkTracker for StaticTracker {
        async fn list_projects(&self) -> Result<Vec<Project>> {
            Ok(self.0.clone())
        }
        async fn query_work_items(&self, _: &str, _: Option<&str>) -> Result<Vec<WorkItem>> {
            Ok(vec![WorkItem {
                id: 1,
                ..WorkItem::default()
            }])
        }
        async fn get_work_item(&self, _: i64) -> Result<Option<WorkItem>> {
            Ok(None)
        }
        async fn create_work_item(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<CreatedWorkItem> {
            Err(Error::Tracker("read only".into()))
        }
        async fn update_work_item(&self, _: i64, _: &BTreeMap<String, Value>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_requires_projects() {
        let mut connections = TrackerConnections::new();
        let err = connections
            .connect("https://dev.azure.com/empty", Arc::new(StaticTracker(vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tracker(_)));
        assert!(!connections.is_connected("https://dev.azure.com/empty"));
        assert!(connections
            .work_items("https://dev.azure.com/empty", "p", None)
            .await
            .unwrap()
            .is_empty());

        let project = Project {
            id: "p-1".into(),
            name: "Auto".into(),
            description: None,
            state: "wellFormed".into(),
            visibility: "private".into(),
        };
        let count = connections
            .connect("https://dev.azure.com/contoso", Arc::new(StaticTracker(vec![project])))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            connections
                .work_items("https://dev.azure.com/contoso", "Auto", None)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}

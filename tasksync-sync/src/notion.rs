//! Notion REST client: paginated database query and page creation.
//!
//! Property mapping (source and target share the same schema):
//!
//! | Record field | Notion property   | Shape               |
//! |--------------|-------------------|---------------------|
//! | `title`      | `Story`           | title               |
//! | `state`      | `Kanban - State`  | select              |
//! | `due`        | `Due`             | date (`start`)      |
//! | `assignees`  | `Assignee`        | people (names)      |
//! | `priority`   | `Priority`        | select              |

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use tasksync_core::{DatabaseId, Settings, Snapshot, TaskRecord};

use crate::error::{fetch_err, outbound_err};
use crate::source::{OutboundTask, RecordSink, RecordSource};
use crate::SyncError;

pub const NOTION_VERSION: &str = "2022-06-28";

pub const PROP_TITLE: &str = "Story";
pub const PROP_STATE: &str = "Kanban - State";
pub const PROP_DUE: &str = "Due";
pub const PROP_ASSIGNEE: &str = "Assignee";
pub const PROP_PRIORITY: &str = "Priority";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One page of `POST /databases/{id}/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<PageObject>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageObject {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Blocking Notion client. Every request carries the configured timeout.
pub struct NotionClient {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
}

impl NotionClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build from resolved settings; fails when `NOTION_API_KEY` is unset.
    pub fn from_settings(settings: &Settings) -> Result<Self, SyncError> {
        let key = settings.require_api_key()?;
        Ok(Self::new(
            settings.notion_api_base.clone(),
            key,
            settings.request_timeout,
        ))
    }

    fn post(&self, path: &str) -> ureq::Request {
        self.agent
            .post(&format!("{}/{}", self.api_base, path))
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Notion-Version", NOTION_VERSION)
    }

    fn query_page(
        &self,
        database: &DatabaseId,
        cursor: Option<&str>,
    ) -> Result<QueryResponse, SyncError> {
        let path = format!("databases/{}/query", database.as_str());
        let body = match cursor {
            Some(cursor) => json!({ "start_cursor": cursor }),
            None => json!({}),
        };
        let response = self
            .post(&path)
            .send_json(body)
            .map_err(|e| fetch_err(database, describe(e)))?;
        response
            .into_json::<QueryResponse>()
            .map_err(|e| SyncError::Malformed {
                endpoint: path,
                reason: e.to_string(),
            })
    }
}

impl RecordSource for NotionClient {
    fn fetch_all_records(&self, database: &DatabaseId) -> Result<Snapshot, SyncError> {
        let snapshot = collect_pages(database, |cursor| self.query_page(database, cursor))?;
        tracing::debug!("fetched {} records from {}", snapshot.len(), database);
        Ok(snapshot)
    }
}

impl RecordSink for NotionClient {
    fn create_record(&self, database: &DatabaseId, task: &OutboundTask) -> Result<(), SyncError> {
        self.post("pages")
            .send_json(create_page_body(database, task))
            .map_err(|e| outbound_err(database, describe(e)))?;
        tracing::info!("created '{}' in {}", task.title, database);
        Ok(())
    }
}

fn describe(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            format!("HTTP {code}: {}", body.trim())
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Follow `next_cursor` until `has_more` is false and key every page by id.
///
/// Any failing page fails the whole fetch; a cursor the server hands back
/// twice is treated as malformed instead of looping forever.
pub fn collect_pages<F>(database: &DatabaseId, mut fetch_page: F) -> Result<Snapshot, SyncError>
where
    F: FnMut(Option<&str>) -> Result<QueryResponse, SyncError>,
{
    let mut snapshot = Snapshot::new();
    let mut cursor: Option<String> = None;
    let mut seen_cursors = Vec::new();

    loop {
        let page = fetch_page(cursor.as_deref())?;
        for object in &page.results {
            snapshot.insert(object.id.clone(), page_to_record(&object.properties));
        }

        if !page.has_more {
            return Ok(snapshot);
        }
        let next = page.next_cursor.ok_or_else(|| SyncError::Malformed {
            endpoint: format!("databases/{database}/query"),
            reason: "has_more is true but next_cursor is missing".to_string(),
        })?;
        if seen_cursors.contains(&next) {
            return Err(SyncError::Malformed {
                endpoint: format!("databases/{database}/query"),
                reason: format!("cursor '{next}' returned twice"),
            });
        }
        seen_cursors.push(next.clone());
        cursor = Some(next);
    }
}

// ---------------------------------------------------------------------------
// Property mapping
// ---------------------------------------------------------------------------

/// Read a [`TaskRecord`] out of a page's `properties` object.
/// Missing or null properties map to `None` (an empty title).
pub fn page_to_record(properties: &Map<String, Value>) -> TaskRecord {
    let title = properties
        .get(PROP_TITLE)
        .and_then(|p| p.pointer("/title/0"))
        .and_then(|t| {
            t.pointer("/text/content")
                .or_else(|| t.get("plain_text"))
                .and_then(Value::as_str)
        })
        .unwrap_or_default()
        .to_string();

    let assignees = properties
        .get(PROP_ASSIGNEE)
        .and_then(|p| p.get("people"))
        .and_then(Value::as_array)
        .map(|people| {
            people
                .iter()
                .filter_map(|person| person.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    TaskRecord {
        title,
        state: select_name(properties, PROP_STATE),
        due: properties
            .get(PROP_DUE)
            .and_then(|p| p.pointer("/date/start"))
            .and_then(Value::as_str)
            .map(str::to_string),
        assignees,
        priority: select_name(properties, PROP_PRIORITY),
    }
}

fn select_name(properties: &Map<String, Value>, name: &str) -> Option<String> {
    properties
        .get(name)
        .and_then(|p| p.pointer("/select/name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Body for `POST /pages`.
pub fn create_page_body(database: &DatabaseId, task: &OutboundTask) -> Value {
    let mut properties = Map::new();
    properties.insert(
        PROP_TITLE.to_string(),
        json!({ "title": [{ "text": { "content": task.title } }] }),
    );
    if let Some(state) = &task.state {
        properties.insert(PROP_STATE.to_string(), json!({ "select": { "name": state } }));
    }
    if let Some(due) = &task.due {
        properties.insert(PROP_DUE.to_string(), json!({ "date": { "start": due } }));
    }
    if let Some(priority) = &task.priority {
        properties.insert(
            PROP_PRIORITY.to_string(),
            json!({ "select": { "name": priority } }),
        );
    }

    json!({
        "parent": { "database_id": database.as_str() },
        "properties": Value::Object(properties),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

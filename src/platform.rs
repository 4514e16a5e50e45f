//! Platform data model and the capability set the pipeline relies on.
//!
//! Ids are kept as strings in memory; the platform sends entity and user ids
//! as JSON numbers and job ids as strings, so deserialization accepts both.

use crate::error::PlatformError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub type EntityId = String;
pub type JobId = String;
pub type UserId = String;

pub const SEQUENCE_DOCUMENT: &str = "SEQUENCE_DOCUMENT";
pub const PLUGIN_JOB: &str = "PluginJob";
pub const EXPORT_JOB: &str = "ExportJob";

/// Job params key naming the user who published the running plugin.
pub const PLUGIN_AUTHOR_PARAM: &str = "pluginAuthorId";

mod id_format {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(s) => s,
                RawId::Number(n) => n.to_string(),
            }
        }
    }

    pub fn one<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        RawId::deserialize(d).map(String::from)
    }

    pub fn optional<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Option::<RawId>::deserialize(d).map(|v| v.map(String::from))
    }

    pub fn many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Option::<Vec<RawId>>::deserialize(d)
            .map(|v| v.unwrap_or_default().into_iter().map(String::from).collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    #[serde(deserialize_with = "id_format::one")]
    pub id: JobId,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    #[serde(deserialize_with = "id_format::optional")]
    pub owner_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub messages: Vec<String>,
    #[serde(deserialize_with = "id_format::many")]
    pub input_entities: Vec<EntityId>,
    #[serde(deserialize_with = "id_format::many")]
    pub output_entities: Vec<EntityId>,
    pub params: Map<String, Value>,
}

impl Job {
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Entity {
    #[serde(deserialize_with = "id_format::one")]
    pub id: EntityId,
    pub name: String,
    #[serde(deserialize_with = "id_format::one")]
    pub owner_id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(deserialize_with = "id_format::optional")]
    pub parent_id: Option<EntityId>,
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[serde(deserialize_with = "id_format::one")]
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    Integer,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

impl Column {
    pub fn integer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnType::Integer,
        }
    }

    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnType::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub owner_id: String,
    pub parent_id: Option<EntityId>,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub visible: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub owner_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub input_entities: Vec<EntityId>,
    pub params: Map<String, Value>,
    /// Creates the job record only; the caller runs the work itself.
    pub client_side: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub progress: u8,
    pub messages: Vec<String>,
}

/// Everything the pipeline needs from the platform. One implementation talks
/// HTTP; tests use an in-memory one.
pub trait Platform {
    fn get_entity(&self, entity_id: &str) -> Result<Entity, PlatformError>;

    /// Writes the tab-separated rows of a sequence document to `destination`.
    fn download_tabular(&self, entity_id: &str, destination: &Path) -> Result<(), PlatformError>;

    fn create_document(&self, document: &NewDocument) -> Result<Entity, PlatformError>;

    /// Sends one TSV payload (header included) bound to `schema`.
    fn upload_chunk(
        &self,
        document_id: &str,
        schema: &[Column],
        payload: &[u8],
    ) -> Result<(), PlatformError>;

    /// Closes an upload session and makes the document visible.
    fn finalize_upload(&self, document_id: &str, row_count: usize)
    -> Result<Entity, PlatformError>;

    fn get_job(&self, job_id: &str) -> Result<Job, PlatformError>;

    fn update_job_status(&self, job_id: &str, update: &JobStatusUpdate)
    -> Result<(), PlatformError>;

    fn complete_job(
        &self,
        job_id: &str,
        messages: &[String],
        output_entity_ids: &[EntityId],
    ) -> Result<(), PlatformError>;

    fn create_job(&self, job: &NewJob) -> Result<Job, PlatformError>;

    fn get_current_user(&self) -> Result<User, PlatformError>;

    fn get_user(&self, user_id: &str) -> Result<User, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_accepts_numeric_and_string_ids() {
        let job: Job = serde_json::from_value(json!({
            "id": "job-1",
            "status": "RUNNING",
            "progress": 30,
            "inputEntities": [101, "102"],
            "params": { "pluginAuthorId": 7 }
        }))
        .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.input_entities, vec!["101", "102"]);
        assert!(job.output_entities.is_empty());
        assert_eq!(job.param_str(PLUGIN_AUTHOR_PARAM).as_deref(), Some("7"));
    }

    #[test]
    fn test_entity_parses_wire_shape() {
        let entity: Entity = serde_json::from_value(json!({
            "id": 5,
            "name": "forward.fq",
            "ownerId": "project-3",
            "type": "SEQUENCE_DOCUMENT"
        }))
        .unwrap();
        assert_eq!(entity.id, "5");
        assert_eq!(entity.owner_id, "project-3");
        assert_eq!(entity.parent_id, None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_column_serializes_type_tag() {
        let text = serde_json::to_string(&Column::integer("id")).unwrap();
        assert_eq!(text, r#"{"name":"id","type":"INTEGER"}"#);
    }
}

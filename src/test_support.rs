//! In-memory platform used by the unit tests.

use crate::error::PlatformError;
use crate::platform::{
    Column, Entity, EntityId, Job, JobStatus, JobStatusUpdate, NewDocument, NewJob, Platform,
    User,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetEntity(String),
    DownloadTabular(String),
    CreateDocument(String),
    UploadChunk(String),
    FinalizeUpload(String, usize),
    GetJob(String),
    UpdateJobStatus(JobStatusUpdate),
    CompleteJob(Vec<String>, Vec<EntityId>),
    CreateJob(String),
    GetCurrentUser,
    GetUser(String),
}

#[derive(Default)]
pub struct FakePlatform {
    pub entities: RefCell<HashMap<String, Entity>>,
    pub tabular: RefCell<HashMap<String, Vec<u8>>>,
    pub jobs: RefCell<HashMap<String, Job>>,
    /// Statuses handed out by successive `get_job` calls before falling back
    /// to the stored job's status.
    pub status_script: RefCell<VecDeque<JobStatus>>,
    pub users: RefCell<HashMap<String, User>>,
    pub current_user: RefCell<Option<User>>,
    pub uploads: RefCell<HashMap<String, Vec<Vec<u8>>>>,
    pub calls: RefCell<Vec<Call>>,
    pub fail_downloads: Cell<bool>,
    next_id: Cell<u32>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(self, id: &str, name: &str, owner_id: &str) -> Self {
        self.entities.borrow_mut().insert(
            id.to_string(),
            Entity {
                id: id.to_string(),
                name: name.to_string(),
                owner_id: owner_id.to_string(),
                entity_type: crate::platform::SEQUENCE_DOCUMENT.to_string(),
                parent_id: None,
                visible: Some(true),
            },
        );
        self
    }

    pub fn with_tabular(self, id: &str, tsv: &str) -> Self {
        self.tabular
            .borrow_mut()
            .insert(id.to_string(), tsv.as_bytes().to_vec());
        self
    }

    pub fn with_job(self, job: Job) -> Self {
        self.jobs.borrow_mut().insert(job.id.clone(), job);
        self
    }

    pub fn with_user(self, user: User) -> Self {
        self.users.borrow_mut().insert(user.id.clone(), user);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| predicate(c)).count()
    }

    pub fn status_updates(&self) -> Vec<JobStatusUpdate> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::UpdateJobStatus(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated data rows of every chunk sent for `document_id`,
    /// without the per-chunk header line.
    pub fn uploaded_rows(&self, document_id: &str) -> Vec<String> {
        self.uploads
            .borrow()
            .get(document_id)
            .map(|chunks| {
                chunks
                    .iter()
                    .flat_map(|chunk| {
                        String::from_utf8_lossy(chunk)
                            .lines()
                            .skip(1)
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn next_id(&self) -> String {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        format!("doc-{id}")
    }

    fn missing(what: &str, id: &str) -> PlatformError {
        PlatformError::Api {
            status: 404,
            body: format!("{what} '{id}' not found"),
        }
    }
}

impl Platform for FakePlatform {
    fn get_entity(&self, entity_id: &str) -> Result<Entity, PlatformError> {
        self.record(Call::GetEntity(entity_id.to_string()));
        self.entities
            .borrow()
            .get(entity_id)
            .cloned()
            .ok_or_else(|| Self::missing("entity", entity_id))
    }

    fn download_tabular(&self, entity_id: &str, destination: &Path) -> Result<(), PlatformError> {
        self.record(Call::DownloadTabular(entity_id.to_string()));
        if self.fail_downloads.get() {
            return Err(PlatformError::Other("export service unavailable".to_string()));
        }
        let data = self
            .tabular
            .borrow()
            .get(entity_id)
            .cloned()
            .ok_or_else(|| Self::missing("tabular export", entity_id))?;
        std::fs::write(destination, data)?;
        Ok(())
    }

    fn create_document(&self, document: &NewDocument) -> Result<Entity, PlatformError> {
        self.record(Call::CreateDocument(document.name.clone()));
        let entity = Entity {
            id: self.next_id(),
            name: document.name.clone(),
            owner_id: document.owner_id.clone(),
            entity_type: document.entity_type.clone(),
            parent_id: document.parent_id.clone(),
            visible: Some(document.visible),
        };
        self.entities
            .borrow_mut()
            .insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    fn upload_chunk(
        &self,
        document_id: &str,
        _schema: &[Column],
        payload: &[u8],
    ) -> Result<(), PlatformError> {
        self.record(Call::UploadChunk(document_id.to_string()));
        self.uploads
            .borrow_mut()
            .entry(document_id.to_string())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }

    fn finalize_upload(
        &self,
        document_id: &str,
        row_count: usize,
    ) -> Result<Entity, PlatformError> {
        self.record(Call::FinalizeUpload(document_id.to_string(), row_count));
        let mut entities = self.entities.borrow_mut();
        let entity = entities
            .get_mut(document_id)
            .ok_or_else(|| Self::missing("document", document_id))?;
        entity.visible = Some(true);
        Ok(entity.clone())
    }

    fn get_job(&self, job_id: &str) -> Result<Job, PlatformError> {
        self.record(Call::GetJob(job_id.to_string()));
        let mut job = self
            .jobs
            .borrow()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Self::missing("job", job_id))?;
        if let Some(status) = self.status_script.borrow_mut().pop_front() {
            job.status = status;
        }
        Ok(job)
    }

    fn update_job_status(
        &self,
        job_id: &str,
        update: &JobStatusUpdate,
    ) -> Result<(), PlatformError> {
        self.record(Call::UpdateJobStatus(update.clone()));
        if let Some(job) = self.jobs.borrow_mut().get_mut(job_id) {
            job.status = update.status;
            job.progress = update.progress;
            job.messages.extend(update.messages.iter().cloned());
        }
        Ok(())
    }

    fn complete_job(
        &self,
        job_id: &str,
        messages: &[String],
        output_entity_ids: &[EntityId],
    ) -> Result<(), PlatformError> {
        self.record(Call::CompleteJob(
            messages.to_vec(),
            output_entity_ids.to_vec(),
        ));
        if let Some(job) = self.jobs.borrow_mut().get_mut(job_id) {
            job.status = JobStatus::Complete;
            job.progress = 100;
            job.messages.extend(messages.iter().cloned());
            job.output_entities = output_entity_ids.to_vec();
        }
        Ok(())
    }

    fn create_job(&self, job: &NewJob) -> Result<Job, PlatformError> {
        self.record(Call::CreateJob(job.job_type.clone()));
        let created = Job {
            id: format!("job-{}", self.next_id()),
            name: Some(job.name.clone()),
            job_type: Some(job.job_type.clone()),
            owner_id: Some(job.owner_id.clone()),
            input_entities: job.input_entities.clone(),
            params: job.params.clone(),
            ..Default::default()
        };
        self.jobs
            .borrow_mut()
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    fn get_current_user(&self) -> Result<User, PlatformError> {
        self.record(Call::GetCurrentUser);
        self.current_user
            .borrow()
            .clone()
            .ok_or_else(|| PlatformError::Api {
                status: 401,
                body: "not authenticated".to_string(),
            })
    }

    fn get_user(&self, user_id: &str) -> Result<User, PlatformError> {
        self.record(Call::GetUser(user_id.to_string()));
        self.users
            .borrow()
            .get(user_id)
            .cloned()
            .ok_or_else(|| Self::missing("user", user_id))
    }
}

/// Writes an executable `/bin/sh` script standing in for an external tool.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

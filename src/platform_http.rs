//! Blocking HTTP client for the platform API.

use crate::error::PlatformError;
use crate::job_waiter::{self, WaitOptions};
use crate::platform::{
    Column, EXPORT_JOB, Entity, EntityId, Job, JobStatus, JobStatusUpdate, NewDocument, NewJob,
    Platform, User,
};
use flate2::read::GzDecoder;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const API_PREFIX: &str = "api/v2";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct HttpPlatform {
    client: Client,
    base_url: String,
    api_key: String,
    wait: WaitOptions,
}

impl HttpPlatform {
    pub fn new(base_url: &str, api_key: &str, wait: WaitOptions) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .user_agent(concat!("trinity-plugin/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            wait,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{API_PREFIX}/{}",
            self.base_url,
            path.trim_start_matches('/')
        )
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, PlatformError> {
        let response = request.bearer_auth(&self.api_key).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PlatformError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
        let text = response.text()?;
        Ok(serde_json::from_str(&text)?)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        Self::decode(self.send(self.client.get(self.url(path)))?)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PlatformError> {
        Self::decode(self.send(self.client.post(self.url(path)).json(body))?)
    }

    fn patch_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), PlatformError> {
        self.send(self.client.patch(self.url(path)).json(body))?;
        Ok(())
    }

    /// Runs a server-side export of `entity_id` and waits for it to finish.
    fn export_tabular(&self, entity_id: &str) -> Result<Job, PlatformError> {
        let entity = self.get_entity(entity_id)?;
        let mut params = serde_json::Map::new();
        params.insert("format".to_string(), json!("TSV"));
        let export = self.create_job(&NewJob {
            owner_id: entity.owner_id.clone(),
            name: format!("Export {}", entity.name),
            job_type: EXPORT_JOB.to_string(),
            input_entities: vec![entity_id.to_string()],
            params,
            client_side: false,
        })?;
        info!(entity_id, export_job = %export.id, "Waiting for export");

        let finished = job_waiter::await_completion(self, &export.id, &self.wait)
            .map_err(|e| PlatformError::Other(e.message))?;
        if finished.status == JobStatus::Failed {
            return Err(PlatformError::Other(format!(
                "Export job {} failed: {}",
                finished.id,
                finished.messages.join("; ")
            )));
        }
        Ok(finished)
    }
}

pub fn is_gzip(prefix: &[u8]) -> bool {
    prefix.starts_with(&GZIP_MAGIC)
}

/// Copies an export body into `destination` through a `.part` file,
/// decompressing it first when it is gzip encoded.
pub fn write_export<R: Read>(source: R, destination: &Path) -> Result<u64, PlatformError> {
    let mut tmp_os: OsString = destination.as_os_str().to_os_string();
    tmp_os.push(".part");
    let tmp_path = PathBuf::from(tmp_os);

    let mut reader = BufReader::new(source);
    let compressed = is_gzip(reader.fill_buf()?);
    let mut writer = BufWriter::new(File::create(&tmp_path)?);

    let copied = if compressed {
        std::io::copy(&mut GzDecoder::new(reader), &mut writer)
    } else {
        std::io::copy(&mut reader, &mut writer)
    };
    let written = match copied.and_then(|n| writer.flush().map(|_| n)) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
    };
    fs::rename(&tmp_path, destination)?;
    debug!(path = %destination.display(), bytes = written, compressed, "Wrote export");
    Ok(written)
}

impl Platform for HttpPlatform {
    fn get_entity(&self, entity_id: &str) -> Result<Entity, PlatformError> {
        self.get_json(&format!("entities/{entity_id}"))
    }

    fn download_tabular(&self, entity_id: &str, destination: &Path) -> Result<(), PlatformError> {
        let export = self.export_tabular(entity_id)?;
        let response =
            self.send(self.client.get(self.url(&format!("jobs/{}/outputs/result", export.id))))?;
        write_export(response, destination)?;
        Ok(())
    }

    fn create_document(&self, document: &NewDocument) -> Result<Entity, PlatformError> {
        self.post_json("entities", document)
    }

    fn upload_chunk(
        &self,
        document_id: &str,
        schema: &[Column],
        payload: &[u8],
    ) -> Result<(), PlatformError> {
        let schema = serde_json::to_string(schema)?;
        let request = self
            .client
            .post(self.url(&format!("entities/{document_id}/upload")))
            .query(&[("schema", schema)])
            .header(reqwest::header::CONTENT_TYPE, "text/tab-separated-values")
            .body(payload.to_vec());
        self.send(request)?;
        Ok(())
    }

    fn finalize_upload(
        &self,
        document_id: &str,
        row_count: usize,
    ) -> Result<Entity, PlatformError> {
        self.post_json(
            &format!("entities/{document_id}/upload/complete"),
            &json!({ "rowCount": row_count }),
        )
    }

    fn get_job(&self, job_id: &str) -> Result<Job, PlatformError> {
        self.get_json(&format!("jobs/{job_id}"))
    }

    fn update_job_status(
        &self,
        job_id: &str,
        update: &JobStatusUpdate,
    ) -> Result<(), PlatformError> {
        self.patch_json(&format!("jobs/{job_id}"), update)
    }

    fn complete_job(
        &self,
        job_id: &str,
        messages: &[String],
        output_entity_ids: &[EntityId],
    ) -> Result<(), PlatformError> {
        self.patch_json(
            &format!("jobs/{job_id}"),
            &json!({
                "status": JobStatus::Complete,
                "progress": 100,
                "messages": messages,
                "outputEntities": output_entity_ids,
            }),
        )
    }

    fn create_job(&self, job: &NewJob) -> Result<Job, PlatformError> {
        self.post_json("jobs", job)
    }

    fn get_current_user(&self) -> Result<User, PlatformError> {
        self.get_json("me")
    }

    fn get_user(&self, user_id: &str) -> Result<User, PlatformError> {
        self.get_json(&format!("users/{user_id}"))
    }
}

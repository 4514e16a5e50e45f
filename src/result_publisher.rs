//! Uploads the assembled transcripts as a new sequence document.

use crate::error::JobError;
use crate::platform::{Column, Entity, NewDocument, Platform, SEQUENCE_DOCUMENT};
use bio::io::fasta;
use csv::WriterBuilder;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Upper bound of one upload payload.
pub const UPLOAD_CHUNK_BYTES: usize = 100 * 1000 * 1000;

pub fn output_schema() -> Vec<Column> {
    vec![
        Column::integer("id"),
        Column::string("name"),
        Column::string("sequence"),
    ]
}

#[derive(Debug, Clone)]
pub struct PublishedDocument {
    pub entity: Entity,
    pub row_count: usize,
}

/// A schema-bound upload that batches TSV rows into payloads of at most
/// `chunk_bytes` (a single oversized row still goes out on its own).
pub struct ChunkedUpload<'a> {
    platform: &'a dyn Platform,
    document_id: String,
    schema: Vec<Column>,
    header: Vec<u8>,
    buffer: Vec<u8>,
    chunk_bytes: usize,
    rows: usize,
    chunks_sent: usize,
}

impl<'a> ChunkedUpload<'a> {
    pub fn open(
        platform: &'a dyn Platform,
        document_id: &str,
        schema: Vec<Column>,
        chunk_bytes: usize,
    ) -> Self {
        let names: Vec<&str> = schema.iter().map(|c| c.name.as_str()).collect();
        let header = format!("{}\n", names.join("\t")).into_bytes();
        Self {
            platform,
            document_id: document_id.to_string(),
            schema,
            header,
            buffer: Vec::new(),
            chunk_bytes,
            rows: 0,
            chunks_sent: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write_row(&mut self, values: &[&str]) -> Result<(), JobError> {
        if values.len() != self.schema.len() {
            return Err(JobError::unexpected(format!(
                "Upload row has {} values but the schema has {} columns",
                values.len(),
                self.schema.len()
            )));
        }
        let row = encode_row(values)?;
        let pending = self.header.len() + self.buffer.len();
        if !self.buffer.is_empty() && pending + row.len() > self.chunk_bytes {
            self.flush()?;
        }
        self.buffer.extend_from_slice(&row);
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), JobError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(self.header.len() + self.buffer.len());
        payload.extend_from_slice(&self.header);
        payload.append(&mut self.buffer);
        self.platform
            .upload_chunk(&self.document_id, &self.schema, &payload)?;
        self.chunks_sent += 1;
        debug!(
            document_id = %self.document_id,
            chunk = self.chunks_sent,
            bytes = payload.len(),
            "Uploaded chunk"
        );
        Ok(())
    }

    /// Sends the remaining rows and makes the document visible. An upload
    /// without rows fails and leaves the document hidden.
    pub fn finish(mut self) -> Result<Entity, JobError> {
        if self.rows == 0 {
            return Err(JobError::empty_result(
                "Trinity did not assemble any sequences.",
            ));
        }
        self.flush()?;
        let entity = self.platform.finalize_upload(&self.document_id, self.rows)?;
        Ok(entity)
    }
}

fn encode_row(values: &[&str]) -> Result<Vec<u8>, JobError> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(vec![]);
    wtr.write_record(values)?;
    wtr.into_inner()
        .map_err(|e| JobError::unexpected(format!("Could not encode upload row: {e}")))
}

pub fn publish(
    platform: &dyn Platform,
    result_path: &Path,
    project_id: &str,
    folder_id: Option<&str>,
    name: &str,
) -> Result<PublishedDocument, JobError> {
    publish_with_chunk_size(
        platform,
        result_path,
        project_id,
        folder_id,
        name,
        UPLOAD_CHUNK_BYTES,
    )
}

pub fn publish_with_chunk_size(
    platform: &dyn Platform,
    result_path: &Path,
    project_id: &str,
    folder_id: Option<&str>,
    name: &str,
    chunk_bytes: usize,
) -> Result<PublishedDocument, JobError> {
    let document = platform.create_document(&NewDocument {
        owner_id: project_id.to_string(),
        parent_id: folder_id.map(str::to_string),
        name: name.to_string(),
        entity_type: SEQUENCE_DOCUMENT.to_string(),
        visible: false,
    })?;
    info!(document_id = %document.id, name, "Created output document");

    let mut upload = ChunkedUpload::open(platform, &document.id, output_schema(), chunk_bytes);
    let reader = fasta::Reader::new(File::open(result_path)?);
    for result in reader.records() {
        let record = result?;
        let ordinal = (upload.rows() + 1).to_string();
        let sequence = String::from_utf8_lossy(record.seq());
        upload.write_row(&[&ordinal, record.id(), &sequence])?;
    }
    let row_count = upload.rows();
    let entity = upload.finish()?;
    info!(document_id = %entity.id, row_count, "Published assembly");

    Ok(PublishedDocument { entity, row_count })
}

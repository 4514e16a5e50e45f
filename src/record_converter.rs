//! Turns a downloaded tabular sequence document into the FASTQ file Trinity
//! reads.

use crate::config::JobConfig;
use crate::error::JobError;
use crate::platform::Platform;
use bio::io::fastq;
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One row of a tabular sequence document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// `{entityId}##{ordinal}`, unique across every document of a job.
    pub key: String,
    pub id: String,
    pub name: String,
    pub description: String,
    pub sequence: String,
    pub quality: String,
}

impl SequenceRecord {
    pub fn fastq_header(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedReads {
    pub entity_id: String,
    pub path: PathBuf,
    pub record_count: usize,
}

pub fn tabular_path(config: &JobConfig, entity_id: &str) -> PathBuf {
    config.tabular_dir.join(format!("{entity_id}.tsv"))
}

pub fn reads_path(config: &JobConfig, entity_id: &str) -> PathBuf {
    config.reads_dir.join(format!("{entity_id}.fq"))
}

/// Downloads `entity_id` and converts it to `{reads_dir}/{entity_id}.fq`.
pub fn materialize(
    platform: &dyn Platform,
    config: &JobConfig,
    entity_id: &str,
) -> Result<MaterializedReads, JobError> {
    let tabular = tabular_path(config, entity_id);
    let destination = reads_path(config, entity_id);
    for dir in [&config.tabular_dir, &config.reads_dir] {
        fs::create_dir_all(dir)?;
    }

    info!(entity_id, path = %tabular.display(), "Downloading tabular records");
    platform.download_tabular(entity_id, &tabular)?;

    let record_count = convert_tabular_to_fastq(entity_id, &tabular, &destination)?;
    info!(
        entity_id,
        record_count,
        path = %destination.display(),
        "Wrote FASTQ reads"
    );
    Ok(MaterializedReads {
        entity_id: entity_id.to_string(),
        path: destination,
        record_count,
    })
}

/// Converts row by row into a `.part` file that only replaces `destination`
/// once every row converted. A stale `destination` is removed up front.
pub fn convert_tabular_to_fastq(
    entity_id: &str,
    tabular: &Path,
    destination: &Path,
) -> Result<usize, JobError> {
    if destination.exists() {
        fs::remove_file(destination)?;
    }
    let mut tmp_os: OsString = destination.as_os_str().to_os_string();
    tmp_os.push(".part");
    let tmp_path = PathBuf::from(tmp_os);

    let written = write_fastq(entity_id, tabular, &tmp_path);
    match written {
        Ok(count) => {
            fs::rename(&tmp_path, destination)?;
            Ok(count)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn write_fastq(entity_id: &str, tabular: &Path, out_path: &Path) -> Result<usize, JobError> {
    let mut writer = fastq::Writer::to_file(out_path)?;
    let count = for_each_record(entity_id, tabular, |record| {
        writer.write(
            &record.name,
            Some(&record.description),
            record.sequence.as_bytes(),
            record.quality.as_bytes(),
        )?;
        Ok(())
    })?;
    writer.flush()?;
    Ok(count)
}

/// Parses every row of a downloaded tabular file.
pub fn read_sequence_records(
    entity_id: &str,
    tabular: &Path,
) -> Result<Vec<SequenceRecord>, JobError> {
    let mut records = vec![];
    for_each_record(entity_id, tabular, |record| {
        records.push(record);
        Ok(())
    })?;
    Ok(records)
}

/// Drops NUL bytes; corrupted exports occasionally contain them.
struct NulStrippingReader<R> {
    inner: R,
}

impl<R: Read> Read for NulStrippingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                if buf[i] != 0 {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

struct ColumnIndex {
    id: Option<usize>,
    name: Option<usize>,
    description: Option<usize>,
    sequence: Option<usize>,
    quality: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        Self {
            id: find("id"),
            name: find("name"),
            description: find("description"),
            sequence: find("sequence"),
            quality: find("quality"),
        }
    }
}

/// Only a missing `id` is reported to the user as a malformed record; any
/// other missing column is an unexpected export shape.
fn field(
    record: &StringRecord,
    column: Option<usize>,
    column_name: &str,
    entity_id: &str,
    row_no: usize,
) -> Result<String, JobError> {
    column
        .and_then(|idx| record.get(idx))
        .map(str::to_string)
        .ok_or_else(|| {
            let message =
                format!("Row {row_no} of document {entity_id} has no '{column_name}' field.");
            if column_name == "id" {
                JobError::malformed_record(message)
            } else {
                JobError::unexpected(message)
            }
        })
}

fn for_each_record<F>(entity_id: &str, tabular: &Path, mut on_record: F) -> Result<usize, JobError>
where
    F: FnMut(SequenceRecord) -> Result<(), JobError>,
{
    let file = File::open(tabular)?;
    let reader = NulStrippingReader {
        inner: BufReader::new(file),
    };
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let columns = ColumnIndex::from_headers(rdr.headers()?);

    let mut count = 0;
    for result in rdr.records() {
        let row = result?;
        let row_no = count + 1;
        let id = field(&row, columns.id, "id", entity_id, row_no)?;
        let record = SequenceRecord {
            key: format!("{entity_id}##{count}"),
            id,
            name: field(&row, columns.name, "name", entity_id, row_no)?,
            description: field(&row, columns.description, "description", entity_id, row_no)?,
            sequence: field(&row, columns.sequence, "sequence", entity_id, row_no)?,
            quality: field(&row, columns.quality, "quality", entity_id, row_no)?,
        };
        on_record(record)?;
        count += 1;
    }
    debug!(entity_id, count, "Parsed tabular records");
    Ok(count)
}

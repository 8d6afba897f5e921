//! The job progress record and its field-per-entry storage form.
//!
//! Everything above the store works with [`JobProgressRecord`] and
//! [`RecordUpdate`]. Conversion to and from string fields happens only here.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecordError, StoreError};
use crate::job::Job;
use crate::stages::Stage;

/// Persisted field names.
pub mod field {
    pub const STATUS: &str = "status";
    pub const PROGRESS: &str = "progress";
    pub const TOTAL_FILES: &str = "total_files";
    pub const DONE_FILES: &str = "done_files";
    pub const MESSAGE: &str = "message";
    pub const RESULT_INDEX: &str = "result_index";
    pub const ERRORS: &str = "errors";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const OUTPUT_DIR: &str = "output_dir";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job ended, derived from status and the error list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Pending,
    Succeeded,
    /// Status is `done` but at least one file failed.
    Partial,
    Failed,
}

/// One successfully processed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub video: String,
    pub docx_path: String,
}

/// One file whose pipeline failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub video: String,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgressRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub total_files: u32,
    pub done_files: u32,
    pub message: String,
    pub result_index: Vec<ResultEntry>,
    pub errors: Vec<FileError>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub output_dir: PathBuf,
}

impl JobProgressRecord {
    /// The record written at submission time.
    pub fn queued(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id.clone(),
            status: JobStatus::Queued,
            progress: 0,
            total_files: job.total_files() as u32,
            done_files: 0,
            message: "Queued".to_string(),
            result_index: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: None,
            output_dir: job.output_directory.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn completion(&self) -> Completion {
        match self.status {
            JobStatus::Queued | JobStatus::Running => Completion::Pending,
            JobStatus::Failed => Completion::Failed,
            JobStatus::Done if self.errors.is_empty() => Completion::Succeeded,
            JobStatus::Done => Completion::Partial,
        }
    }

    pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>, StoreError> {
        let mut fields = vec![
            (field::STATUS, self.status.as_str().to_string()),
            (field::PROGRESS, self.progress.to_string()),
            (field::TOTAL_FILES, self.total_files.to_string()),
            (field::DONE_FILES, self.done_files.to_string()),
            (field::MESSAGE, self.message.clone()),
            (field::RESULT_INDEX, encode(field::RESULT_INDEX, &self.result_index)?),
            (field::ERRORS, encode(field::ERRORS, &self.errors)?),
            (field::CREATED_AT, self.created_at.to_rfc3339()),
            (
                field::OUTPUT_DIR,
                self.output_dir.to_string_lossy().to_string(),
            ),
        ];
        if let Some(updated_at) = self.updated_at {
            fields.push((field::UPDATED_AT, updated_at.to_rfc3339()));
        }
        Ok(fields)
    }

    pub fn from_fields(
        job_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<Self, RecordError> {
        let get = |name: &'static str| required(fields, job_id, name);
        let invalid = |name: &'static str, value: &str| RecordError::InvalidField {
            job_id: job_id.to_string(),
            field: name,
            value: value.to_string(),
        };

        let status_raw = get(field::STATUS)?;
        let status = JobStatus::parse(status_raw).ok_or_else(|| invalid(field::STATUS, status_raw))?;

        let progress_raw = get(field::PROGRESS)?;
        let progress = progress_raw
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| invalid(field::PROGRESS, progress_raw))?;

        let total_raw = get(field::TOTAL_FILES)?;
        let total_files = total_raw
            .parse::<u32>()
            .map_err(|_| invalid(field::TOTAL_FILES, total_raw))?;

        let done_raw = get(field::DONE_FILES)?;
        let done_files = done_raw
            .parse::<u32>()
            .map_err(|_| invalid(field::DONE_FILES, done_raw))?;

        let results_raw = get(field::RESULT_INDEX)?;
        let result_index: Vec<ResultEntry> =
            serde_json::from_str(results_raw).map_err(|_| invalid(field::RESULT_INDEX, results_raw))?;

        // Records written before the error list existed carry no `errors` field.
        let errors: Vec<FileError> = match fields.get(field::ERRORS) {
            Some(raw) => serde_json::from_str(raw).map_err(|_| invalid(field::ERRORS, raw))?,
            None => Vec::new(),
        };

        let created_raw = get(field::CREATED_AT)?;
        let created_at =
            parse_timestamp(created_raw).ok_or_else(|| invalid(field::CREATED_AT, created_raw))?;
        let updated_at = fields.get(field::UPDATED_AT).and_then(|s| parse_timestamp(s));

        Ok(Self {
            job_id: job_id.to_string(),
            status,
            progress,
            total_files,
            done_files,
            message: fields.get(field::MESSAGE).cloned().unwrap_or_default(),
            result_index,
            errors,
            created_at,
            updated_at,
            output_dir: PathBuf::from(get(field::OUTPUT_DIR)?),
        })
    }
}

/// A partial update: only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub done_files: Option<u32>,
    pub message: Option<String>,
    pub result_index: Option<Vec<ResultEntry>>,
    pub errors: Option<Vec<FileError>>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn done_files(mut self, done_files: u32) -> Self {
        self.done_files = Some(done_files);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn result_index(mut self, result_index: Vec<ResultEntry>) -> Self {
        self.result_index = Some(result_index);
        self
    }

    pub fn errors(mut self, errors: Vec<FileError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>, StoreError> {
        let mut fields = Vec::new();
        if let Some(status) = self.status {
            fields.push((field::STATUS, status.as_str().to_string()));
        }
        if let Some(progress) = self.progress {
            fields.push((field::PROGRESS, progress.to_string()));
        }
        if let Some(done_files) = self.done_files {
            fields.push((field::DONE_FILES, done_files.to_string()));
        }
        if let Some(ref message) = self.message {
            fields.push((field::MESSAGE, message.clone()));
        }
        if let Some(ref result_index) = self.result_index {
            fields.push((field::RESULT_INDEX, encode(field::RESULT_INDEX, result_index)?));
        }
        if let Some(ref errors) = self.errors {
            fields.push((field::ERRORS, encode(field::ERRORS, errors)?));
        }
        Ok(fields)
    }
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    job_id: &str,
    name: &'static str,
) -> Result<&'a str, RecordError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| RecordError::MissingField {
            job_id: job_id.to_string(),
            field: name,
        })
}

fn encode<T: Serialize>(name: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode {
        field: name,
        source,
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobParameters;

    fn sample_job() -> Job {
        Job {
            id: "job-1".to_string(),
            input_files: vec![PathBuf::from("/up/a.mp4"), PathBuf::from("/up/b.mp4")],
            output_directory: PathBuf::from("/out/job-1"),
            parameters: JobParameters::default(),
        }
    }

    fn as_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_queued_record_defaults() {
        let record = JobProgressRecord::queued(&sample_job(), Utc::now());
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 0);
        assert_eq!(record.total_files, 2);
        assert_eq!(record.done_files, 0);
        assert!(record.result_index.is_empty());
        assert_eq!(record.completion(), Completion::Pending);
    }

    #[test]
    fn test_fields_use_wire_names_and_json_arrays() {
        let mut record = JobProgressRecord::queued(&sample_job(), Utc::now());
        record.result_index.push(ResultEntry {
            video: "a.mp4".to_string(),
            docx_path: "/out/job-1/a.mp4.docx".to_string(),
        });
        let fields = as_map(record.to_fields().unwrap());

        assert_eq!(fields["status"], "queued");
        assert_eq!(fields["progress"], "0");
        assert_eq!(fields["total_files"], "2");
        assert_eq!(
            fields["result_index"],
            r#"[{"video":"a.mp4","docx_path":"/out/job-1/a.mp4.docx"}]"#
        );
        assert_eq!(fields["errors"], "[]");
        assert_eq!(fields["output_dir"], "/out/job-1");

        let decoded = JobProgressRecord::from_fields("job-1", &fields).unwrap();
        assert_eq!(decoded.result_index, record.result_index);
    }

    #[test]
    fn test_missing_errors_field_defaults_to_empty() {
        let record = JobProgressRecord::queued(&sample_job(), Utc::now());
        let mut fields = as_map(record.to_fields().unwrap());
        fields.remove("errors");
        let decoded = JobProgressRecord::from_fields("job-1", &fields).unwrap();
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn test_invalid_progress_is_rejected() {
        let record = JobProgressRecord::queued(&sample_job(), Utc::now());
        let mut fields = as_map(record.to_fields().unwrap());
        fields.insert("progress".to_string(), "140".to_string());
        match JobProgressRecord::from_fields("job-1", &fields) {
            Err(RecordError::InvalidField { field, value, .. }) => {
                assert_eq!(field, "progress");
                assert_eq!(value, "140");
            }
            other => panic!("expected InvalidField, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_status_is_reported() {
        let record = JobProgressRecord::queued(&sample_job(), Utc::now());
        let mut fields = as_map(record.to_fields().unwrap());
        fields.remove("status");
        assert!(matches!(
            JobProgressRecord::from_fields("job-1", &fields),
            Err(RecordError::MissingField { field: "status", .. })
        ));
    }

    #[test]
    fn test_update_only_emits_provided_fields() {
        let update = RecordUpdate::new().progress(40).message("Transcribed a.mp4");
        let fields = as_map(update.to_fields().unwrap());
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["progress"], "40");
        assert_eq!(fields["message"], "Transcribed a.mp4");
        assert!(RecordUpdate::new().is_empty());
    }

    #[test]
    fn test_update_progress_is_capped() {
        assert_eq!(RecordUpdate::new().progress(250).progress, Some(100));
    }

    #[test]
    fn test_completion_distinguishes_partial_success() {
        let mut record = JobProgressRecord::queued(&sample_job(), Utc::now());
        record.status = JobStatus::Done;
        assert_eq!(record.completion(), Completion::Succeeded);

        record.errors.push(FileError {
            video: "b.mp4".to_string(),
            stage: Stage::ExtractAudio,
            message: "ffmpeg exited with 1".to_string(),
        });
        assert_eq!(record.completion(), Completion::Partial);

        record.status = JobStatus::Failed;
        assert_eq!(record.completion(), Completion::Failed);
    }

    #[test]
    fn test_status_parse() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("processing"), None);
    }
}

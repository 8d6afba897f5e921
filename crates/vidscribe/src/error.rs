use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidscribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Submit error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] crate::pipeline::CoordinatorError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failure of a single external stage for a single file (or frame).
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Invalid stage input: {0}")]
    InvalidInput(String),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Expected output is missing: {0}")]
    MissingOutput(PathBuf),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Model protocol error: {0}")]
    Protocol(String),

    #[error("Rendering failed: {0}")]
    Render(String),
}

/// A persisted job record that cannot be decoded into its typed form.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Job record '{job_id}' is missing field '{field}'")]
    MissingField { job_id: String, field: &'static str },

    #[error("Job record '{job_id}' has invalid {field} '{value}'")]
    InvalidField {
        job_id: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Failed to encode field '{field}': {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job store lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Invalid queue payload for job '{job_id}': {source}")]
    Payload {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Work queue lock poisoned")]
    LockPoisoned,
}

/// Input rejected before a job is enqueued.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("No input files were supplied")]
    NoInputFiles,

    #[error("Frame interval must be a positive number of seconds, got {0}")]
    InvalidFrameInterval(i64),

    #[error("Input file '{path}' is not readable: {source}")]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input path '{0}' is not a regular file")]
    NotAFile(PathBuf),

    #[error("Failed to create output directory '{path}': {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Errors returned to status and download callers.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid result index {index}: job has {len} result(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Artifact not found on disk: {0}")]
    ArtifactMissing(PathBuf),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, VidscribeError>;

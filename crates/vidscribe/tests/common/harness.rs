//! Test harness for isolated coordinator and worker runs.
//!
//! Each harness owns a temp directory with `input/` and `output/`
//! subdirectories and an in-memory state store that snapshots every write.

#![allow(dead_code)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vidscribe::job::{Job, JobParameters, JobProgressRecord};
use vidscribe::pipeline::{
    Coordinator, CoordinatorError, CoordinatorSettings, ProgressReporter, RunSummary,
};
use vidscribe::stages::StageSet;
use vidscribe::store::JobStateStore;

use super::fakes::SnapshotStore;

pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_root: PathBuf,
    pub store: Arc<SnapshotStore>,
    pub settings: CoordinatorSettings,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        let output_root = temp_dir.path().join("output");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&output_root).expect("Failed to create output dir");

        Self {
            temp_dir,
            input_dir,
            output_root,
            store: Arc::new(SnapshotStore::default()),
            settings: CoordinatorSettings::default(),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes placeholder input files; the scripted adapters never decode them.
    pub fn write_videos(&self, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = self.input_dir.join(name);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).expect("Failed to create input subdir");
                }
                std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").expect("Failed to write video");
                path
            })
            .collect()
    }

    /// A job over freshly written inputs with its record initialized.
    pub fn submit(&self, id: &str, names: &[&str]) -> Job {
        let job = Job {
            id: id.to_string(),
            input_files: self.write_videos(names),
            output_directory: self.output_root.join(id),
            parameters: JobParameters {
                frame_interval: 2,
                timeout: Duration::from_secs(60),
            },
        };
        std::fs::create_dir_all(&job.output_directory).expect("Failed to create job dir");
        self.store.initialize(&job).expect("Failed to initialize record");
        job
    }

    pub fn coordinator(&self, stages: StageSet) -> Coordinator {
        Coordinator::new(self.store.clone(), stages, self.settings.clone())
    }

    pub fn run(
        &self,
        stages: StageSet,
        job: &Job,
        progress: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<RunSummary, CoordinatorError> {
        self.coordinator(stages).run(job, progress, cancel)
    }

    pub fn record(&self, job_id: &str) -> JobProgressRecord {
        self.store
            .read(job_id)
            .expect("Failed to read record")
            .expect("Record is missing")
    }
}

/// Contents of `word/document.xml` inside a rendered DOCX.
pub fn document_xml(docx: &Path) -> String {
    let file = std::fs::File::open(docx).expect("Failed to open docx");
    let mut archive = zip::ZipArchive::new(file).expect("Not a zip archive");
    let mut entry = archive
        .by_name("word/document.xml")
        .expect("Missing word/document.xml");
    let mut xml = String::new();
    entry.read_to_string(&mut xml).expect("Invalid UTF-8");
    xml
}

//! Evidence artifacts for a completed run.
//!
//! Each run writes two files under `<root>/<run_id>/`: `run_manifest.json`
//! with the summary, and `evidence.jsonl` with one summary line followed by
//! one line per test result. Files are written atomically (temp file plus
//! rename) so a crashed writer never leaves a half-formed artifact behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::registry::RunReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedArtifacts {
    pub run_manifest_path: PathBuf,
    pub evidence_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EvidenceWriter {
    root: PathBuf,
}

#[derive(Debug, Serialize)]
struct RunManifest<'a> {
    run_id: &'a str,
    env_fingerprint: &'a str,
    total: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
    timed_out: usize,
    fatal: bool,
}

impl EvidenceWriter {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collect(&self, report: &RunReport) -> io::Result<CollectedArtifacts> {
        let run_root = self.root.join(&report.run_id);
        fs::create_dir_all(&run_root)?;

        let manifest = RunManifest {
            run_id: &report.run_id,
            env_fingerprint: &report.env_fingerprint,
            total: report.summary.total,
            passed: report.summary.passed,
            failed: report.summary.failed,
            skipped: report.summary.skipped,
            timed_out: report.summary.timed_out,
            fatal: report.summary.fatal,
        };
        let run_manifest_path = run_root.join("run_manifest.json");
        write_atomic(&run_manifest_path, &json_bytes(&manifest)?)?;

        let mut evidence_lines = String::new();
        evidence_lines.push_str(&json_line(&manifest)?);
        for result in &report.results {
            evidence_lines.push_str(&json_line(result)?);
        }

        let evidence_path = run_root.join("evidence.jsonl");
        write_atomic(&evidence_path, evidence_lines.as_bytes())?;

        Ok(CollectedArtifacts {
            run_manifest_path,
            evidence_path,
        })
    }
}

fn json_bytes<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn json_line<T: Serialize>(value: &T) -> io::Result<String> {
    let mut line = serde_json::to_string(value)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    line.push('\n');
    Ok(line)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

//! Recording discovery and per-recording metadata.
//!
//! Metadata comes from a JSON manifest when one is given. File names are the
//! fallback: category keywords, a subject-type token and a three-digit
//! subject ID are read from the file stem.
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::MetadataConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::Job;
use crate::recording::{RecordingMeta, TrialType};

/// Subject type used when none of the configured labels is found.
pub const UNKNOWN: &str = "UNKNOWN";

/// Every file under `root` (recursively) whose name matches `pattern`,
/// sorted.
pub fn find_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = glob::Pattern::new(pattern)?;
    if !root.is_dir() {
        return Err(PipelineError::Precondition(format!("{} is not a directory", root.display())));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(|name| pattern.matches(name)) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Whether a stage can proceed without a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Missing category is an error.
    Mandatory,
    /// Missing category is logged and reported as `None`.
    Advisory,
}

/// Category from case-insensitive keyword matching on the file name.
///
/// The longest matching keyword decides, so `nogo` is not read as `go`.
pub fn infer_category(path: &Path, cfg: &MetadataConfig, requirement: Requirement) -> Result<Option<TrialType>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let longest = |keywords: &[String]| {
        keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty() && name.contains(k.as_str()))
            .map(|k| k.len())
            .max()
    };
    let category = match (longest(&cfg.target_keywords), longest(&cfg.nonresponse_keywords)) {
        (Some(t), Some(n)) if t > n => Some(TrialType::TargetResponse),
        (Some(t), Some(n)) if n > t => Some(TrialType::NonResponse),
        (Some(_), None) => Some(TrialType::TargetResponse),
        (None, Some(_)) => Some(TrialType::NonResponse),
        _ => None,
    };
    match (category, requirement) {
        (Some(c), _) => Ok(Some(c)),
        (None, Requirement::Mandatory) => Err(PipelineError::UnknownCategory(path.display().to_string())),
        (None, Requirement::Advisory) => {
            warn!("no category keyword in {}, skipping category inference", path.display());
            Ok(None)
        }
    }
}

/// Legacy metadata read from a file name.
#[derive(Debug, Clone, PartialEq)]
pub struct FilenameMeta {
    pub category: Option<TrialType>,
    pub subject_type: String,
    pub subject_id: String,
}

/// Parse category, subject type and subject ID from `path`.
///
/// The subject ID is the last three digits of the last run of at least three
/// digits in the stem; [`UNKNOWN`] when there is none.
pub fn parse_filename_meta(path: &Path, cfg: &MetadataConfig) -> Result<FilenameMeta> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tokens: Vec<String> = stem
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_uppercase())
        .collect();
    let subject_type = cfg
        .subject_types
        .iter()
        .find(|ty| {
            let ty = ty.to_ascii_uppercase();
            tokens.iter().any(|t| {
                t.strip_prefix(ty.as_str())
                    .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
            })
        })
        .cloned()
        .unwrap_or_else(|| UNKNOWN.to_string());

    let subject_id = stem
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() >= 3)
        .last()
        .map(|run| run[run.len() - 3..].to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    Ok(FilenameMeta {
        category: infer_category(path, cfg, Requirement::Advisory)?,
        subject_type,
        subject_id,
    })
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub subject_id: String,
    #[serde(default)]
    pub category: Option<TrialType>,
    #[serde(default = "unknown")]
    pub subject_type: String,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Explicit per-recording metadata, a JSON array of [`ManifestEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Load a manifest; relative paths are resolved against its directory.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut manifest: Manifest = serde_json::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for e in &mut manifest.entries {
            if e.path.is_relative() {
                e.path = base.join(&e.path);
            }
        }
        Ok(manifest)
    }

    pub fn lookup(&self, path: &Path) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// Build one job per file: manifest metadata when listed, file-name
/// metadata otherwise.
pub fn plan_jobs(files: Vec<PathBuf>, manifest: Option<&Manifest>, cfg: &MetadataConfig) -> Result<Vec<Job>> {
    files
        .into_iter()
        .map(|path| {
            let source = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let (meta, category) = match manifest.and_then(|m| m.lookup(&path)) {
                Some(e) => (
                    RecordingMeta {
                        subject_id: e.subject_id.clone(),
                        subject_type: e.subject_type.clone(),
                        source,
                    },
                    e.category,
                ),
                None => {
                    let parsed = parse_filename_meta(&path, cfg)?;
                    (
                        RecordingMeta {
                            subject_id: parsed.subject_id,
                            subject_type: parsed.subject_type,
                            source,
                        },
                        parsed.category,
                    )
                }
            };
            Ok(Job { path, meta, category })
        })
        .collect()
}

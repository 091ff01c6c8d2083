//! Tagged-variant error record for the per-job error bag.
//!
//! Replaces the original's string-keyed `errors` dict with an append-only
//! collection of typed variants. Each variant name lines up one-to-one with
//! a key in the error taxonomy table.

use std::fmt;

use thiserror::Error;

/// One entry in a job's error bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobErrorKind {
    FileNotFound,
    FileNotFoundUnexpiredCredentials,
    FileCheckSkippedDueToS3Connectivity,
    Md5sum(String),
    ContentMd5sum(String),
    Gzip(String),
    ValidateFiles(String),
    BamValidation(String),
    CrisprGuideQuant(String),
    CrisprPam(String),
    SamtoolsStats(String),
    InconsistentReadNumbers,
    ReadLength(String),
    FastqFormatReadname(String),
    NotUniqueFlowcellDetails,
    GetUploadUrlRequest(String),
    GetEditRequest(String),
    LookupForEtag(String),
    PatchFileRequest(String),
    FileHttpError(String),
    DownloadUrlMissing,
    EtagDoesNotMatch { expected: String, observed: String },
    StatusCheck(String),
    UnexpiredCredentials,
    MissingMappedProperties,
    GrepBedProblem(String),
}

impl JobErrorKind {
    /// The taxonomy key this variant corresponds to (used for JSON/tab
    /// reports, mirroring the original's dict keys exactly).
    pub fn key(&self) -> &'static str {
        match self {
            JobErrorKind::FileNotFound => "file_not_found",
            JobErrorKind::FileNotFoundUnexpiredCredentials => {
                "file_not_found_unexpired_credentials"
            }
            JobErrorKind::FileCheckSkippedDueToS3Connectivity => {
                "file_check_skipped_due_to_s3_connectivity"
            }
            JobErrorKind::Md5sum(_) => "md5sum",
            JobErrorKind::ContentMd5sum(_) => "content_md5sum",
            JobErrorKind::Gzip(_) => "gzip",
            JobErrorKind::ValidateFiles(_) => "validateFiles",
            JobErrorKind::BamValidation(_) => "bamValidation",
            JobErrorKind::CrisprGuideQuant(_) => "CRISPR_guide_quant",
            JobErrorKind::CrisprPam(_) => "CRISPR_PAM",
            JobErrorKind::SamtoolsStats(_) => "samtools_stats",
            JobErrorKind::InconsistentReadNumbers => "inconsistent_read_numbers",
            JobErrorKind::ReadLength(_) => "read_length",
            JobErrorKind::FastqFormatReadname(_) => "fastq_format_readname",
            JobErrorKind::NotUniqueFlowcellDetails => "not_unique_flowcell_details",
            JobErrorKind::GetUploadUrlRequest(_) => "get_upload_url_request",
            JobErrorKind::GetEditRequest(_) => "get_edit_request",
            JobErrorKind::LookupForEtag(_) => "lookup_for_etag",
            JobErrorKind::PatchFileRequest(_) => "patch_file_request",
            JobErrorKind::FileHttpError(_) => "file_HTTPError",
            JobErrorKind::DownloadUrlMissing => "download_url_missing",
            JobErrorKind::EtagDoesNotMatch { .. } => "etag_does_not_match",
            JobErrorKind::StatusCheck(_) => "status_check",
            JobErrorKind::UnexpiredCredentials => "unexpired_credentials",
            JobErrorKind::MissingMappedProperties => "missing_mapped_properties",
            JobErrorKind::GrepBedProblem(_) => "grep_bed_problem",
        }
    }

    /// Whether this variant should promote the job to `content error`.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            JobErrorKind::Md5sum(_)
                | JobErrorKind::ContentMd5sum(_)
                | JobErrorKind::Gzip(_)
                | JobErrorKind::ValidateFiles(_)
                | JobErrorKind::BamValidation(_)
                | JobErrorKind::CrisprGuideQuant(_)
                | JobErrorKind::CrisprPam(_)
                | JobErrorKind::SamtoolsStats(_)
                | JobErrorKind::InconsistentReadNumbers
                | JobErrorKind::ReadLength(_)
                | JobErrorKind::NotUniqueFlowcellDetails
                | JobErrorKind::MissingMappedProperties
                | JobErrorKind::GrepBedProblem(_)
        )
    }

    /// A human-readable fragment contributed to `content_error_detail`.
    pub fn detail(&self) -> String {
        match self {
            JobErrorKind::Md5sum(s)
            | JobErrorKind::ContentMd5sum(s)
            | JobErrorKind::Gzip(s)
            | JobErrorKind::ValidateFiles(s)
            | JobErrorKind::BamValidation(s)
            | JobErrorKind::CrisprGuideQuant(s)
            | JobErrorKind::CrisprPam(s)
            | JobErrorKind::SamtoolsStats(s)
            | JobErrorKind::ReadLength(s)
            | JobErrorKind::GrepBedProblem(s) => s.clone(),
            JobErrorKind::FastqFormatReadname(s) => format!(
                "Fastq file contains read names that don't follow the Illumina \
                 standard naming schema; for example {s}"
            ),
            JobErrorKind::InconsistentReadNumbers => {
                "mixture of read1 and read2 detected".to_string()
            }
            JobErrorKind::NotUniqueFlowcellDetails => {
                "flowcell_details entries are not unique".to_string()
            }
            JobErrorKind::MissingMappedProperties => {
                "could not determine mapped_run_type or mapped_read_length".to_string()
            }
            other => other.key().to_string(),
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key(), self.detail())
    }
}

/// Append-only error bag accumulated over a job's lifetime.
///
/// Mirrors the original's `errors` dict, but entries are typed and a job
/// never partially overwrites an existing key the way a dict assignment
/// could; `content_error` is instead a derived view over all
/// `is_content_error()` entries, joined the way `update_content_error` did.
#[derive(Debug, Clone, Default)]
pub struct JobErrors {
    entries: Vec<JobErrorKind>,
}

impl JobErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: JobErrorKind) {
        self.entries.push(kind);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobErrorKind> {
        self.entries.iter()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key() == key)
    }

    /// Comma-joined content_error reason, matching `update_content_error`'s
    /// accretion behavior. Empty string if no content-error variant present.
    pub fn content_error_detail(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.is_content_error())
            .map(|e| e.detail())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn has_content_error(&self) -> bool {
        self.entries.iter().any(|e| e.is_content_error())
    }

    pub fn has_file_not_found(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, JobErrorKind::FileNotFound))
    }
}

/// Errors raised by the portal HTTP client.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("response missing ETag header")]
    MissingEtag,
    #[error("malformed JSON response: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

/// Errors raised by subprocess runners (§4.C).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// Errors raised by the fastq/BAM analyzers.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed fastq record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
}

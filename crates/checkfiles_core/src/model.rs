//! Data model: the (partially opaque) portal File record and the in-memory
//! Job a worker mutates while checking one file.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobErrors;

/// File formats whose on-disk bytes are expected to be gzip-compressed.
pub const GZIP_TYPES: &[&str] = &[
    "CEL", "bam", "bed", "bedpe", "csfasta", "csqual", "fasta", "fastq", "gff", "gtf", "tagAlign",
    "tar", "txt", "sam", "wig", "vcf", "pairs",
];

/// Platform UUID that bypasses read-number, read-length and signature
/// checks entirely (read_count is still reported).
pub const ULTIMA_PLATFORM_UUID: &str = "25acccbd-cb36-463b-ac96-adbac11227e6";

/// Platforms excluded from the read-length check only (long-read and
/// chunked-read technologies where read_length is not a meaningful
/// per-read constant). Consolidates the original's two separate UUID sets
/// into one table, per DESIGN.md's resolution of Open Question #4.
pub const LONG_READ_PLATFORM_UUIDS: &[&str] = &[
    "ced61406-dcc6-43c4-bddd-4c977cc676e8",
    "c7564b38-ab4f-4c42-a401-3de48689a998",
    "e2be5728-5744-4da4-8881-cb9526d0389e",
    "7cc06b8c-5535-4a77-b719-4c23644e767d",
    "8f1a9a8c-3392-4032-92a8-5d196c9d7810",
    "6c275b37-018d-4bf8-85f6-6e3b830524a9",
    "6ce511d5-eeb3-41fc-bea7-8c38301e88c1",
    ULTIMA_PLATFORM_UUID,
];

/// Minimal, typed view over the platform fields the core cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform<'a>(pub &'a str);

impl<'a> Platform<'a> {
    /// Bypasses read-number, read-length, and fastq-signature checks
    /// entirely (Ultima only).
    pub fn excludes_all_fastq_checks(&self) -> bool {
        self.0 == ULTIMA_PLATFORM_UUID
    }

    /// Excludes the read-length check and the BAM mapped-run-type/
    /// mapped-read-length extraction (long-read and chunked-read
    /// platforms, superset of `excludes_all_fastq_checks`).
    pub fn excludes_read_length_check(&self) -> bool {
        LONG_READ_PLATFORM_UUIDS.contains(&self.0)
    }
}

/// True if `s` is a well-formed 32-character hex md5 digest, mirroring the
/// original's `int(md5sum, 16)` validity probe without actually hashing
/// anything (md5sums here always arrive pre-computed from the `md5sum`
/// binary or a portal field).
pub fn is_valid_md5_hex(s: &str) -> bool {
    s.len() == 32 && hex::decode(s).is_ok()
}

/// One `{lane, barcode}` entry from a File record's `flowcell_details`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowcellDetail {
    pub lane: Option<String>,
    pub barcode: Option<String>,
}

/// Upload credentials as returned by `<@id>@@upload?datastore=database`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCredentials {
    pub upload_url: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

/// Successful observations accumulated while checking a file. Each field is
/// written into the PATCH body only when present, matching §4.H's PATCH
/// decision table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobResult {
    pub file_size: Option<u64>,
    pub read_count: Option<u64>,
    pub fastq_signature: Option<BTreeSet<String>>,
    pub content_md5sum: Option<String>,
    pub mapped_run_type: Option<String>,
    pub mapped_read_length: Option<u32>,
}

/// A file-checking job: identity, plans, and outputs, per spec.md §3.
#[derive(Debug, Clone)]
pub struct Job {
    /// The File record's `@id`, as returned by the portal.
    pub at_id: String,
    /// The portal's `item` dict at `?frame=edit&datastore=database` time.
    pub item: Value,
    /// ETag captured at edit-view read time; must match at PATCH time.
    pub etag: Option<String>,

    pub download_url: Option<String>,
    pub local_path: Option<String>,
    pub local_file: Option<String>,
    pub upload_expiration: Option<DateTime<Utc>>,
    pub run: DateTime<Utc>,
    pub skip: bool,

    pub result: JobResult,
    pub errors: JobErrors,

    /// Whether this job was successfully PATCHed (for reporting/tests).
    pub patched: bool,
}

impl Job {
    pub fn new(at_id: String, item: Value, run: DateTime<Utc>) -> Self {
        Self {
            at_id,
            item,
            etag: None,
            download_url: None,
            local_path: None,
            local_file: None,
            upload_expiration: None,
            run,
            skip: false,
            result: JobResult::default(),
            errors: JobErrors::new(),
            patched: false,
        }
    }

    pub fn accession(&self) -> &str {
        self.item
            .get("accession")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
    }

    pub fn lab(&self) -> &str {
        self.item
            .get("lab")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
    }

    pub fn status(&self) -> &str {
        self.item
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn aliases(&self) -> Vec<String> {
        self.item
            .get("aliases")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|| vec!["n/a".to_string()])
    }

    pub fn file_format(&self) -> Option<&str> {
        self.item.get("file_format").and_then(Value::as_str)
    }

    pub fn file_format_type(&self) -> Option<&str> {
        self.item.get("file_format_type").and_then(Value::as_str)
    }

    pub fn output_type(&self) -> Option<&str> {
        self.item.get("output_type").and_then(Value::as_str)
    }

    pub fn assembly(&self) -> Option<&str> {
        self.item.get("assembly").and_then(Value::as_str)
    }

    pub fn genome_annotation(&self) -> Option<&str> {
        self.item.get("genome_annotation").and_then(Value::as_str)
    }

    pub fn declared_md5sum(&self) -> Option<&str> {
        self.item.get("md5sum").and_then(Value::as_str)
    }

    pub fn declared_read_length(&self) -> Option<u64> {
        self.item.get("read_length").and_then(Value::as_u64)
    }

    pub fn no_file_available(&self) -> bool {
        self.item
            .get("no_file_available")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn derived_from(&self) -> Vec<String> {
        self.item
            .get("derived_from")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn flowcell_details(&self) -> Vec<FlowcellDetail> {
        self.item
            .get("flowcell_details")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn is_umi_tagged(&self) -> bool {
        self.flowcell_details()
            .iter()
            .any(|d| d.barcode.as_deref() == Some("UMI"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_md5_hex_accepts_32_char_hex_digest() {
        assert!(is_valid_md5_hex("d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn valid_md5_hex_rejects_wrong_length_or_non_hex() {
        assert!(!is_valid_md5_hex("d41d8cd98f00b204e9800998ecf8427"));
        assert!(!is_valid_md5_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"));
    }

    #[test]
    fn ultima_platform_excludes_all_fastq_checks() {
        let p = Platform(ULTIMA_PLATFORM_UUID);
        assert!(p.excludes_all_fastq_checks());
        assert!(p.excludes_read_length_check());
    }

    #[test]
    fn pacbio_platform_excludes_read_length_only() {
        let p = Platform("ced61406-dcc6-43c4-bddd-4c977cc676e8");
        assert!(!p.excludes_all_fastq_checks());
        assert!(p.excludes_read_length_check());
    }
}

//! §4.H PATCH decision table, re-expressed as a pure function of a
//! finished job's state (errors, skip flag, result bag) rather than the
//! original's sequence of dict-mutating `if` statements sharing one `data`
//! variable. The branch order below preserves the original's exact
//! precedence: `content_error` beats `file_not_found` beats the
//! no-errors/not-skipped case, and anything else yields no PATCH at all
//! (including jobs that are `skip`-flagged for a reason other than
//! `file_not_found`, e.g. `unexpired_credentials`).

use serde_json::{Map, Value};

use crate::model::{Job, JobResult};

/// Maximum length (in chars) of `content_error_detail`, per spec §3.
const CONTENT_ERROR_DETAIL_LIMIT: usize = 5000;

/// Outcome of consulting the PATCH decision table for a finished job.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchDecision {
    /// Nothing to send: the job is skipped and carries no
    /// `file_not_found`/`content_error`, or (defensively) its etag has
    /// already been found stale by the caller.
    None,
    /// Send a PATCH with this body to `status` in `{in progress, content
    /// error, upload failed}`.
    Patch { status: &'static str, body: Value },
}

fn insert_result_fields(body: &mut Map<String, Value>, result: &JobResult) {
    if let Some(size) = result.file_size {
        body.insert("file_size".to_string(), Value::from(size));
    }
    if let Some(count) = result.read_count {
        body.insert("read_count".to_string(), Value::from(count));
    }
    if let Some(sigs) = &result.fastq_signature {
        if !sigs.is_empty() {
            body.insert(
                "fastq_signature".to_string(),
                Value::from(sigs.iter().cloned().collect::<Vec<_>>()),
            );
        }
    }
    if let Some(md5) = &result.content_md5sum {
        body.insert("content_md5sum".to_string(), Value::from(md5.clone()));
    }
    if let Some(run_type) = &result.mapped_run_type {
        body.insert("mapped_run_type".to_string(), Value::from(run_type.clone()));
    }
    if let Some(len) = result.mapped_read_length {
        body.insert("mapped_read_length".to_string(), Value::from(len));
    }
}

/// Resolves the PATCH decision for a job whose per-job pipeline has
/// finished (§4.H steps 1-13 have all run).
pub fn decide_patch(job: &Job) -> PatchDecision {
    let mut body = Map::new();

    let status: &'static str = if job.errors.has_content_error() {
        let detail: String = job.errors.content_error_detail();
        let truncated: String = detail.chars().take(CONTENT_ERROR_DETAIL_LIMIT).collect();
        body.insert(
            "content_error_detail".to_string(),
            Value::from(truncated.trim().to_string()),
        );
        "content error"
    } else if job.errors.has_file_not_found() {
        "upload failed"
    } else if job.errors.is_empty() && !job.skip {
        "in progress"
    } else {
        return PatchDecision::None;
    };

    body.insert("status".to_string(), Value::from(status));
    insert_result_fields(&mut body, &job.result);

    PatchDecision::Patch {
        status,
        body: Value::Object(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobErrorKind;
    use chrono::Utc;
    use serde_json::json;

    fn bare_job() -> Job {
        Job::new("/files/ENCFF000ABC/".to_string(), json!({}), Utc::now())
    }

    #[test]
    fn no_errors_not_skipped_patches_in_progress() {
        let mut job = bare_job();
        job.result.read_count = Some(1_000_000);
        match decide_patch(&job) {
            PatchDecision::Patch { status, body } => {
                assert_eq!(status, "in progress");
                assert_eq!(body["read_count"], json!(1_000_000));
            }
            PatchDecision::None => panic!("expected a PATCH"),
        }
    }

    #[test]
    fn content_error_wins_over_file_not_found_when_both_present() {
        let mut job = bare_job();
        job.errors.push(JobErrorKind::Md5sum("checked x does not match item y".to_string()));
        job.errors.push(JobErrorKind::FileNotFound);
        match decide_patch(&job) {
            PatchDecision::Patch { status, body } => {
                assert_eq!(status, "content error");
                assert!(body["content_error_detail"]
                    .as_str()
                    .unwrap()
                    .contains("does not match"));
            }
            PatchDecision::None => panic!("expected a PATCH"),
        }
    }

    #[test]
    fn file_not_found_alone_patches_upload_failed() {
        let mut job = bare_job();
        job.skip = true;
        job.errors.push(JobErrorKind::FileNotFound);
        match decide_patch(&job) {
            PatchDecision::Patch { status, body } => {
                assert_eq!(status, "upload failed");
                assert!(!body.as_object().unwrap().contains_key("content_error_detail"));
            }
            PatchDecision::None => panic!("expected a PATCH"),
        }
    }

    #[test]
    fn purely_transient_errors_yield_no_patch() {
        let mut job = bare_job();
        job.errors.push(JobErrorKind::GetUploadUrlRequest("timeout".to_string()));
        assert_eq!(decide_patch(&job), PatchDecision::None);
    }

    #[test]
    fn skipped_for_unexpired_credentials_yields_no_patch() {
        let mut job = bare_job();
        job.skip = true;
        job.errors.push(JobErrorKind::UnexpiredCredentials);
        assert_eq!(decide_patch(&job), PatchDecision::None);
    }

    #[test]
    fn no_file_available_job_with_no_errors_patches_in_progress() {
        // Mirrors the original's `if no_file_flag: return job` early exit,
        // which leaves errors empty and skip unset.
        let job = bare_job();
        assert!(matches!(
            decide_patch(&job),
            PatchDecision::Patch { status: "in progress", .. }
        ));
    }

    #[test]
    fn content_error_detail_is_truncated_and_trimmed() {
        let mut job = bare_job();
        let long = "x".repeat(6000);
        job.errors.push(JobErrorKind::Md5sum(long));
        match decide_patch(&job) {
            PatchDecision::Patch { body, .. } => {
                let detail = body["content_error_detail"].as_str().unwrap();
                assert_eq!(detail.chars().count(), CONTENT_ERROR_DETAIL_LIMIT);
            }
            PatchDecision::None => panic!("expected a PATCH"),
        }
    }
}

//! §4.H Job coordinator: the thirteen-step per-job pipeline and the bounded
//! worker pool that runs it over every job in a batch.
//!
//! Grounded in the teacher's sync `std::thread` + `std::sync::mpsc` executor
//! idiom (`casparian_mcp::jobs::executor`), simplified for a finite batch of
//! independent jobs rather than a long-lived job queue: a bounded channel of
//! work items feeds N worker threads, and results drain back through a
//! second channel in completion order (unordered, matching `imap_unordered`
//! in the original), for the caller to patch and report serially.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use checkfiles_core::bam::analyze_bam;
use checkfiles_core::conflicts::flowcell_details_intersect;
use checkfiles_core::crispr::validate_crispr;
use checkfiles_core::error::JobErrorKind;
use checkfiles_core::fastq::{analyze_fastq_stream, check_read_lengths};
use checkfiles_core::format_validator::{self, FormatPlan};
use checkfiles_core::model::{Job, Platform, GZIP_TYPES};
use checkfiles_core::platform::{get_platform_from_bams, get_platform_uuid, get_read_name_details};
use checkfiles_core::portal::PortalClient;
use checkfiles_core::runners;
use tracing::warn;

/// Fixed parameters every job in a run shares.
pub struct PipelineConfig {
    pub mirror: PathBuf,
    pub enc_val_data: PathBuf,
}

/// Quotes `s` for safe interpolation into a `bash -c` script, the same
/// `shlex.quote` role the original's `quote()` import played.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn run_pipeline(command: &str) -> Result<runners::RunOutput, checkfiles_core::error::RunnerError> {
    runners::run("bash", &["-c", command])
}

/// Resolves the on-disk path the pipeline should stat and read, or `None`
/// when the record declares `no_file_available` (an early, error-free exit
/// that still yields an "in progress" PATCH downstream).
fn resolve_local_path(job: &Job, mirror: &Path) -> Option<String> {
    if let Some(local) = &job.local_file {
        return Some(local.clone());
    }
    if job.no_file_available() {
        return None;
    }
    let download_url = job.download_url.as_deref().unwrap_or("");
    let suffix = download_url.strip_prefix("s3://").unwrap_or(download_url);
    Some(mirror.join(suffix).to_string_lossy().to_string())
}

fn is_path_gzipped(path: &str) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    Ok(n == 2 && magic == [0x1f, 0x8b])
}

/// §4.G: queries the portal for fastq-signature collisions among other
/// files.
fn check_fastq_signature_conflicts(
    client: &PortalClient,
    job: &mut Job,
    signatures: &std::collections::BTreeSet<String>,
) {
    let self_accession = job.accession().to_string();
    let self_flowcell = job.flowcell_details();
    let mut conflicts: Vec<String> = Vec::new();

    for signature in signatures {
        if signature.ends_with("mixed:") {
            continue;
        }
        let query = format!(
            "type=File&status!=replaced&file_format=fastq&datastore=database&limit=all&fastq_signature={signature}"
        );
        let results = match client.search(&query) {
            Ok(r) => r,
            Err(e) => {
                job.errors
                    .push(JobErrorKind::LookupForEtag(format!("fastq signature lookup: {e}")));
                continue;
            }
        };
        for entry in &results {
            let entry_accession = entry.get("accession").and_then(serde_json::Value::as_str);
            if signature.ends_with("::") {
                let entry_flowcell: Vec<checkfiles_core::model::FlowcellDetail> = entry
                    .get("flowcell_details")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                let both_declare = !entry_flowcell.is_empty() && !self_flowcell.is_empty();
                if both_declare && flowcell_details_intersect(&entry_flowcell, &self_flowcell) {
                    // Metadata resolves the shared-prefix ambiguity: not a conflict.
                    continue;
                }
            }
            match entry_accession {
                Some(acc) if acc != self_accession => {
                    conflicts.push(format!("{signature} in file {acc} "));
                }
                None => conflicts.push(format!("{signature} file on the portal.")),
                _ => {}
            }
        }
    }

    if !conflicts.is_empty() {
        job.errors.push(JobErrorKind::NotUniqueFlowcellDetails);
        job.errors.push(JobErrorKind::ContentMd5sum(format!(
            "Fastq file contains read name signature that conflict with signature of existing file(s): {}",
            conflicts.join(", ")
        )));
    }
}

/// §4.G: queries the portal for content-md5sum collisions.
fn check_contentmd5sum_conflicts(client: &PortalClient, job: &mut Job, digest: &str) {
    let query = format!(
        "type=File&status!=replaced&datastore=database&limit=all&content_md5sum={digest}"
    );
    let results = match client.search(&query) {
        Ok(r) => r,
        Err(e) => {
            job.errors
                .push(JobErrorKind::LookupForEtag(format!("content md5sum lookup: {e}")));
            return;
        }
    };
    if results.is_empty() {
        return;
    }
    let self_accession = job.accession().to_string();
    let mut conflicts = Vec::new();
    for entry in &results {
        match entry.get("accession").and_then(serde_json::Value::as_str) {
            Some(acc) if acc != self_accession => {
                conflicts.push(format!("{digest} in file {acc} "));
            }
            None => conflicts.push(digest.to_string()),
            _ => {}
        }
    }
    if !conflicts.is_empty() {
        job.errors.push(JobErrorKind::ContentMd5sum(format!(
            "File content md5sum conflicts with content md5sum of existing file(s) {}",
            conflicts.join(", ")
        )));
    }
}

/// Runs the full §4.H pipeline against one job, mutating it in place.
pub fn check_file(config: &PipelineConfig, client: &PortalClient, job: &mut Job) {
    if job.skip {
        return;
    }

    let local_path = match resolve_local_path(job, &config.mirror) {
        Some(p) => p,
        None => return,
    };

    let file_format = job.file_format().unwrap_or("").to_string();
    let is_bed = file_format == "bed";
    let scratch_path = if is_bed {
        Some(format_validator::modified_bed_scratch_path(Path::new(&local_path)))
    } else {
        None
    };

    let metadata = match std::fs::metadata(&local_path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if job.upload_expiration.map(|exp| job.run > exp).unwrap_or(true) {
                job.errors.push(JobErrorKind::FileNotFound);
            } else {
                job.errors.push(JobErrorKind::FileNotFoundUnexpiredCredentials);
            }
            job.skip = true;
            return;
        }
        Err(_) => {
            job.errors.push(JobErrorKind::FileCheckSkippedDueToS3Connectivity);
            job.skip = true;
            return;
        }
    };
    job.result.file_size = Some(metadata.len());

    match runners::md5sum(&local_path) {
        Ok(digest) => {
            if Some(digest.as_str()) != job.declared_md5sum() {
                job.errors.push(JobErrorKind::Md5sum(format!(
                    "checked {} does not match item {}",
                    digest,
                    job.declared_md5sum().unwrap_or("")
                )));
            }
        }
        Err(e) => job.errors.push(JobErrorKind::Md5sum(e.to_string())),
    }

    let is_gzipped = match is_path_gzipped(&local_path) {
        Ok(v) => v,
        Err(_) => return,
    };
    let expects_gzip = GZIP_TYPES.contains(&file_format.as_str());

    let mut is_local_bed_present = false;
    if !expects_gzip {
        if is_gzipped {
            job.errors.push(JobErrorKind::Gzip("Expected un-gzipped file".to_string()));
        }
    } else if !is_gzipped {
        job.errors.push(JobErrorKind::Gzip("Expected gzipped file".to_string()));
    } else {
        match run_pipeline(&format!(
            "set -o pipefail; gunzip --stdout {} | md5sum",
            shell_quote(&local_path)
        )) {
            Ok(out) if out.success() => {
                let digest = out.stdout.get(..32).unwrap_or("").to_string();
                if checkfiles_core::model::is_valid_md5_hex(&digest) {
                    job.result.content_md5sum = Some(digest.clone());
                    check_contentmd5sum_conflicts(client, job, &digest);
                } else {
                    job.errors.push(JobErrorKind::ContentMd5sum(out.stdout.trim().to_string()));
                }
            }
            Ok(out) => job.errors.push(JobErrorKind::ContentMd5sum(out.stdout.trim().to_string())),
            Err(e) => job.errors.push(JobErrorKind::ContentMd5sum(e.to_string())),
        }

        if let Some(scratch) = &scratch_path {
            let scratch_str = scratch.to_string_lossy().to_string();
            match run_pipeline(&format!(
                "set -o pipefail; gunzip --stdout {} | grep -c '^#'",
                shell_quote(&local_path)
            )) {
                // exit 0: comment lines found, strip them into the scratch file.
                // exit 1: no comment lines, fall through untouched (use local_path
                // as-is). exit >1: grep itself failed, a content error.
                Ok(out) if out.status == 0 => {
                    is_local_bed_present = true;
                    if let Err(e) = run_pipeline(&format!(
                        "set -o pipefail; gunzip --stdout {} | grep -v '^#' > {}",
                        shell_quote(&local_path),
                        shell_quote(&scratch_str)
                    )) {
                        job.errors.push(JobErrorKind::Gzip(e.to_string()));
                        is_local_bed_present = false;
                    }
                }
                Ok(out) if out.status == 1 => {}
                Ok(out) => job
                    .errors
                    .push(JobErrorKind::GrepBedProblem(out.stdout.trim().to_string())),
                Err(e) => job.errors.push(JobErrorKind::GrepBedProblem(e.to_string())),
            }
        }
    }

    let effective_path = if is_local_bed_present {
        scratch_path.as_ref().unwrap().to_string_lossy().to_string()
    } else {
        local_path.clone()
    };

    if file_format == "bam" {
        match runners::samtools_quickcheck(&effective_path) {
            Ok(out) if out.success() => {}
            Ok(out) => {
                let detail = if out.stderr.trim().is_empty() {
                    format!("samtools quickcheck failed with exit status {}", out.status)
                } else {
                    out.stderr
                };
                job.errors.push(JobErrorKind::BamValidation(detail));
            }
            Err(e) => job.errors.push(JobErrorKind::BamValidation(e.to_string())),
        }
    }

    let plan = format_validator::plan(
        &config.enc_val_data,
        &file_format,
        job.file_format_type(),
        job.output_type(),
        job.assembly(),
        job.genome_annotation(),
    );
    match &plan {
        FormatPlan::Opaque | FormatPlan::SkipSubreads => {}
        FormatPlan::MissingAssembly => {
            job.errors
                .push(JobErrorKind::ValidateFiles("missing assembly/chromInfo".to_string()));
        }
        FormatPlan::Run(args) => {
            let mut full_args = args.args.clone();
            full_args.push(effective_path.clone());
            match runners::validate_files(&full_args) {
                Ok(out) if out.success() => {}
                Ok(out) => job.errors.push(JobErrorKind::ValidateFiles(out.stdout)),
                Err(e) => job.errors.push(JobErrorKind::ValidateFiles(e.to_string())),
            }
        }
    }

    if is_local_bed_present {
        if let Some(scratch) = &scratch_path {
            let _ = std::fs::remove_file(scratch);
        }
    }

    let validate_files_failed = job.errors.has("validateFiles");
    let bam_validation_failed = job.errors.has("bamValidation");

    if file_format == "fastq" && !validate_files_failed {
        run_fastq_analysis(client, job, &local_path);
    }

    if file_format == "tsv"
        && job.output_type() == Some("guide quantifications")
        && job.file_format_type() == Some("guide quantifications")
        && job.assembly() == Some("GRCh38")
    {
        if let Err(e) = validate_crispr(&effective_path) {
            job.errors.push(e);
        }
    }

    if file_format == "bam"
        && !validate_files_failed
        && !bam_validation_failed
        && job.output_type() != Some("subreads")
    {
        run_bam_analysis(client, job, &local_path);
    }

    if job.status() != "uploading" {
        job.errors.push(JobErrorKind::StatusCheck(format!(
            "status '{}' is not 'uploading'",
            job.status()
        )));
    }
}

fn run_fastq_analysis(client: &PortalClient, job: &mut Job, local_path: &str) {
    let mut child = match runners::gunzip_stream(local_path) {
        Ok(c) => c,
        Err(_) => {
            job.errors.push(JobErrorKind::Gzip(format!(
                "Failed to extract information from {local_path}"
            )));
            return;
        }
    };
    let stdout = child.stdout.take().expect("gunzip stdout piped");
    let read_name_details = get_read_name_details(&job.item);
    let platform_uuid = get_platform_uuid(&job.item, client);
    let platform = platform_uuid.as_deref().map(Platform);

    let analysis_result =
        analyze_fastq_stream(BufReader::new(stdout), read_name_details.as_ref(), platform);
    let _ = child.wait();
    let analysis = match analysis_result {
        Ok(a) => a,
        Err(e) => {
            job.errors
                .push(JobErrorKind::Gzip(format!("unzipped fastq streaming: {e}")));
            return;
        }
    };

    job.result.read_count = Some(analysis.read_count);
    for err in analysis.errors {
        job.errors.push(err);
    }

    let excludes_all = platform.map(|p| p.excludes_all_fastq_checks()).unwrap_or(false);
    if !excludes_all && analysis.read_numbers.len() > 1 {
        job.errors.push(JobErrorKind::InconsistentReadNumbers);
    }

    let excludes_length = platform.map(|p| p.excludes_read_length_check()).unwrap_or(false);
    if !excludes_length {
        match job.declared_read_length() {
            Some(declared) if declared > 2 => {
                if let Some(err) =
                    check_read_lengths(&analysis.read_lengths, declared, analysis.read_count, 0.9)
                {
                    job.errors.push(err);
                }
            }
            _ => {
                let lengths: Vec<String> = analysis
                    .read_lengths
                    .iter()
                    .map(|(len, count)| format!("({len}bp, {count})"))
                    .collect();
                job.errors.push(JobErrorKind::ReadLength(format!(
                    "no specified read length in the uploaded fastq file, while read length(s) \
                     found in the file were {}. ",
                    lengths.join(", ")
                )));
            }
        }
    }

    if excludes_all {
        return;
    }

    let is_umi = job.is_umi_tagged();
    let signatures = analysis.signatures_for_comparison(is_umi);
    job.result.fastq_signature = Some(signatures.clone());
    check_fastq_signature_conflicts(client, job, &signatures);
}

fn run_bam_analysis(client: &PortalClient, job: &mut Job, local_path: &str) {
    let platforms = get_platform_from_bams(&job.at_id, client);

    if platforms.is_empty() {
        return;
    }
    let excludes_length = platforms
        .iter()
        .any(|p| Platform(p).excludes_read_length_check());
    if excludes_length {
        return;
    }

    match analyze_bam(local_path) {
        Ok((run_type, read_length)) => match (run_type, read_length) {
            (Some(rt), Some(len)) => {
                job.result.mapped_run_type = Some(rt);
                job.result.mapped_read_length = Some(len);
            }
            _ => {
                job.errors.push(JobErrorKind::MissingMappedProperties);
            }
        },
        Err(e) => {
            job.errors.push(e);
        }
    }
}

/// Runs `check_file` over every job using a bounded pool of `workers`
/// threads (0 meaning inline/serial execution), applying the PATCH decision
/// and returning jobs in completion order.
pub fn run_all(
    config: PipelineConfig,
    client: &PortalClient,
    jobs: Vec<Job>,
    workers: usize,
    dry_run: bool,
) -> Vec<Job> {
    if workers == 0 {
        return jobs
            .into_iter()
            .map(|mut job| {
                check_file(&config, client, &mut job);
                apply_patch(client, &mut job, dry_run);
                job
            })
            .collect();
    }

    thread::scope(|scope| {
        let (work_tx, work_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel::<Job>();
        let work_rx = std::sync::Mutex::new(work_rx);

        for _ in 0..workers {
            let work_rx = &work_rx;
            let result_tx = result_tx.clone();
            let config_ref = &config;
            scope.spawn(move || loop {
                let job = {
                    let rx = work_rx.lock().expect("work queue lock poisoned");
                    rx.recv()
                };
                let mut job = match job {
                    Ok(j) => j,
                    Err(_) => break,
                };
                check_file(config_ref, client, &mut job);
                apply_patch(client, &mut job, dry_run);
                if result_tx.send(job).is_err() {
                    break;
                }
            });
        }
        drop(result_tx);

        let total = jobs.len();
        for job in jobs {
            if work_tx.send(job).is_err() {
                break;
            }
        }
        drop(work_tx);

        let mut results = Vec::with_capacity(total);
        for job in result_rx {
            results.push(job);
        }
        results
    })
}

/// §4.H's two-read ETag protocol immediately before PATCH: re-reads the
/// current etag and abandons the PATCH if it no longer matches the one
/// captured at job-source time.
fn apply_patch(client: &PortalClient, job: &mut Job, dry_run: bool) {
    if dry_run {
        return;
    }
    let decision = checkfiles_core::patch::decide_patch(job);
    let body = match decision {
        checkfiles_core::patch::PatchDecision::None => return,
        checkfiles_core::patch::PatchDecision::Patch { body, .. } => body,
    };

    let expected_etag = match &job.etag {
        Some(e) => e.clone(),
        None => return,
    };

    match client.get_current_etag(&job.at_id) {
        Ok(observed) if observed == expected_etag => {
            match client.patch_file(&job.at_id, &expected_etag, &body) {
                Ok(_) => job.patched = true,
                Err(e) => job.errors.push(JobErrorKind::PatchFileRequest(e.to_string())),
            }
        }
        Ok(observed) => {
            warn!(accession = job.accession(), "etag mismatch, abandoning PATCH");
            job.errors.push(JobErrorKind::EtagDoesNotMatch {
                expected: expected_etag,
                observed,
            });
        }
        Err(e) => job.errors.push(JobErrorKind::LookupForEtag(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn job_with(item: Value) -> Job {
        Job::new("/files/ENCFF000ABC/".to_string(), item, Utc::now())
    }

    #[test]
    fn shell_quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("o'brien"), "'o'\\''brien'");
        assert_eq!(shell_quote("plain"), "'plain'");
    }

    #[test]
    fn resolve_local_path_prefers_explicit_local_file() {
        let mut job = job_with(json!({}));
        job.local_file = Some("/mirror/already-here.fastq.gz".to_string());
        job.download_url = Some("s3://bucket/elsewhere.fastq.gz".to_string());
        let resolved = resolve_local_path(&job, Path::new("/mirror"));
        assert_eq!(resolved.as_deref(), Some("/mirror/already-here.fastq.gz"));
    }

    #[test]
    fn resolve_local_path_joins_download_url_under_mirror() {
        let mut job = job_with(json!({}));
        job.download_url = Some("s3://bucket/path/to/file.bam".to_string());
        let resolved = resolve_local_path(&job, Path::new("/mirror")).unwrap();
        assert_eq!(resolved, "/mirror/bucket/path/to/file.bam");
    }

    #[test]
    fn resolve_local_path_is_none_when_no_file_available() {
        let job = job_with(json!({"no_file_available": true}));
        assert!(resolve_local_path(&job, Path::new("/mirror")).is_none());
    }

    #[test]
    fn is_path_gzipped_detects_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();

        let gz_path = dir.path().join("sample.fastq.gz");
        std::fs::write(&gz_path, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        assert!(is_path_gzipped(gz_path.to_str().unwrap()).unwrap());

        let plain_path = dir.path().join("sample.fastq");
        std::fs::write(&plain_path, b"@read1\nACGT\n+\n!!!!\n").unwrap();
        assert!(!is_path_gzipped(plain_path.to_str().unwrap()).unwrap());
    }

    #[test]
    fn is_path_gzipped_errors_on_missing_file() {
        assert!(is_path_gzipped("/no/such/path/exists.gz").is_err());
    }
}

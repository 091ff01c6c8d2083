//! §4.I Output sink: the tab/JSON-lines report writer, startup/shutdown
//! banners, and the optional Slack mirror.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use checkfiles_core::model::Job;
use serde_json::{json, Value};
use tracing::info;

/// Either a real file or stdout/stderr, so `--out`/`--err` can default to
/// the console the way the original's `argparse.FileType` did.
pub enum Sink {
    File(BufWriter<File>),
    Stdout,
    Stderr,
}

impl Sink {
    pub fn open(path: Option<&str>, default_is_stdout: bool) -> io::Result<Self> {
        match path {
            Some(p) => Ok(Sink::File(BufWriter::new(File::create(p)?))),
            None if default_is_stdout => Ok(Sink::Stdout),
            None => Ok(Sink::Stderr),
        }
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            Sink::File(f) => {
                writeln!(f, "{line}")?;
                f.flush()
            }
            Sink::Stdout => {
                let mut out = io::stdout();
                writeln!(out, "{line}")?;
                out.flush()
            }
            Sink::Stderr => {
                let mut out = io::stderr();
                writeln!(out, "{line}")?;
                out.flush()
            }
        }
    }
}

const TAB_HEADER: &str = "Accession\tLab\tErrors\tAliases\tDownload URL\tUpload Expiration";

fn errors_cell(job: &Job) -> String {
    job.errors
        .iter()
        .map(|e| format!("{}: {}", e.key(), e.detail()))
        .collect::<Vec<_>>()
        .join("; ")
}

fn tab_line(job: &Job) -> String {
    [
        job.accession().to_string(),
        job.lab().to_string(),
        errors_cell(job),
        job.aliases().join(", "),
        job.download_url.clone().unwrap_or_default(),
        job.upload_expiration
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    ]
    .join("\t")
}

fn job_json(job: &Job) -> Value {
    let errors: Value = job
        .errors
        .iter()
        .map(|e| (e.key().to_string(), Value::from(e.detail())))
        .collect::<serde_json::Map<_, _>>()
        .into();

    json!({
        "@id": job.at_id,
        "accession": job.accession(),
        "lab": job.lab(),
        "status": job.status(),
        "errors": errors,
        "aliases": job.aliases(),
        "download_url": job.download_url,
        "upload_expiration": job.upload_expiration,
        "local_path": job.local_path,
        "skip": job.skip,
        "patched": job.patched,
        "result": {
            "file_size": job.result.file_size,
            "read_count": job.result.read_count,
            "fastq_signature": job.result.fastq_signature,
            "content_md5sum": job.result.content_md5sum,
            "mapped_run_type": job.result.mapped_run_type,
            "mapped_read_length": job.result.mapped_read_length,
        }
    })
}

/// Writes one job's result line to `out`, and mirrors it to `err` when the
/// job carries any errors, per §4.I.
pub fn write_job(out: &mut Sink, err: &mut Sink, job: &Job, json_out: bool) -> io::Result<()> {
    let line = if json_out {
        job_json(job).to_string()
    } else {
        tab_line(job)
    };
    out.write_line(&line)?;
    if !job.errors.is_empty() {
        err.write_line(&line)?;
    }
    Ok(())
}

pub fn write_header(out: &mut Sink, json_out: bool) -> io::Result<()> {
    if !json_out {
        out.write_line(TAB_HEADER)?;
    }
    Ok(())
}

/// The startup banner, written to `out` and mirrored into the trace log.
pub fn startup_banner(
    version: &str,
    url: &str,
    search_query: &str,
    processes: usize,
    dry_run: bool,
    hostname: &str,
) -> String {
    let dr = if dry_run { " -- Dry Run" } else { "" };
    let line = format!(
        "STARTING Checkfiles version {version} ({url}) ({search_query}): with {processes} processes{dr} on {hostname} at {}",
        chrono::Local::now()
    );
    info!("{line}");
    line
}

pub fn shutdown_banner() -> String {
    let line = format!("FINISHED Checkfiles at {}", chrono::Local::now());
    info!("{line}");
    line
}

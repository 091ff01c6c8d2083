//! checkfiles: validates uploaded genomic files against portal metadata and
//! PATCHes the verdict back, per §1-§2.

mod coordinator;
mod job_source;
mod output;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use checkfiles_core::portal::{PortalClient, PortalCredentials};
use checkfiles_logging::LogConfig;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SEARCH_QUERY: &str = "status=uploading";
const SLACK_CHANNEL: &str = "#bot-reporting";

/// Validates uploaded genomic files and PATCHes the verdict back to the portal.
#[derive(Parser, Debug)]
#[command(name = "checkfiles", version)]
struct Cli {
    /// Portal base URL, e.g. https://www.encodeproject.org
    url: String,

    /// Local root that mirrors the bucket layout referenced by each file's
    /// download URL.
    #[arg(long = "mirror")]
    mirror: PathBuf,

    /// Root directory of the ENCODE validator's `encValData` reference tree.
    #[arg(long = "encValData")]
    enc_val_data: PathBuf,

    /// Portal access key id.
    #[arg(short = 'u', long = "username", env = "CHECKFILES_USERNAME")]
    username: String,

    /// Portal access key secret.
    #[arg(short = 'p', long = "password", env = "CHECKFILES_PASSWORD")]
    password: String,

    /// Slack bot token; when set, the run's banners and reports are also
    /// posted to #bot-reporting.
    #[arg(long = "bot-token", env = "CHECKFILES_BOT_TOKEN")]
    bot_token: Option<String>,

    /// Tab-report destination (defaults to stdout).
    #[arg(short = 'o', long = "out")]
    out: Option<String>,

    /// Error-only report destination (defaults to stderr).
    #[arg(short = 'e', long = "err")]
    err: Option<String>,

    /// Worker thread count; 0 runs every job inline on the main thread.
    #[arg(long = "processes")]
    processes: Option<usize>,

    /// Don't skip files whose upload credentials haven't expired yet.
    #[arg(long = "include-unexpired-upload")]
    include_unexpired_upload: bool,

    /// Check files and report, but never PATCH the portal.
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Emit one JSON object per line instead of the tab report.
    #[arg(long = "json-out")]
    json_out: bool,

    /// Portal search query fragment selecting the job batch.
    #[arg(long = "search-query", default_value = DEFAULT_SEARCH_QUERY)]
    search_query: String,

    /// Path to a newline-delimited file of accessions to check, instead of
    /// running `search_query`.
    #[arg(long = "file-list", conflicts_with = "local_file")]
    file_list: Option<String>,

    /// Check a single local file's accession, instead of running
    /// `search_query`.
    #[arg(long = "local-file", conflicts_with = "file_list")]
    local_file: Option<String>,
}

fn resolve_workers(requested: Option<usize>) -> usize {
    requested.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    checkfiles_logging::init_logging(LogConfig {
        app_name: "checkfiles",
        verbose: false,
    })
    .context("failed to initialize logging")?;

    let workers = resolve_workers(cli.processes);

    let banner = output::startup_banner(
        VERSION,
        &cli.url,
        &cli.search_query,
        workers,
        cli.dry_run,
        &hostname(),
    );
    if let Some(token) = &cli.bot_token {
        post_slack_message(token, &banner);
    }

    let client = PortalClient::new(PortalCredentials {
        server: cli.url.clone(),
        key_id: cli.username.clone(),
        secret: cli.password.clone(),
    })
    .context("failed to build portal client")?;

    let source = if let Some(path) = &cli.file_list {
        job_source::Source::FileList(path)
    } else if let Some(path) = &cli.local_file {
        job_source::Source::LocalFile(path)
    } else {
        job_source::Source::Query(&cli.search_query)
    };

    let jobs = match job_source::fetch_jobs(
        &client,
        &source,
        cli.include_unexpired_upload,
        cli.local_file.as_deref(),
    ) {
        Ok(jobs) => jobs,
        Err(e) => {
            error!("fetching job list failed: {e:#}");
            bail!("fetching job list failed: {e}");
        }
    };
    info!(count = jobs.len(), "resolved job batch");

    let config = coordinator::PipelineConfig {
        mirror: cli.mirror.clone(),
        enc_val_data: cli.enc_val_data.clone(),
    };
    let jobs = coordinator::run_all(config, &client, jobs, workers, cli.dry_run);

    let mut out_sink = output::Sink::open(cli.out.as_deref(), true)
        .context("failed to open --out destination")?;
    let mut err_sink = output::Sink::open(cli.err.as_deref(), false)
        .context("failed to open --err destination")?;
    output::write_header(&mut out_sink, cli.json_out)?;
    for job in &jobs {
        output::write_job(&mut out_sink, &mut err_sink, job, cli.json_out)
            .context("failed to write job report")?;
    }

    let errored = jobs.iter().filter(|j| !j.errors.is_empty()).count();
    info!(total = jobs.len(), errored, "run complete");

    let shutdown = output::shutdown_banner();
    if let Some(token) = &cli.bot_token {
        post_slack_message(token, &shutdown);
        if let Some(path) = &cli.out {
            post_slack_file(token, path);
        }
        if let Some(path) = &cli.err {
            post_slack_file(token, path);
        }
    }

    Ok(())
}

/// Posts a status line to `#bot-reporting`, mirroring the original's Slack
/// hook. Failures are logged, never fatal to the run.
fn post_slack_message(token: &str, text: &str) {
    let client = reqwest::blocking::Client::new();
    let result = client
        .post("https://slack.com/api/chat.postMessage")
        .bearer_auth(token)
        .json(&serde_json::json!({ "channel": SLACK_CHANNEL, "text": text }))
        .send();
    if let Err(e) = result {
        error!("slack chat.postMessage failed: {e}");
    }
}

/// Uploads a report file to `#bot-reporting` via Slack's legacy upload API.
fn post_slack_file(token: &str, path: &str) {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            error!("reading {path} for slack upload failed: {e}");
            return;
        }
    };
    let file_name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("report.txt")
        .to_string();
    let part = reqwest::blocking::multipart::Part::bytes(bytes).file_name(file_name);
    let form = reqwest::blocking::multipart::Form::new()
        .text("channels", SLACK_CHANNEL)
        .part("file", part);
    let client = reqwest::blocking::Client::new();
    let result = client
        .post("https://slack.com/api/files.upload")
        .bearer_auth(token)
        .multipart(form)
        .send();
    if let Err(e) = result {
        error!("slack files.upload failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_workers_respects_explicit_count() {
        assert_eq!(resolve_workers(Some(0)), 0);
        assert_eq!(resolve_workers(Some(4)), 4);
    }
}

//! §4.C Subprocess runners: md5sum, gunzip pipelines, samtools
//! quickcheck/stats, validateFiles, CRISPR scripts. Grounded in the
//! teacher's `native_runtime.rs` Command-piping + background-reader-thread
//! idiom: stdout/stderr are captured fully since these are short-lived,
//! finite-output tools rather than long-running streaming processes.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;

use crate::error::RunnerError;

/// Output of a finished subprocess.
#[derive(Debug)]
pub struct RunOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Spawns `command` with `args`, streams stdout and stderr off background
/// threads into channels so a hung child can't deadlock on a full pipe
/// buffer, then joins once the child exits.
pub fn run(command: &str, args: &[&str]) -> Result<RunOutput, RunnerError> {
    let mut child = Command::new(command)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");

    let (stdout_tx, stdout_rx) = mpsc::channel();
    let (stderr_tx, stderr_rx) = mpsc::channel();

    let stdout_thread = thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout_pipe.read_to_string(&mut buf);
        let _ = stdout_tx.send(buf);
    });
    let stderr_thread = thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr_pipe.read_to_string(&mut buf);
        let _ = stderr_tx.send(buf);
    });

    let status = child.wait().map_err(|source| RunnerError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let stdout = stdout_rx.recv().unwrap_or_default();
    let stderr = stderr_rx.recv().unwrap_or_default();
    let _ = stdout_thread.join();
    let _ = stderr_thread.join();

    Ok(RunOutput {
        status: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

/// Runs `command`/`args` and converts a non-zero exit into a `RunnerError`,
/// for callers that treat any non-zero status as a hard failure rather
/// than something to interpret (e.g. `gunzip -t`).
pub fn run_checked(command: &str, args: &[&str]) -> Result<RunOutput, RunnerError> {
    let output = run(command, args)?;
    if !output.success() {
        return Err(RunnerError::NonZeroExit {
            command: command.to_string(),
            status: output.status,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

/// `md5sum <path>`, returning the lowercase hex digest.
pub fn md5sum(path: &str) -> Result<String, RunnerError> {
    let output = run_checked("md5sum", &[path])?;
    Ok(output
        .stdout
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string())
}

/// `gunzip -t <path>`: validates gzip structure without writing output.
pub fn gunzip_test(path: &str) -> Result<(), RunnerError> {
    run_checked("gunzip", &["-t", path]).map(|_| ())
}

/// Spawns `gunzip --stdout <path>` with stdout left piped and unconsumed,
/// for callers that want to stream decompressed bytes line-by-line (the
/// fastq analyzer) rather than buffer the whole file in memory. Stderr is
/// inherited so a corrupt-gzip complaint still reaches the process log;
/// the caller is responsible for `wait()`-ing the child after it has
/// drained stdout.
pub fn gunzip_stream(path: &str) -> Result<Child, RunnerError> {
    Command::new("gunzip")
        .args(["--stdout", path])
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            command: "gunzip".to_string(),
            source,
        })
}

/// `samtools quickcheck <path>`: fast BAM structural sanity check, exit 0
/// meaning ok, per §6.
pub fn samtools_quickcheck(path: &str) -> Result<RunOutput, RunnerError> {
    run("samtools", &["quickcheck", path])
}

/// `samtools stats <path>`, whose stdout is parsed by the BAM analyzer for
/// `SN raw total sequences`/`reads mapped`/et al. summary-number lines.
pub fn samtools_stats(path: &str) -> Result<RunOutput, RunnerError> {
    run("samtools", &["stats", path])
}

/// ENCODE's `validateFiles` tool, invoked with a format/type/assembly/
/// chromInfo argument set resolved by `format_validator::plan`.
pub fn validate_files(args: &[String]) -> Result<RunOutput, RunnerError> {
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run("validateFiles", &refs)
}

/// The CRISPR screen guide-quantification checker: `python3
/// check_guide_quant_format.py <format> <file>`.
pub fn crispr_guide_quant(guide_format_path: &str, path: &str) -> Result<RunOutput, RunnerError> {
    run(
        "python3",
        &["check_guide_quant_format.py", guide_format_path, path],
    )
}

/// The CRISPR screen PAM-proximal litmus checker: `python3 check_PAM.py
/// <file> <reference.fasta>`.
pub fn crispr_pam(path: &str, genome_reference_path: &str) -> Result<RunOutput, RunnerError> {
    run("python3", &["check_PAM.py", path, genome_reference_path])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_exit_status_and_stdout() {
        let output = run("true", &[]).unwrap();
        assert!(output.success());
    }

    #[test]
    fn run_checked_converts_failure_to_error() {
        let err = run_checked("false", &[]).unwrap_err();
        assert!(matches!(err, RunnerError::NonZeroExit { .. }));
    }

    #[test]
    fn spawn_error_surfaces_for_missing_binary() {
        let err = run("definitely-not-a-real-binary-xyz", &[]).unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}

//! Core library for the `checkfiles` file-checking pipeline: the data
//! model, portal client, subprocess runners, format validator table,
//! fastq/BAM analyzers, conflict detector, CRISPR sub-validator, platform
//! resolver, and PATCH decision logic described in `spec.md` §3-4.
//!
//! This crate is the engine; `checkfiles_core` has no opinion on CLI
//! parsing, job sourcing, worker scheduling, or report formatting — those
//! live in the `checkfiles` binary crate, which is the only consumer that
//! knows how many workers to run and where to write reports.

pub mod bam;
pub mod conflicts;
pub mod crispr;
pub mod error;
pub mod fastq;
pub mod format_validator;
pub mod model;
pub mod patch;
pub mod platform;
pub mod portal;
pub mod runners;

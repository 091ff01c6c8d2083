//! §4.F BAM analyzer: derives `mapped_run_type` and `mapped_read_length`
//! from `samtools stats` summary-number (`SN`) lines. A BAM carries no
//! platform link of its own; that's resolved from its fastq ancestry by
//! `platform::get_platform_from_bams`.

use std::collections::HashMap;

use crate::error::JobErrorKind;
use crate::runners::samtools_stats;

/// Parses the `SN\t<key>:\t<value>` lines of `samtools stats` output into a
/// lookup table keyed by the label with its trailing colon stripped.
fn parse_sn_lines(stats_stdout: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in stats_stdout.lines() {
        if let Some(rest) = line.strip_prefix("SN\t") {
            if let Some((key, value)) = rest.split_once('\t') {
                let key = key.trim_end_matches(':').to_string();
                let value = value.split('\t').next().unwrap_or(value).trim().to_string();
                map.insert(key, value);
            }
        }
    }
    map
}

/// `single-ended` vs `paired-ended`, derived from the proportion of reads
/// flagged paired in `samtools stats`' summary numbers.
pub fn get_mapped_run_type_bam(stats_stdout: &str) -> Option<String> {
    let sn = parse_sn_lines(stats_stdout);
    let raw_total: u64 = sn.get("raw total sequences")?.parse().ok()?;
    if raw_total == 0 {
        return None;
    }
    let reads_paired: u64 = sn.get("reads paired")?.parse().ok()?;
    if reads_paired > 0 {
        Some("paired-ended".to_string())
    } else {
        Some("single-ended".to_string())
    }
}

/// The single most common read length among mapped reads, derived from the
/// `RL\t<length>\t<count>` histogram lines the way the original's pipeline
/// `grep '^RL' | cut -f 2- | sort -k2 -n -r | head -1` picks the length
/// with the highest read count (first field of that top sorted row).
pub fn get_mapped_read_length_bam(stats_stdout: &str) -> Option<u32> {
    stats_stdout
        .lines()
        .filter_map(|line| line.strip_prefix("RL\t"))
        .filter_map(|rest| {
            let mut fields = rest.split('\t');
            let length: u32 = fields.next()?.trim().parse().ok()?;
            let count: u64 = fields.next()?.trim().parse().ok()?;
            Some((length, count))
        })
        .max_by_key(|(_, count)| *count)
        .map(|(length, _)| length)
}

/// Runs `samtools stats` and extracts both mapped properties in one pass,
/// returning `MissingMappedProperties` when neither can be determined
/// (e.g. an empty or header-only BAM).
pub fn analyze_bam(path: &str) -> Result<(Option<String>, Option<u32>), JobErrorKind> {
    let output = samtools_stats(path)
        .map_err(|e| JobErrorKind::SamtoolsStats(e.to_string()))?;
    if !output.success() {
        return Err(JobErrorKind::SamtoolsStats(output.stderr));
    }

    let run_type = get_mapped_run_type_bam(&output.stdout);
    let read_length = get_mapped_read_length_bam(&output.stdout);

    if run_type.is_none() && read_length.is_none() {
        return Err(JobErrorKind::MissingMappedProperties);
    }

    Ok((run_type, read_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STATS: &str = "SN\traw total sequences:\t1000\t# comment\n\
SN\treads paired:\t1000\t# comment\n\
RL\t100\t50\n\
RL\t101\t950\n";

    #[test]
    fn extracts_paired_run_type() {
        assert_eq!(
            get_mapped_run_type_bam(SAMPLE_STATS),
            Some("paired-ended".to_string())
        );
    }

    #[test]
    fn extracts_most_common_read_length_from_rl_histogram() {
        assert_eq!(get_mapped_read_length_bam(SAMPLE_STATS), Some(101));
    }

    #[test]
    fn single_ended_when_no_reads_paired() {
        let stats = "SN\traw total sequences:\t500\t\nSN\treads paired:\t0\t\n";
        assert_eq!(
            get_mapped_run_type_bam(stats),
            Some("single-ended".to_string())
        );
    }

    #[test]
    fn empty_stats_yields_no_properties() {
        assert_eq!(get_mapped_run_type_bam(""), None);
        assert_eq!(get_mapped_read_length_bam(""), None);
    }
}

//! §4.D Format validator: decides the `validateFiles` invocation per
//! `(file_format, file_format_type)`.
//!
//! The lookup table is an immutable, pure function of its inputs — no
//! global mutable maps, per §9's "re-architected patterns" note. Building
//! the argv is split from running it (see `crate::runners`).

use std::path::{Path, PathBuf};

/// One entry's resolved argv, prior to the trailing `<path>` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateArgs {
    pub args: Vec<String>,
}

/// Outcome of consulting the format table for a given record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatPlan {
    /// Format is opaque to `validateFiles`; no invocation.
    Opaque,
    /// `validateFiles` is skipped for BAM subreads.
    SkipSubreads,
    /// Record declares a chromInfo-bearing entry but is missing `assembly`.
    MissingAssembly,
    /// Run `validateFiles` with these args (chromInfo/`.as` already resolved).
    Run(ValidateArgs),
}

fn normalize_assembly(assembly: Option<&str>) -> Option<String> {
    match assembly {
        Some("GRCh38-minimal") => Some("GRCh38".to_string()),
        Some("mm10-minimal") => Some("mm10".to_string()),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}

/// Resolves the `-chromInfo=` argument for non-BAM-alignment formats, and
/// the BAM alignment/subread special cases, per §4.D.
fn resolve_chrom_info(
    enc_val_data: &Path,
    file_format: &str,
    output_type: Option<&str>,
    assembly: Option<&str>,
    genome_annotation: Option<&str>,
) -> Result<Option<String>, FormatPlan> {
    let assembly = normalize_assembly(assembly);

    if file_format == "bam"
        && matches!(
            output_type,
            Some("transcriptome alignments")
                | Some("gene alignments")
                | Some("redacted transcriptome alignments")
        )
    {
        let assembly = assembly.ok_or(FormatPlan::MissingAssembly)?;
        let annotation = genome_annotation.ok_or(FormatPlan::MissingAssembly)?;
        let file = if output_type == Some("gene alignments") {
            "gene.sizes"
        } else {
            "chrom.sizes"
        };
        return Ok(Some(format!(
            "-chromInfo={}/{}/{}/{}",
            enc_val_data.display(),
            assembly,
            annotation,
            file
        )));
    }

    if file_format == "bam" && output_type == Some("subreads") {
        return Ok(None);
    }

    let assembly = match assembly {
        Some(a) => a,
        None => return Ok(None), // resolved lazily: table entries without chromInfo don't need it
    };
    Ok(Some(format!(
        "-chromInfo={}/{}/chrom.sizes",
        enc_val_data.display(),
        assembly
    )))
}

/// Table entry template; `ChromInfo` is substituted with the resolved
/// `-chromInfo=...` string (or dropped if the entry doesn't need it) and
/// `%s` placeholders in `.as` paths are substituted with `enc_val_data`.
enum Entry {
    None,
    Args(&'static [&'static str]),
    ArgsChromInfo(&'static [&'static str]),
    ArgsChromInfoAs(&'static [&'static str], &'static str),
}

fn table_entry(file_format: &str, file_format_type: Option<&str>) -> Option<Entry> {
    use Entry::*;
    Some(match (file_format, file_format_type) {
        ("fasta", None) => Args(&["-type=fasta"]),
        ("fastq", None) => Args(&["-type=fastq"]),
        ("bam", None) => ArgsChromInfo(&["-type=bam"]),
        ("bigWig", None) => ArgsChromInfo(&["-type=bigWig"]),
        ("bigInteract", None) => ArgsChromInfoAs(&["-type=bigBed5+13"], "interact.as"),
        ("bed", Some("bed3")) => ArgsChromInfo(&["-type=bed3"]),
        ("bigBed", Some("bed3")) => ArgsChromInfo(&["-type=bigBed3"]),
        ("bed", Some("bed5")) => ArgsChromInfo(&["-type=bed5"]),
        ("bigBed", Some("bed5")) => ArgsChromInfo(&["-type=bigBed5"]),
        ("bed", Some("bed6")) => ArgsChromInfo(&["-type=bed6"]),
        ("bigBed", Some("bed6")) => ArgsChromInfo(&["-type=bigBed6"]),
        ("bed", Some("bed9")) => ArgsChromInfo(&["-type=bed9"]),
        ("bigBed", Some("bed9")) => ArgsChromInfo(&["-type=bigBed9"]),
        ("bedGraph", None) => ArgsChromInfo(&["-type=bedGraph"]),
        ("bed", Some("bed3+")) => ArgsChromInfo(&["-tab", "-type=bed3+"]),
        ("bigBed", Some("bed3+")) => ArgsChromInfo(&["-tab", "-type=bigBed3+"]),
        ("bed", Some("bed6+")) => ArgsChromInfo(&["-tab", "-type=bed6+"]),
        ("bigBed", Some("bed6+")) => ArgsChromInfo(&["-tab", "-type=bigBed6+"]),
        ("bed", Some("bed9+")) => ArgsChromInfo(&["-tab", "-type=bed9+"]),
        ("bigBed", Some("bed9+")) => ArgsChromInfo(&["-tab", "-type=bigBed9+"]),
        ("bed", Some("unknown")) => ArgsChromInfo(&["-tab", "-type=bed3+"]),
        ("bigBed", Some("unknown")) => ArgsChromInfo(&["-tab", "-type=bigBed3+"]),
        ("bed", Some("bedLogR")) => ArgsChromInfoAs(&["-type=bed9+1"], "bedLogR.as"),
        ("bigBed", Some("bedLogR")) => ArgsChromInfoAs(&["-type=bigBed9+1"], "bedLogR.as"),
        ("bed", Some("bedMethyl")) => ArgsChromInfoAs(&["-type=bed9+2"], "bedMethyl.as"),
        ("bigBed", Some("bedMethyl")) => ArgsChromInfoAs(&["-type=bigBed9+2"], "bedMethyl.as"),
        ("bed", Some("broadPeak")) => ArgsChromInfoAs(&["-type=bed6+3"], "broadPeak.as"),
        ("bigBed", Some("broadPeak")) => ArgsChromInfoAs(&["-type=bigBed6+3"], "broadPeak.as"),
        ("bed", Some("gappedPeak")) => ArgsChromInfoAs(&["-type=bed12+3"], "gappedPeak.as"),
        ("bigBed", Some("gappedPeak")) => ArgsChromInfoAs(&["-type=bigBed12+3"], "gappedPeak.as"),
        ("bed", Some("narrowPeak")) => ArgsChromInfoAs(&["-type=bed6+4"], "narrowPeak.as"),
        ("bigBed", Some("narrowPeak")) => ArgsChromInfoAs(&["-type=bigBed6+4"], "narrowPeak.as"),
        ("bed", Some("bedRnaElements")) => ArgsChromInfoAs(&["-type=bed6+3"], "bedRnaElements.as"),
        ("bigBed", Some("bedRnaElements")) => {
            ArgsChromInfoAs(&["-type=bed6+3"], "bedRnaElements.as")
        }
        ("bed", Some("bedExonScore")) => ArgsChromInfoAs(&["-type=bed6+3"], "bedExonScore.as"),
        ("bigBed", Some("bedExonScore")) => {
            ArgsChromInfoAs(&["-type=bigBed6+3"], "bedExonScore.as")
        }
        ("bed", Some("bedRrbs")) => ArgsChromInfoAs(&["-type=bed9+2"], "bedRrbs.as"),
        ("bigBed", Some("bedRrbs")) => ArgsChromInfoAs(&["-type=bigBed9+2"], "bedRrbs.as"),
        ("bed", Some("enhancerAssay")) => ArgsChromInfoAs(&["-type=bed9+1"], "enhancerAssay.as"),
        ("bigBed", Some("enhancerAssay")) => {
            ArgsChromInfoAs(&["-type=bigBed9+1"], "enhancerAssay.as")
        }
        ("bed", Some("modPepMap")) => ArgsChromInfoAs(&["-type=bed9+7"], "modPepMap.as"),
        ("bigBed", Some("modPepMap")) => ArgsChromInfoAs(&["-type=bigBed9+7"], "modPepMap.as"),
        ("bed", Some("pepMap")) => ArgsChromInfoAs(&["-type=bed9+7"], "pepMap.as"),
        ("bigBed", Some("pepMap")) => ArgsChromInfoAs(&["-type=bigBed9+7"], "pepMap.as"),
        ("bed", Some("openChromCombinedPeaks")) => {
            ArgsChromInfoAs(&["-type=bed9+12"], "openChromCombinedPeaks.as")
        }
        ("bigBed", Some("openChromCombinedPeaks")) => {
            ArgsChromInfoAs(&["-type=bigBed9+12"], "openChromCombinedPeaks.as")
        }
        ("bed", Some("peptideMapping")) => ArgsChromInfoAs(&["-type=bed6+4"], "peptideMapping.as"),
        ("bigBed", Some("peptideMapping")) => {
            ArgsChromInfoAs(&["-type=bigBed6+4"], "peptideMapping.as")
        }
        ("bed", Some("shortFrags")) => ArgsChromInfoAs(&["-type=bed6+21"], "shortFrags.as"),
        ("bigBed", Some("shortFrags")) => ArgsChromInfoAs(&["-type=bigBed6+21"], "shortFrags.as"),
        ("bed", Some("encode_elements_H3K27ac")) => {
            ArgsChromInfoAs(&["-tab", "-type=bed9+1"], "encode_elements_H3K27ac.as")
        }
        ("bigBed", Some("encode_elements_H3K27ac")) => {
            ArgsChromInfoAs(&["-tab", "-type=bigBed9+1"], "encode_elements_H3K27ac.as")
        }
        ("bed", Some("encode_elements_H3K9ac")) => {
            ArgsChromInfoAs(&["-tab", "-type=bed9+1"], "encode_elements_H3K9ac.as")
        }
        ("bigBed", Some("encode_elements_H3K9ac")) => {
            ArgsChromInfoAs(&["-tab", "-type=bigBed9+1"], "encode_elements_H3K9ac.as")
        }
        ("bed", Some("encode_elements_H3K4me1")) => {
            ArgsChromInfoAs(&["-tab", "-type=bed9+1"], "encode_elements_H3K4me1.as")
        }
        ("bigBed", Some("encode_elements_H3K4me1")) => {
            ArgsChromInfoAs(&["-tab", "-type=bigBed9+1"], "encode_elements_H3K4me1.as")
        }
        ("bed", Some("encode_elements_H3K4me3")) => {
            ArgsChromInfoAs(&["-tab", "-type=bed9+1"], "encode_elements_H3K4me3.as")
        }
        ("bigBed", Some("encode_elements_H3K4me3")) => {
            ArgsChromInfoAs(&["-tab", "-type=bigBed9+1"], "encode_elements_H3K4me3.as")
        }
        ("bed", Some("dnase_master_peaks")) => {
            ArgsChromInfoAs(&["-tab", "-type=bed9+1"], "dnase_master_peaks.as")
        }
        ("bigBed", Some("dnase_master_peaks")) => {
            ArgsChromInfoAs(&["-tab", "-type=bigBed9+1"], "dnase_master_peaks.as")
        }
        ("bed", Some("encode_elements_dnase_tf")) => {
            ArgsChromInfoAs(&["-tab", "-type=bed5+1"], "encode_elements_dnase_tf.as")
        }
        ("bigBed", Some("encode_elements_dnase_tf")) => {
            ArgsChromInfoAs(&["-tab", "-type=bigBed5+1"], "encode_elements_dnase_tf.as")
        }
        ("bed", Some("candidate enhancer predictions")) => {
            ArgsChromInfoAs(&["-type=bed3+"], "candidate_enhancer_prediction.as")
        }
        ("bigBed", Some("candidate enhancer predictions")) => {
            ArgsChromInfoAs(&["-type=bigBed3+"], "candidate_enhancer_prediction.as")
        }
        ("bed", Some("enhancer predictions")) => {
            ArgsChromInfoAs(&["-type=bed3+"], "enhancer_prediction.as")
        }
        ("bigBed", Some("enhancer predictions")) => {
            ArgsChromInfoAs(&["-type=bigBed3+"], "enhancer_prediction.as")
        }
        ("bed", Some("idr_peak")) => ArgsChromInfoAs(&["-type=bed6+"], "idr_peak.as"),
        ("bigBed", Some("idr_peak")) => ArgsChromInfoAs(&["-type=bigBed6+"], "idr_peak.as"),
        ("bed", Some("tss_peak")) => ArgsChromInfoAs(&["-type=bed6+"], "tss_peak.as"),
        ("bigBed", Some("tss_peak")) => ArgsChromInfoAs(&["-type=bigBed6+"], "tss_peak.as"),
        ("bed", Some("idr_ranked_peak")) => {
            ArgsChromInfoAs(&["-type=bed6+14"], "idr_ranked_peak.as")
        }
        ("bed", Some("element enrichments")) => {
            ArgsChromInfoAs(&["-type=bed6+5"], "mpra_starr.as")
        }
        ("bigBed", Some("element enrichments")) => {
            ArgsChromInfoAs(&["-type=bigBed6+5"], "mpra_starr.as")
        }
        ("bed", Some("CRISPR element quantifications")) => {
            ArgsChromInfoAs(&["-type=bed3+22"], "element_quant_format.as")
        }
        ("bedpe", None) => ArgsChromInfo(&["-type=bed3+"]),
        ("bedpe", Some("mango")) => ArgsChromInfo(&["-type=bed3+"]),
        ("rcc", None) => Args(&["-type=rcc"]),
        ("idat", None) => Args(&["-type=idat"]),
        ("gtf", None) => None,
        ("tagAlign", None) => ArgsChromInfo(&["-type=tagAlign"]),
        ("tar", None) => None,
        ("tsv", None) => None,
        ("csv", None) => None,
        ("2bit", None) => None,
        ("csfasta", None) => Args(&["-type=csfasta"]),
        ("csqual", None) => Args(&["-type=csqual"]),
        ("CEL", None) => None,
        ("sam", None) => None,
        ("wig", None) => None,
        ("hdf5", None) => None,
        ("hic", None) => None,
        ("gff", None) => None,
        ("vcf", None) => None,
        ("btr", None) => None,
        _ => return None,
    })
}

/// Resolves a full `FormatPlan` for a file record.
pub fn plan(
    enc_val_data: &Path,
    file_format: &str,
    file_format_type: Option<&str>,
    output_type: Option<&str>,
    assembly: Option<&str>,
    genome_annotation: Option<&str>,
) -> FormatPlan {
    if file_format == "bam" && output_type == Some("subreads") {
        return FormatPlan::SkipSubreads;
    }

    let chrom_info = match resolve_chrom_info(
        enc_val_data,
        file_format,
        output_type,
        assembly,
        genome_annotation,
    ) {
        Ok(v) => v,
        Err(plan) => return plan,
    };

    let entry = match table_entry(file_format, file_format_type) {
        Some(e) => e,
        None => return FormatPlan::Opaque,
    };

    let (base_args, as_file): (&[&str], Option<&str>) = match &entry {
        Entry::None => return FormatPlan::Opaque,
        Entry::Args(a) => (a, None),
        Entry::ArgsChromInfo(a) => (a, None),
        Entry::ArgsChromInfoAs(a, as_name) => (a, Some(as_name)),
    };

    let needs_chrom_info = matches!(entry, Entry::ArgsChromInfo(_) | Entry::ArgsChromInfoAs(..));
    if needs_chrom_info && chrom_info.is_none() {
        return FormatPlan::MissingAssembly;
    }

    let mut args: Vec<String> = base_args.iter().map(|s| s.to_string()).collect();
    if let Some(ci) = chrom_info {
        args.push(ci);
    }
    if let Some(as_name) = as_file {
        args.push(format!("-as={}/as/{}", enc_val_data.display(), as_name));
    }

    FormatPlan::Run(ValidateArgs { args })
}

/// Path to the scratch `<accession>_modified.bed` file for a gzip-bed job
/// whose comment lines were stripped, following the original's
/// `local_path[-18:-7] + '_modified.bed'` slice (the 11 characters before
/// the final 7, which for an S3 mirror path of the form
/// `.../<accession>.bed.gz` select the accession).
pub fn modified_bed_scratch_path(local_path: &Path) -> PathBuf {
    let s = local_path.to_string_lossy();
    let bytes: Vec<char> = s.chars().collect();
    let len = bytes.len();
    let start = len.saturating_sub(18);
    let end = len.saturating_sub(7);
    let slice: String = bytes[start..end.max(start)].iter().collect();
    local_path
        .parent()
        .map(|p| p.join(format!("{slice}_modified.bed")))
        .unwrap_or_else(|| PathBuf::from(format!("{slice}_modified.bed")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_formats_skip_validation() {
        let p = plan(Path::new("/opt/encValData"), "tar", None, None, None, None);
        assert_eq!(p, FormatPlan::Opaque);
    }

    #[test]
    fn subreads_skip_entirely() {
        let p = plan(
            Path::new("/opt/encValData"),
            "bam",
            None,
            Some("subreads"),
            None,
            None,
        );
        assert_eq!(p, FormatPlan::SkipSubreads);
    }

    #[test]
    fn narrow_peak_needs_assembly() {
        let p = plan(
            Path::new("/opt/encValData"),
            "bed",
            Some("narrowPeak"),
            None,
            None,
            None,
        );
        assert_eq!(p, FormatPlan::MissingAssembly);
    }

    #[test]
    fn narrow_peak_resolves_chrom_info_and_as() {
        let p = plan(
            Path::new("/opt/encValData"),
            "bed",
            Some("narrowPeak"),
            None,
            Some("GRCh38"),
            None,
        );
        match p {
            FormatPlan::Run(args) => {
                assert!(args.args.contains(&"-type=bed6+4".to_string()));
                assert!(args
                    .args
                    .iter()
                    .any(|a| a == "-chromInfo=/opt/encValData/GRCh38/chrom.sizes"));
                assert!(args
                    .args
                    .iter()
                    .any(|a| a == "-as=/opt/encValData/as/narrowPeak.as"));
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn minimal_assembly_aliases_collapse() {
        let p = plan(
            Path::new("/opt/encValData"),
            "bigWig",
            None,
            None,
            Some("GRCh38-minimal"),
            None,
        );
        match p {
            FormatPlan::Run(args) => assert!(args
                .args
                .iter()
                .any(|a| a == "-chromInfo=/opt/encValData/GRCh38/chrom.sizes")),
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn bam_transcriptome_alignment_needs_assembly_and_annotation() {
        let p = plan(
            Path::new("/opt/encValData"),
            "bam",
            None,
            Some("transcriptome alignments"),
            None,
            Some("V29"),
        );
        assert_eq!(p, FormatPlan::MissingAssembly);
    }

    #[test]
    fn bam_gene_alignment_uses_gene_sizes() {
        let p = plan(
            Path::new("/opt/encValData"),
            "bam",
            None,
            Some("gene alignments"),
            Some("mm10"),
            Some("M21"),
        );
        match p {
            FormatPlan::Run(args) => assert!(args
                .args
                .iter()
                .any(|a| a == "-chromInfo=/opt/encValData/mm10/M21/gene.sizes")),
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn modified_bed_scratch_path_slices_accession() {
        let p = modified_bed_scratch_path(Path::new("/mirror/encode/ENCFF000ABC.bed.gz"));
        assert_eq!(p, PathBuf::from("/mirror/encode/ENCFF000ABC_modified.bed"));
    }
}

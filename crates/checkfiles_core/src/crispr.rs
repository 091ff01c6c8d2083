//! §4.J CRISPR screen sub-validator: guide-quantification and PAM-proximal
//! checks for `guide quantifications`/`reporter sequencing` file types.

use crate::error::JobErrorKind;
use crate::runners::{crispr_guide_quant, crispr_pam};

/// NGG is the canonical SpCas9 PAM; its presence immediately downstream of
/// the spacer is the litmus test `check_PAM.py` looks for.
pub const CANONICAL_PAM: &str = "NGG";

/// Substring `check_guide_quant_format.py` writes on each line that passed.
const GUIDE_QUANT_LITMUS: &str = "passed";

/// Substring `check_PAM.py`'s third output line carries when ≥80% of PAMs
/// resolve to NGG.
const PAM_LITMUS: &str = "More than 80% of the PAMs are NGG";

/// Default guide-quant format reference shipped alongside the validator.
pub const DEFAULT_GUIDE_FORMAT_PATH: &str = "/opt/ENCODE_CRISPR_Validation/guide_quant_format.txt";

/// Default genome reference fasta the PAM checker aligns spacers against.
pub const DEFAULT_GENOME_REFERENCE_PATH: &str =
    "/opt/GRCh38_no_alt_analysis_set_GCA_000001405.15.fasta";

/// Runs the guide-quantification checker against a guide-quant matrix file.
/// Every non-blank stdout line must contain `passed`; the first one that
/// doesn't is reported as the error, per §4.J.
pub fn validate_guide_quant(guide_format_path: &str, path: &str) -> Result<(), JobErrorKind> {
    let output = crispr_guide_quant(guide_format_path, path)
        .map_err(|e| JobErrorKind::CrisprGuideQuant(e.to_string()))?;
    for line in output.stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.contains(GUIDE_QUANT_LITMUS) {
            return Err(JobErrorKind::CrisprGuideQuant(line.to_string()));
        }
    }
    Ok(())
}

/// Runs the PAM-proximal litmus check against a spacer/guide reference.
/// The fourth line of stdout (index 3) must contain the NGG litmus string,
/// per §4.J.
pub fn validate_pam(path: &str, genome_reference_path: &str) -> Result<(), JobErrorKind> {
    let output =
        crispr_pam(path, genome_reference_path).map_err(|e| JobErrorKind::CrisprPam(e.to_string()))?;
    match output.stdout.lines().nth(3) {
        Some(line) if line.contains(PAM_LITMUS) => Ok(()),
        Some(line) => Err(JobErrorKind::CrisprPam(line.trim().to_string())),
        None => Ok(()),
    }
}

/// Runs the full guide-quant + PAM validation pass against `path`, using
/// the fixed reference files the ENCODE CRISPR group's scripts expect.
/// The PAM check only runs if the guide-quant check passed, per §4.J.
pub fn validate_crispr(path: &str) -> Result<(), JobErrorKind> {
    validate_guide_quant(DEFAULT_GUIDE_FORMAT_PATH, path)?;
    validate_pam(path, DEFAULT_GENOME_REFERENCE_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pam_is_ngg() {
        assert_eq!(CANONICAL_PAM, "NGG");
    }
}

//! §4.G Conflict detector support: compares two files' `flowcell_details`
//! sets. The portal queries that actually drive content-md5/fastq-signature
//! conflict detection live in `checkfiles::coordinator`, since they need a
//! live `PortalClient` rather than a pre-fetched sibling list.

use std::collections::HashSet;

use crate::model::FlowcellDetail;

/// Builds the set of `(lane, barcode)` pairs for one file's
/// `flowcell_details`, matching `create_a_list_of_barcodes`.
fn barcode_set(details: &[FlowcellDetail]) -> HashSet<(Option<String>, Option<String>)> {
    details
        .iter()
        .map(|d| (d.lane.clone(), d.barcode.clone()))
        .collect()
}

/// True if the two sets of `(lane, barcode)` pairs share at least one
/// entry. Used by §4.G's prefix-only fastq-signature conflict exception: a
/// shared `flowcell:lane` prefix is not a conflict when both files'
/// `flowcell_details` name an overlapping (lane, barcode).
pub fn flowcell_details_intersect(
    details_1: &[FlowcellDetail],
    details_2: &[FlowcellDetail],
) -> bool {
    let set_1 = barcode_set(details_1);
    barcode_set(details_2).iter().any(|pair| set_1.contains(pair))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(lane: &str, barcode: &str) -> FlowcellDetail {
        FlowcellDetail {
            lane: Some(lane.to_string()),
            barcode: Some(barcode.to_string()),
        }
    }

    #[test]
    fn flowcell_details_intersect_detects_shared_entry() {
        let a = vec![detail("1", "AAAA"), detail("2", "CCCC")];
        let b = vec![detail("2", "CCCC"), detail("3", "GGGG")];
        assert!(flowcell_details_intersect(&a, &b));
    }

    #[test]
    fn flowcell_details_intersect_is_false_for_disjoint_sets() {
        let a = vec![detail("1", "AAAA")];
        let b = vec![detail("2", "CCCC")];
        assert!(!flowcell_details_intersect(&a, &b));
    }

    #[test]
    fn flowcell_details_intersect_true_for_identical_sets() {
        let a = vec![detail("1", "AAAA"), detail("2", "CCCC")];
        let b = vec![detail("2", "CCCC"), detail("1", "AAAA")];
        assert!(flowcell_details_intersect(&a, &b));
    }
}

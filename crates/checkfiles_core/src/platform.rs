//! §4.K Platform resolver: walks a file's `derived_from` closure to find
//! every fastq sibling's platform UUID, and resolves a portal-side
//! `read_name_details` override.

use std::collections::HashSet;

use serde_json::Value;

use crate::fastq::ReadNameDetails;

/// The minimal file-lookup capability platform resolution needs from the
/// portal client, kept as a trait so this module can be tested without a
/// live HTTP client.
pub trait FileLookup {
    /// Fetches a file record's `item` dict by `@id`.
    fn get_item(&self, at_id: &str) -> Option<Value>;
}

fn derived_from_of(item: &Value) -> Vec<String> {
    item.get("derived_from")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// BFS over the `derived_from` DAG, returning every file `@id` reachable
/// from `seed` (seed included). Mirrors the original's explicit
/// frontier/visited-set loop: each round unions the current frontier into
/// the visited set, expands it by one hop, then subtracts what's already
/// visited so cycles terminate instead of looping forever.
pub fn get_all_derived_from(seed: &str, lookup: &dyn FileLookup) -> HashSet<String> {
    let mut derived_from_list: HashSet<String> = HashSet::new();
    let mut remaining: HashSet<String> = HashSet::from([seed.to_string()]);

    while !remaining.is_empty() {
        derived_from_list.extend(remaining.iter().cloned());

        let mut next_remaining: HashSet<String> = HashSet::new();
        for at_id in &remaining {
            if let Some(item) = lookup.get_item(at_id) {
                next_remaining.extend(derived_from_of(&item));
            }
        }

        remaining = next_remaining
            .difference(&derived_from_list)
            .cloned()
            .collect();
    }

    derived_from_list
}

/// Resolves the platform UUID for a file: follows its `platform` link (an
/// `@id`) with a second portal GET and reads that object's `uuid`. If the
/// second GET can't resolve the linked object, falls back to the raw
/// `@id` itself (better than silently dropping the platform) rather than
/// treating the unresolved link as already being the UUID.
pub fn get_platform_uuid(item: &Value, lookup: &dyn FileLookup) -> Option<String> {
    let platform_id = item.get("platform").and_then(Value::as_str)?;
    match lookup.get_item(platform_id) {
        Some(platform_item) => platform_item
            .get("uuid")
            .and_then(Value::as_str)
            .map(String::from),
        None => Some(platform_id.to_string()),
    }
}

/// Walks `file_at_id`'s `derived_from` closure, resolving the platform
/// UUID of every fastq file found in it. Used to gate BAM analysis on the
/// platform(s) of the fastqs a BAM was derived from, since a BAM carries
/// no platform link of its own.
pub fn get_platform_from_bams(file_at_id: &str, lookup: &dyn FileLookup) -> HashSet<String> {
    let derived_from_list = get_all_derived_from(file_at_id, lookup);
    let mut platforms = HashSet::new();
    for at_id in &derived_from_list {
        let Some(item) = lookup.get_item(at_id) else {
            continue;
        };
        if item.get("file_format").and_then(Value::as_str) != Some("fastq") {
            continue;
        }
        if let Some(uuid) = get_platform_uuid(&item, lookup) {
            platforms.insert(uuid);
        }
    }
    platforms
}

/// Resolves a portal-supplied `read_name_details` override from a file
/// item's `platform` sub-object, if present.
pub fn get_read_name_details(item: &Value) -> Option<ReadNameDetails> {
    let details = item.get("read_name_details")?;
    Some(ReadNameDetails {
        flowcell_id_location: details.get("flowcell_id_location")?.as_u64()? as usize,
        lane_id_location: details.get("lane_id_location")?.as_u64()? as usize,
        read_number_location: details
            .get("read_number_location")
            .and_then(Value::as_u64)
            .map(|v| v as usize),
        barcode_location: details
            .get("barcode_location")
            .and_then(Value::as_u64)
            .map(|v| v as usize),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeLookup(HashMap<String, Value>);

    impl FileLookup for FakeLookup {
        fn get_item(&self, at_id: &str) -> Option<Value> {
            self.0.get(at_id).cloned()
        }
    }

    #[test]
    fn bfs_collects_transitive_derived_from_and_terminates_on_cycle() {
        let mut files = HashMap::new();
        files.insert("/files/a/".to_string(), json!({"derived_from": ["/files/b/"]}));
        files.insert("/files/b/".to_string(), json!({"derived_from": ["/files/c/"]}));
        // c derives from a, forming a cycle.
        files.insert("/files/c/".to_string(), json!({"derived_from": ["/files/a/"]}));
        let lookup = FakeLookup(files);

        let all = get_all_derived_from("/files/a/", &lookup);
        assert_eq!(
            all,
            HashSet::from([
                "/files/a/".to_string(),
                "/files/b/".to_string(),
                "/files/c/".to_string(),
            ])
        );
    }

    #[test]
    fn bfs_handles_missing_items_gracefully() {
        let lookup = FakeLookup(HashMap::new());
        let all = get_all_derived_from("/files/missing/", &lookup);
        assert_eq!(all, HashSet::from(["/files/missing/".to_string()]));
    }

    #[test]
    fn platform_uuid_dereferences_platform_link() {
        let mut files = HashMap::new();
        files.insert(
            "/platforms/illumina-novaseq/".to_string(),
            json!({"uuid": "9d2bff4c-5f5a-4e21-9b5d-8f6a2f2f9e11"}),
        );
        let lookup = FakeLookup(files);
        let item = json!({"platform": "/platforms/illumina-novaseq/"});
        assert_eq!(
            get_platform_uuid(&item, &lookup),
            Some("9d2bff4c-5f5a-4e21-9b5d-8f6a2f2f9e11".to_string())
        );
    }

    #[test]
    fn platform_uuid_falls_back_to_raw_link_when_unresolvable() {
        let lookup = FakeLookup(HashMap::new());
        let item = json!({"platform": "/platforms/missing/"});
        assert_eq!(
            get_platform_uuid(&item, &lookup),
            Some("/platforms/missing/".to_string())
        );
    }

    #[test]
    fn platform_uuid_absent_when_no_platform_link() {
        let lookup = FakeLookup(HashMap::new());
        assert_eq!(get_platform_uuid(&json!({}), &lookup), None);
    }

    #[test]
    fn platform_from_bams_collects_fastq_sibling_platforms() {
        let mut files = HashMap::new();
        files.insert(
            "/files/bam1/".to_string(),
            json!({"derived_from": ["/files/fastq1/", "/files/fastq2/"]}),
        );
        files.insert(
            "/files/fastq1/".to_string(),
            json!({"file_format": "fastq", "platform": "/platforms/a/"}),
        );
        files.insert(
            "/files/fastq2/".to_string(),
            json!({"file_format": "fastq", "platform": "/platforms/b/"}),
        );
        files.insert("/platforms/a/".to_string(), json!({"uuid": "uuid-a"}));
        files.insert("/platforms/b/".to_string(), json!({"uuid": "uuid-b"}));
        let lookup = FakeLookup(files);

        let platforms = get_platform_from_bams("/files/bam1/", &lookup);
        assert_eq!(
            platforms,
            HashSet::from(["uuid-a".to_string(), "uuid-b".to_string()])
        );
    }

    #[test]
    fn platform_from_bams_ignores_non_fastq_siblings() {
        let mut files = HashMap::new();
        files.insert(
            "/files/bam1/".to_string(),
            json!({"derived_from": ["/files/other/"]}),
        );
        files.insert(
            "/files/other/".to_string(),
            json!({"file_format": "bam", "platform": "/platforms/a/"}),
        );
        let lookup = FakeLookup(files);

        assert!(get_platform_from_bams("/files/bam1/", &lookup).is_empty());
    }

    #[test]
    fn read_name_details_parses_full_override() {
        let item = json!({
            "read_name_details": {
                "flowcell_id_location": 2,
                "lane_id_location": 3,
                "read_number_location": 4,
                "barcode_location": 7
            }
        });
        let details = get_read_name_details(&item).unwrap();
        assert_eq!(details.flowcell_id_location, 2);
        assert_eq!(details.barcode_location, Some(7));
    }

    #[test]
    fn read_name_details_absent_returns_none() {
        assert!(get_read_name_details(&json!({})).is_none());
    }
}

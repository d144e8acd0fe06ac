//! Row-tracking (spec §4.3/§4.5): assigns each newly added file a stable base row id out of a
//! monotonically increasing high-water mark stored in the `delta.rowTracking` system domain, and
//! stamps the commit version files were added in so later deletes/updates can address individual
//! rows.
//!
//! There's no dedicated teacher file for this; grounded in the same "system domain with a JSON
//! blob payload" shape `domain_metadata.rs`/`actions.rs::row_tracking_domain_metadata` already
//! establish, applied here to the specific watermark-bump arithmetic spec.md calls for.

use crate::actions::{row_tracking_domain_metadata, Add, DomainMetadata};
use crate::{DeltaResult, Error, Version};

/// Assigns `base_row_id` (from the current watermark) and `default_row_commit_version` (the
/// version this transaction is about to commit as) to every add that doesn't already carry one,
/// then returns the new watermark and the updated adds.
pub fn assign_row_ids(
    adds: Vec<Add>,
    current_high_water_mark: i64,
    commit_version: Version,
) -> DeltaResult<(Vec<Add>, i64)> {
    // The watermark records the highest row id already handed out, so the next one starts one
    // past it.
    let mut next_id = current_high_water_mark + 1;
    let mut out = Vec::with_capacity(adds.len());
    for mut add in adds {
        if add.base_row_id.is_none() {
            let num_records = add.num_records().unwrap_or(0).max(0);
            add.base_row_id = Some(next_id);
            add.default_row_commit_version = Some(commit_version);
            next_id += num_records;
        }
        out.push(add);
    }
    Ok((out, next_id - 1))
}

pub fn watermark_domain_metadata(new_high_water_mark: i64) -> DeltaResult<DomainMetadata> {
    if new_high_water_mark < 0 {
        return Err(Error::NegativeRowIdWatermark(new_high_water_mark));
    }
    row_tracking_domain_metadata(new_high_water_mark)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_with_records(path: &str, num_records: i64) -> Add {
        Add {
            path: path.to_string(),
            stats: Some(format!("{{\"numRecords\":{num_records}}}")),
            size: 100,
            modification_time: 0,
            data_change: true,
            ..Default::default()
        }
    }

    #[test]
    fn assigns_increasing_base_row_ids() {
        let adds = vec![add_with_records("a", 10), add_with_records("b", 5)];
        let (assigned, new_watermark) = assign_row_ids(adds, 100, 7).unwrap();
        assert_eq!(assigned[0].base_row_id, Some(101));
        assert_eq!(assigned[1].base_row_id, Some(111));
        assert_eq!(new_watermark, 115);
        assert!(assigned.iter().all(|a| a.default_row_commit_version == Some(7)));
    }

    #[test]
    fn leaves_already_assigned_adds_untouched() {
        let mut add = add_with_records("a", 10);
        add.base_row_id = Some(5);
        add.default_row_commit_version = Some(1);
        let (assigned, new_watermark) = assign_row_ids(vec![add], 100, 7).unwrap();
        assert_eq!(assigned[0].base_row_id, Some(5));
        assert_eq!(new_watermark, 100);
    }
}

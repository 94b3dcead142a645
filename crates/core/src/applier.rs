//! Change-Log Applier - folds ordered reputation deltas into a new version
//!
//! A batch is applied to a staged copy of the head version and committed as
//! exactly one new version. Entries at or below the persisted watermark are
//! skipped, so re-delivering a batch is a no-op. Any failure drops the staged
//! copy; nothing from a failed batch is ever visible.

use crate::config::ApplierConfig;
use crate::store::{StagedVersion, StoreError, VersionedStore};
use crate::types::{Address, Key, ReputationValue, SequenceNumber, VersionId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("amount overflow for {key} at sequence {sequence}")]
    AmountOverflow { key: Key, sequence: SequenceNumber },

    #[error("change log out of order: {sequence} follows {previous}")]
    OutOfOrder {
        previous: SequenceNumber,
        sequence: SequenceNumber,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ApplyError>;

/// One reputation delta from the external change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub organization: Address,
    pub skill_id: u64,
    pub participant: Address,
    #[serde(with = "decimal_amount")]
    pub delta_amount: i128,
    pub sequence: SequenceNumber,
}

impl ChangeLogEntry {
    pub fn key(&self) -> Key {
        Key::derive(&self.organization, self.skill_id, &self.participant)
    }

    /// Key of the organization-wide total this entry contributes to.
    pub fn org_total_key(&self) -> Key {
        Key::derive(&self.organization, self.skill_id, &Address::ZERO)
    }
}

/// Amounts travel as decimal strings; they exceed what JSON numbers carry safely.
mod decimal_amount {
    use super::*;

    pub fn serialize<S: Serializer>(amount: &i128, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.trim().parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new version was committed.
    Committed {
        version: VersionId,
        applied: usize,
        skipped: usize,
    },
    /// Every entry was at or below the watermark; the head is unchanged.
    Unchanged { version: VersionId },
}

impl ApplyOutcome {
    pub fn version(&self) -> VersionId {
        match self {
            ApplyOutcome::Committed { version, .. } | ApplyOutcome::Unchanged { version } => *version,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, ApplyOutcome::Committed { .. })
    }
}

/// The single writer of the versioned store.
pub struct ChangeLogApplier {
    store: Arc<VersionedStore>,
    config: ApplierConfig,
}

impl ChangeLogApplier {
    pub fn new(store: Arc<VersionedStore>, config: ApplierConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    /// Apply `entries` (strictly increasing by sequence) as one version.
    pub fn apply_batch(&self, entries: &[ChangeLogEntry]) -> Result<ApplyOutcome> {
        for pair in entries.windows(2) {
            if pair[1].sequence <= pair[0].sequence {
                return Err(ApplyError::OutOfOrder {
                    previous: pair[0].sequence,
                    sequence: pair[1].sequence,
                });
            }
        }

        let mut staged = self.store.stage()?;
        let base = staged.base_version();
        let watermark = staged.watermark();
        let mut applied = 0usize;
        let mut skipped = 0usize;

        for entry in entries {
            if watermark.is_some_and(|w| entry.sequence <= w) {
                skipped += 1;
                continue;
            }

            fold(&mut staged, entry.key(), entry.delta_amount, entry.sequence)?;
            if self.config.track_org_totals && entry.participant != Address::ZERO {
                fold(&mut staged, entry.org_total_key(), entry.delta_amount, entry.sequence)?;
            }
            staged.set_watermark(entry.sequence);
            applied += 1;
        }

        if applied == 0 {
            debug!(
                version = base,
                skipped,
                watermark = ?watermark,
                "Change log batch already applied"
            );
            return Ok(ApplyOutcome::Unchanged { version: base });
        }

        let changed_keys = staged.changed_keys();
        let version = self.store.commit(staged)?;

        info!(
            version,
            applied,
            skipped,
            changed_keys,
            "Applied change log batch"
        );

        Ok(ApplyOutcome::Committed {
            version,
            applied,
            skipped,
        })
    }
}

fn fold(staged: &mut StagedVersion, key: Key, delta: i128, sequence: SequenceNumber) -> Result<()> {
    let current = staged
        .get(&key)
        .unwrap_or_else(|| ReputationValue::new(0, staged.key_count()));

    let amount = current.amount.checked_add(delta).ok_or_else(|| {
        error!(%key, sequence, delta = %delta, "Reputation amount overflow; rejecting batch");
        ApplyError::AmountOverflow { key, sequence }
    })?;

    staged.put(key, ReputationValue::new(amount, current.index));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::types::VersionSelector;
    use std::path::PathBuf;

    fn setup(track_org_totals: bool) -> (ChangeLogApplier, PathBuf) {
        let db_path = std::env::temp_dir().join(format!("test_applier_{}.db", uuid::Uuid::new_v4()));
        let store = Arc::new(VersionedStore::open(&db_path, &StoreConfig::default()).unwrap());
        (
            ChangeLogApplier::new(store, ApplierConfig { track_org_totals }),
            db_path,
        )
    }

    fn entry(participant: u8, delta: i128, sequence: u64) -> ChangeLogEntry {
        ChangeLogEntry {
            organization: Address([0xc0; 20]),
            skill_id: 1,
            participant: Address([participant; 20]),
            delta_amount: delta,
            sequence,
        }
    }

    #[test]
    fn test_single_entry_batch() {
        let (applier, db_path) = setup(false);
        let e = entry(1, 100, 1);
        let outcome = applier.apply_batch(std::slice::from_ref(&e)).unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Committed {
                version: 1,
                applied: 1,
                skipped: 0
            }
        );

        let head = applier.store().latest().unwrap();
        assert_eq!(head.get(&e.key()).unwrap().amount, 100);
        assert!(head.prove(&e.key()).unwrap().verify(&head.root()));
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_one_version_per_batch() {
        let (applier, db_path) = setup(false);
        let batch = vec![entry(1, 5, 1), entry(2, 6, 2), entry(1, 7, 3)];
        assert_eq!(applier.apply_batch(&batch).unwrap().version(), 1);

        let head = applier.store().latest().unwrap();
        assert_eq!(head.get(&entry(1, 0, 0).key()).unwrap(), ReputationValue::new(12, 0));
        assert_eq!(head.get(&entry(2, 0, 0).key()).unwrap(), ReputationValue::new(6, 1));
        assert_eq!(head.watermark(), Some(3));
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_replay_is_noop() {
        let (applier, db_path) = setup(false);
        let batch = vec![entry(1, 5, 1), entry(2, 6, 2)];
        applier.apply_batch(&batch).unwrap();
        let root = applier.store().latest().unwrap().root();

        let outcome = applier.apply_batch(&batch).unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged { version: 1 });
        assert_eq!(applier.store().latest().unwrap().root(), root);

        // Partially overlapping batch applies only the new tail.
        let outcome = applier
            .apply_batch(&[entry(2, 6, 2), entry(3, 1, 3)])
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Committed {
                version: 2,
                applied: 1,
                skipped: 1
            }
        );
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_out_of_order_batch_rejected() {
        let (applier, db_path) = setup(false);
        let err = applier
            .apply_batch(&[entry(1, 5, 4), entry(2, 6, 4)])
            .unwrap_err();
        assert!(matches!(err, ApplyError::OutOfOrder { previous: 4, sequence: 4 }));
        assert_eq!(applier.store().latest().unwrap().version(), 0);
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_overflow_rejects_whole_batch() {
        let (applier, db_path) = setup(false);
        applier.apply_batch(&[entry(1, i128::MAX, 1)]).unwrap();

        let err = applier
            .apply_batch(&[entry(2, 10, 2), entry(1, 1, 3)])
            .unwrap_err();
        assert!(matches!(err, ApplyError::AmountOverflow { sequence: 3, .. }));

        let head = applier.store().latest().unwrap();
        assert_eq!(head.version(), 1);
        assert_eq!(head.watermark(), Some(1));
        assert!(head.get(&entry(2, 0, 0).key()).is_none());
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_negative_amounts_are_kept() {
        let (applier, db_path) = setup(false);
        applier.apply_batch(&[entry(1, 10, 1), entry(1, -25, 2)]).unwrap();
        let proof = applier
            .store()
            .prove(VersionSelector::Latest, &entry(1, 0, 0).key())
            .unwrap();
        assert_eq!(proof.value.amount, -15);
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_org_totals() {
        let (applier, db_path) = setup(true);
        applier
            .apply_batch(&[entry(1, 10, 1), entry(2, 5, 2), entry(1, -3, 3)])
            .unwrap();

        let head = applier.store().latest().unwrap();
        let total = head.get(&entry(1, 0, 0).org_total_key()).unwrap();
        assert_eq!(total.amount, 12);
        // participant 1, org total, participant 2
        assert_eq!(total.index, 1);
        assert_eq!(head.key_count(), 3);
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_entry_json_uses_decimal_amounts() {
        let json = r#"{
            "organization": "0xc0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0",
            "skillId": 1,
            "participant": "0x0101010101010101010101010101010101010101",
            "deltaAmount": "-170141183460469231731687303715884105728",
            "sequence": 9
        }"#;
        let parsed: ChangeLogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.delta_amount, i128::MIN);
        assert_eq!(parsed.key(), entry(1, 0, 0).key());
    }
}

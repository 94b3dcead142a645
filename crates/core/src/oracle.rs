//! Proof Oracle - read-side contract for reputation proofs
//!
//! Answers "prove the value of (organization, skill, participant) under root
//! R" for the head root and for every root the store ever committed. Absence
//! is an answer, not a failure: unparseable requests, unknown roots and absent
//! keys all come back as [`OracleOutcome::NotFound`]. Only store faults are
//! errors.

use crate::proof::{BranchMask, ReputationProof};
use crate::store::{StoreError, VersionedStore};
use crate::types::{Address, Digest, Key, ReputationValue, VersionId, VersionSelector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Body of every not-found answer.
pub const NOT_FOUND_MESSAGE: &str = "Requested reputation does not exist or invalid request";

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("store corrupted: {0}")]
    Corrupted(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for OracleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CorruptionDetected(reason) => OracleError::Corrupted(reason),
            other => OracleError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    InvalidRequest(String),
    UnknownRoot,
    KeyAbsent,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::InvalidRequest(detail) => write!(f, "invalid request: {}", detail),
            NotFoundReason::UnknownRoot => f.write_str("unknown root"),
            NotFoundReason::KeyAbsent => f.write_str("key absent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    pub root: Digest,
    pub organization: Address,
    pub skill_id: u64,
    pub participant: Address,
}

impl ProofRequest {
    /// Parse the four path segments of a proof request.
    pub fn parse(
        root: &str,
        organization: &str,
        skill_id: &str,
        participant: &str,
    ) -> std::result::Result<Self, NotFoundReason> {
        let invalid = |field: &str, e: &dyn fmt::Display| {
            NotFoundReason::InvalidRequest(format!("{}: {}", field, e))
        };
        Ok(Self {
            root: root.parse::<Digest>().map_err(|e| invalid("root", &e))?,
            organization: organization.parse::<Address>().map_err(|e| invalid("organization", &e))?,
            skill_id: skill_id.parse::<u64>().map_err(|e| invalid("skill", &e))?,
            participant: participant.parse::<Address>().map_err(|e| invalid("participant", &e))?,
        })
    }

    pub fn key(&self) -> Key {
        Key::derive(&self.organization, self.skill_id, &self.participant)
    }
}

/// Successful oracle answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    pub branch_mask: BranchMask,
    pub siblings: Vec<Digest>,
    pub key: Key,
    pub value: ReputationValue,
    /// Amount decoded from `value`, in decimal.
    pub derived_amount: String,
}

impl ProofResponse {
    pub fn into_proof(self) -> ReputationProof {
        ReputationProof {
            branch_mask: self.branch_mask,
            siblings: self.siblings,
            key: self.key,
            value: self.value,
        }
    }
}

impl From<ReputationProof> for ProofResponse {
    fn from(proof: ReputationProof) -> Self {
        Self {
            derived_amount: proof.value.amount_string(),
            branch_mask: proof.branch_mask,
            siblings: proof.siblings,
            key: proof.key,
            value: proof.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleOutcome {
    Found(ProofResponse),
    NotFound(NotFoundReason),
}

/// Read-only view over the versioned store. Never blocks on the writer.
#[derive(Clone)]
pub struct ProofOracle {
    store: Arc<VersionedStore>,
}

impl ProofOracle {
    pub fn new(store: Arc<VersionedStore>) -> Self {
        Self { store }
    }

    /// Parse and answer a request given as raw path segments.
    pub fn query_raw(
        &self,
        root: &str,
        organization: &str,
        skill_id: &str,
        participant: &str,
    ) -> Result<OracleOutcome, OracleError> {
        match ProofRequest::parse(root, organization, skill_id, participant) {
            Ok(request) => self.query(&request),
            Err(reason) => {
                debug!(%reason, "Rejecting proof request");
                Ok(OracleOutcome::NotFound(reason))
            }
        }
    }

    pub fn query(&self, request: &ProofRequest) -> Result<OracleOutcome, OracleError> {
        let version = match self.resolve_root(&request.root)? {
            Some(version) => version,
            None => return Ok(self.not_found(request, NotFoundReason::UnknownRoot)),
        };

        let key = request.key();
        let proof = match self.store.prove(VersionSelector::At(version), &key) {
            Ok(proof) => proof,
            Err(StoreError::KeyNotFound { .. }) => {
                return Ok(self.not_found(request, NotFoundReason::KeyAbsent))
            }
            Err(StoreError::VersionNotFound(_)) => {
                return Ok(self.not_found(request, NotFoundReason::UnknownRoot))
            }
            Err(e) => return Err(e.into()),
        };

        if !proof.verify(&request.root) {
            error!(
                root = %request.root,
                version,
                %key,
                "Generated proof does not replay to its root"
            );
            return Err(OracleError::Corrupted(format!(
                "proof for {} does not replay to {}",
                key, request.root
            )));
        }

        debug!(root = %request.root, version, %key, "Serving proof");
        Ok(OracleOutcome::Found(proof.into()))
    }

    /// The head version if `root` is the head root, else the newest
    /// historical version committed with that root.
    fn resolve_root(&self, root: &Digest) -> Result<Option<VersionId>, OracleError> {
        let head = self.store.latest()?;
        if head.root() == *root {
            return Ok(Some(head.version()));
        }
        Ok(self.store.version_for_root(root)?)
    }

    fn not_found(&self, request: &ProofRequest, reason: NotFoundReason) -> OracleOutcome {
        debug!(
            root = %request.root,
            organization = %request.organization,
            skill_id = request.skill_id,
            participant = %request.participant,
            %reason,
            "Proof not available"
        );
        OracleOutcome::NotFound(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::{ChangeLogApplier, ChangeLogEntry};
    use crate::config::{ApplierConfig, StoreConfig};
    use std::path::PathBuf;

    const ORG: &str = "0x00000000000000000000000000000000000000c0";
    const ALICE: &str = "0x00000000000000000000000000000000000000a1";
    const BOB: &str = "0x00000000000000000000000000000000000000b2";

    fn setup() -> (ProofOracle, ChangeLogApplier, PathBuf) {
        let db_path = std::env::temp_dir().join(format!("test_oracle_{}.db", uuid::Uuid::new_v4()));
        let store = Arc::new(VersionedStore::open(&db_path, &StoreConfig::default()).unwrap());
        (
            ProofOracle::new(store.clone()),
            ChangeLogApplier::new(store, ApplierConfig::default()),
            db_path,
        )
    }

    fn alice_entry(delta: i128, sequence: u64) -> ChangeLogEntry {
        ChangeLogEntry {
            organization: ORG.parse().unwrap(),
            skill_id: 2,
            participant: ALICE.parse().unwrap(),
            delta_amount: delta,
            sequence,
        }
    }

    fn found(outcome: OracleOutcome) -> ProofResponse {
        match outcome {
            OracleOutcome::Found(response) => response,
            other => panic!("expected proof, got {:?}", other),
        }
    }

    #[test]
    fn test_current_and_historical_roots() {
        let (oracle, applier, db_path) = setup();
        applier.apply_batch(&[alice_entry(100, 1)]).unwrap();
        let r1 = applier.store().latest().unwrap().root().to_string();
        applier.apply_batch(&[alice_entry(-30, 2)]).unwrap();
        let r2 = applier.store().latest().unwrap().root().to_string();

        let old = found(oracle.query_raw(&r1, ORG, "2", ALICE).unwrap());
        assert_eq!(old.derived_amount, "100");
        assert!(old.into_proof().verify(&r1.parse().unwrap()));

        let new = found(oracle.query_raw(&r2, ORG, "2", ALICE).unwrap());
        assert_eq!(new.derived_amount, "70");
        assert!(new.into_proof().verify(&r2.parse().unwrap()));
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_not_found_reasons() {
        let (oracle, applier, db_path) = setup();
        applier.apply_batch(&[alice_entry(1, 1)]).unwrap();
        let root = applier.store().latest().unwrap().root().to_string();
        let unknown = Digest([0x55; 32]).to_string();

        assert_eq!(
            oracle.query_raw(&unknown, ORG, "2", ALICE).unwrap(),
            OracleOutcome::NotFound(NotFoundReason::UnknownRoot)
        );
        assert_eq!(
            oracle.query_raw(&root, ORG, "2", BOB).unwrap(),
            OracleOutcome::NotFound(NotFoundReason::KeyAbsent)
        );
        assert!(matches!(
            oracle.query_raw(&root, ORG, "two", ALICE).unwrap(),
            OracleOutcome::NotFound(NotFoundReason::InvalidRequest(_))
        ));
        assert!(matches!(
            oracle.query_raw("0xzz", ORG, "2", ALICE).unwrap(),
            OracleOutcome::NotFound(NotFoundReason::InvalidRequest(_))
        ));
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_empty_root_has_no_keys() {
        let (oracle, _applier, db_path) = setup();
        assert_eq!(
            oracle.query_raw(&Digest::EMPTY.to_string(), ORG, "2", ALICE).unwrap(),
            OracleOutcome::NotFound(NotFoundReason::KeyAbsent)
        );
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_corruption_is_an_error() {
        let (oracle, applier, db_path) = setup();
        applier.apply_batch(&[alice_entry(1, 1)]).unwrap();
        let r1 = applier.store().latest().unwrap().root().to_string();
        applier.apply_batch(&[alice_entry(1, 2)]).unwrap();
        applier.store().clear_snapshot_cache();
        applier
            .store()
            .__test_execute_raw_sql("DELETE FROM version_entries WHERE version_id = 1", &[])
            .unwrap();

        assert!(matches!(
            oracle.query_raw(&r1, ORG, "2", ALICE),
            Err(OracleError::Corrupted(_))
        ));
        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_response_json_fields() {
        let (oracle, applier, db_path) = setup();
        applier.apply_batch(&[alice_entry(-5, 1)]).unwrap();
        let root = applier.store().latest().unwrap().root().to_string();
        let response = found(oracle.query_raw(&root, ORG, "2", ALICE).unwrap());

        let json = serde_json::to_value(&response).unwrap();
        for field in ["branchMask", "siblings", "key", "value", "derivedAmount"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["derivedAmount"], "-5");
        std::fs::remove_file(db_path).ok();
    }
}

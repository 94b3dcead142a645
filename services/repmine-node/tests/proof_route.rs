//! HTTP tests for the proof and health routes

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use repmine_core::{
    Address, ApplierConfig, ChangeLogApplier, ChangeLogEntry, Digest, ReputationProof,
    StoreConfig, VersionedStore,
};
use repmine_node::{router, AppState};
use repmine_scheduler::SchedulerState;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt as _;

const ORG: Address = Address([0x0a; 20]);
const ALICE: Address = Address([0xa1; 20]);

struct Fixture {
    applier: ChangeLogApplier,
    store: Arc<VersionedStore>,
    db_path: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let db_path = std::env::temp_dir().join(format!("test_node_{}.db", uuid::Uuid::new_v4()));
        let store = Arc::new(VersionedStore::open(&db_path, &StoreConfig::default()).unwrap());
        Self {
            applier: ChangeLogApplier::new(store.clone(), ApplierConfig::default()),
            store,
            db_path,
        }
    }

    fn app(&self) -> Router {
        router(Arc::new(AppState::new(self.store.clone(), None)))
    }

    fn credit(&self, delta: i128, sequence: u64) -> Digest {
        self.applier
            .apply_batch(&[ChangeLogEntry {
                organization: ORG,
                skill_id: 1,
                participant: ALICE,
                delta_amount: delta,
                sequence,
            }])
            .unwrap();
        self.store.latest().unwrap().root()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        std::fs::remove_file(&self.db_path).ok();
    }
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn proof_uri(root: &Digest, skill: &str, participant: &Address) -> String {
    format!("/{}/{}/{}/{}", root, ORG, skill, participant)
}

#[tokio::test]
async fn test_current_and_historical_proofs() {
    let fixture = Fixture::new();
    let r1 = fixture.credit(100, 1);
    let r2 = fixture.credit(-30, 2);

    for (root, amount) in [(r1, "100"), (r2, "70")] {
        let (status, json) = get(fixture.app(), &proof_uri(&root, "1", &ALICE)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["derivedAmount"], amount);

        let proof: ReputationProof = serde_json::from_value(json).unwrap();
        assert!(proof.verify(&root));
    }
}

#[tokio::test]
async fn test_not_found_answers_are_400() {
    let fixture = Fixture::new();
    let root = fixture.credit(5, 1);
    let unknown_root = Digest([0x99; 32]);
    let bob = Address([0xb0; 20]);

    let uris = [
        proof_uri(&unknown_root, "1", &ALICE),
        proof_uri(&root, "1", &bob),
        proof_uri(&root, "not-a-number", &ALICE),
        format!("/0x1234/{}/1/{}", ORG, ALICE),
    ];
    for uri in uris {
        let (status, json) = get(fixture.app(), &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(
            json["message"],
            "Requested reputation does not exist or invalid request"
        );
    }
}

#[tokio::test]
async fn test_corruption_is_500() {
    let fixture = Fixture::new();
    let r1 = fixture.credit(5, 1);
    fixture.credit(5, 2);
    fixture.store.clear_snapshot_cache();
    fixture
        .store
        .__test_execute_raw_sql("DELETE FROM version_entries WHERE version_id = 1", &[])
        .unwrap();

    let (status, _) = get(fixture.app(), &proof_uri(&r1, "1", &ALICE)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, json) = get(fixture.app(), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "corrupted");
}

#[tokio::test]
async fn test_health_reports_head_and_scheduler() {
    let fixture = Fixture::new();
    let root = fixture.credit(1, 1);

    let (status, json) = get(fixture.app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["headVersion"], 1);
    assert_eq!(json["headRoot"], root.to_string());
    assert!(json["scheduler"].is_null());

    let (_tx, rx) = tokio::sync::watch::channel(SchedulerState::Halted {
        reason: "ledger rejected submission".into(),
    });
    let app = router(Arc::new(AppState::new(fixture.store.clone(), Some(rx))));
    let (status, json) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["scheduler"]["state"], "halted");
}

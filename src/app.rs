//! Shared state and router wiring.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};

use crate::analysis::{Analyzer, LocalAuditor};
use crate::ledger::verify;
use crate::model::Record;
use crate::routes;
use crate::storage::{load_or_init, BlobStore};

/// Shared application state passed to Axum handlers.
///
/// The chain lives here and nowhere else; the engine only sees borrowed
/// slices of it.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Mutex<Vec<Record>>>,
    pub store: Arc<dyn BlobStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub analysis_timeout: Duration,
}

impl AppState {
    /// Load the stored chain (or start from genesis) and report its integrity.
    pub fn open(
        store: Arc<dyn BlobStore>,
        analyzer: Arc<dyn Analyzer>,
        analysis_timeout: Duration,
    ) -> Self {
        let chain = load_or_init(store.as_ref());
        if verify(&chain) {
            tracing::info!(records = chain.len(), "chain verified");
        } else {
            tracing::warn!(
                records = chain.len(),
                "stored chain failed verification; kept for inspection"
            );
        }
        Self {
            ledger: Arc::new(Mutex::new(chain)),
            store,
            analyzer,
            analysis_timeout,
        }
    }

    /// State backed by `store` with the built-in auditor.
    pub fn with_store(store: Arc<dyn BlobStore>) -> Self {
        Self::open(store, Arc::new(LocalAuditor::new()), Duration::from_secs(10))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/bookings", post(routes::add_booking))
        .route("/bookings/:seq/fulfill", post(routes::fulfill_booking))
        .route("/records", get(routes::list_records))
        .route("/records/:seq", get(routes::get_record))
        .route("/pending", get(routes::list_pending))
        .route("/stats", get(routes::chain_stats))
        .route("/validate", get(routes::validate_chain))
        .route("/analyze", post(routes::analyze))
        .route("/reset", post(routes::reset))
        .route("/exam-types", get(routes::exam_types))
        .route("/health", get(routes::health))
        .route("/version", get(routes::version))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use super::*;
    use crate::analysis::FALLBACK_ANALYSIS;
    use crate::model::{Payload, Priority};
    use crate::storage::{save_chain, MemoryStore};

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let req = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn booking(nre: &str) -> Value {
        json!({
            "nre": nre,
            "fiscalCode": "rssmra80a01h501u",
            "priority": "U",
            "examType": "TAC Torace senza contrasto",
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(AppState::with_store(Arc::new(MemoryStore::default())));
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn booking_and_fulfillment_flow() {
        let store = Arc::new(MemoryStore::default());
        let app = build_router(AppState::with_store(store.clone()));

        let (status, rec) = call(&app, "POST", "/bookings", Some(booking("123"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rec["index"], 1);
        assert_eq!(rec["data"]["fiscalCode"], "RSSMRA80A01H501U");
        assert_eq!(rec["validator"], "NODE_PATIENT_APP");

        let (_, open) = call(&app, "GET", "/pending", None).await;
        assert_eq!(open.as_array().unwrap().len(), 1);

        let (status, f) = call(&app, "POST", "/bookings/1/fulfill", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(f["data"]["action"], "FULFILLMENT");
        assert_eq!(f["validator"], "NODE_HOSPITAL_MAIN");

        let (_, open) = call(&app, "GET", "/pending", None).await;
        assert!(open.as_array().unwrap().is_empty());

        let (status, _) = call(&app, "POST", "/bookings/1/fulfill", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, v) = call(&app, "GET", "/validate", None).await;
        assert_eq!(v["ok"], true);

        let (_, s) = call(&app, "GET", "/stats", None).await;
        assert_eq!(s["totalBlocks"], 3);
        assert_eq!(s["completedCount"], 1);
        assert_eq!(s["valid"], true);

        // persisted on every mutation
        let reloaded = crate::storage::load_chain(store.as_ref()).unwrap();
        assert_eq!(reloaded.len(), 3);
    }

    #[tokio::test]
    async fn invalid_booking_is_rejected() {
        let app = build_router(AppState::with_store(Arc::new(MemoryStore::default())));
        let (status, _) = call(&app, "POST", "/bookings", Some(booking(""))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn genesis_cannot_be_fulfilled() {
        let app = build_router(AppState::with_store(Arc::new(MemoryStore::default())));
        let (status, _) = call(&app, "POST", "/bookings/0/fulfill", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn record_lookup() {
        let app = build_router(AppState::with_store(Arc::new(MemoryStore::default())));
        let (status, g) = call(&app, "GET", "/records/0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(g["previousHash"], "0");
        let (status, _) = call(&app, "GET", "/records/9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tampered_chain_is_kept_and_reported() {
        let store = Arc::new(MemoryStore::default());
        let mut chain = vec![crate::ledger::create_first_record()];
        let p = Payload::booking("5", "CF", Priority::B, "TAC").unwrap();
        let r = crate::ledger::append(&chain[0], p, "N").unwrap();
        chain.push(r);
        chain[1].payload.nre = "6".into();
        save_chain(store.as_ref(), &chain).unwrap();

        let app = build_router(AppState::with_store(store));
        let (_, records) = call(&app, "GET", "/records", None).await;
        assert_eq!(records.as_array().unwrap().len(), 2);
        let (_, v) = call(&app, "GET", "/validate", None).await;
        assert_eq!(v["ok"], false);
        assert_eq!(v["errors"][0], "record 1: hash mismatch");

        // appending after a tampered head is refused
        let (status, _) = call(&app, "POST", "/bookings", Some(booking("7"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn analyze_and_reset() {
        let app = build_router(AppState::with_store(Arc::new(MemoryStore::default())));
        call(&app, "POST", "/bookings", Some(booking("1"))).await;

        let (status, a) = call(&app, "POST", "/analyze", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(a["analysis"].as_str().unwrap().starts_with("Integrity:"));
        assert_eq!(a["summary"].as_array().unwrap().len(), 2);

        let (status, fresh) = call(&app, "POST", "/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fresh.as_array().unwrap().len(), 1);
        let (_, records) = call(&app, "GET", "/records", None).await;
        assert_eq!(records.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn analyze_survives_poisoned_ledger_lock() {
        let state = AppState::with_store(Arc::new(MemoryStore::default()));
        let ledger = state.ledger.clone();
        let poisoner = std::thread::spawn(move || {
            let _guard = ledger.lock().unwrap();
            panic!("writer died holding the ledger lock");
        });
        assert!(poisoner.join().is_err());
        assert!(state.ledger.is_poisoned());

        let app = build_router(state);
        let (status, a) = call(&app, "POST", "/analyze", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(a["analysis"], FALLBACK_ANALYSIS);
        assert!(a["summary"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exam_catalogue() {
        let app = build_router(AppState::with_store(Arc::new(MemoryStore::default())));
        let (_, types) = call(&app, "GET", "/exam-types", None).await;
        assert_eq!(types.as_array().unwrap().len(), 5);
    }
}

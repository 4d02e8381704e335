//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware, Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

use cash_ledger::api::{self, AppState};
use cash_ledger::{LedgerSettings, LedgerStore, MemoryLedgerStore};

/// Router over a fresh in-memory store, with the same middleware as the server
pub fn memory_app() -> Router {
    app(Arc::new(MemoryLedgerStore::new()))
}

pub fn app(store: Arc<dyn LedgerStore>) -> Router {
    api::create_router()
        .layer(middleware::from_fn(api::middleware::logging_middleware))
        .layer(middleware::from_fn(api::middleware::context_middleware))
        .with_state(AppState::new(store, LedgerSettings::default()))
}

/// Connect to `DATABASE_URL` and bring the schema up to date
pub async fn setup_pg_store() -> cash_ledger::PgLedgerStore {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    cash_ledger::db::run_migrations(&pool).await.expect("Failed to run migrations");

    cash_ledger::PgLedgerStore::new(pool)
}

/// Unique code so tests sharing a database do not collide
pub fn unique_code(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

/// A request as the API sees it from a caller
pub struct Call {
    method: &'static str,
    uri: String,
    actor: Option<Uuid>,
    idempotency_key: Option<String>,
    body: Option<Value>,
}

impl Call {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: "GET",
            uri: uri.into(),
            actor: None,
            idempotency_key: None,
            body: None,
        }
    }

    pub fn post(uri: impl Into<String>, actor: Uuid, body: Value) -> Self {
        Self {
            method: "POST",
            uri: uri.into(),
            actor: Some(actor),
            idempotency_key: None,
            body: Some(body),
        }
    }

    pub fn method(mut self, method: &'static str) -> Self {
        self.method = method;
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.actor = None;
        self
    }

    pub fn idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub async fn send(self, app: &Router) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(actor) = self.actor {
            builder = builder.header("X-Actor-Id", actor.to_string());
        }
        if let Some(key) = self.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        let request = match self.body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// The `id` field of a response object, as a UUID
pub fn id_of(value: &Value) -> Uuid {
    value["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()).expect("response has an id")
}

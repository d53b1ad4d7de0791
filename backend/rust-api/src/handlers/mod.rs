use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

pub mod attempts;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = Map::new();

    if let Some(mongo) = &state.mongo {
        let mongo_health = check_mongodb(mongo).await;
        dependencies.insert("mongodb".to_string(), Value::Object(mongo_health));
    }
    if let Some(redis) = &state.redis {
        let redis_health = check_redis(redis).await;
        dependencies.insert("redis".to_string(), Value::Object(redis_health));
    }

    let all_healthy = dependencies
        .values()
        .all(|dep| dep.get("status").and_then(|v| v.as_str()) == Some("healthy"));
    let (status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "assessment-engine-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": dependencies
        })),
    )
}

fn dependency_status<E: std::fmt::Display>(
    name: &str,
    outcome: Result<Result<(), E>, tokio::time::error::Elapsed>,
    timeout: &str,
) -> Map<String, Value> {
    let mut result = Map::new();
    match outcome {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert(
                "message".to_string(),
                json!(format!("{} connection successful", name)),
            );
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("{} error: {}", name, e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert(
                "error".to_string(),
                json!(format!("{} timeout after {}", name, timeout)),
            );
        }
    }
    result
}

async fn check_mongodb(mongo: &mongodb::Database) -> Map<String, Value> {
    let outcome = tokio::time::timeout(Duration::from_secs(1), async {
        mongo
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
    })
    .await;
    dependency_status("MongoDB", outcome, "1s")
}

async fn check_redis(redis: &redis::aio::ConnectionManager) -> Map<String, Value> {
    let mut conn = redis.clone();
    let outcome = tokio::time::timeout(Duration::from_millis(500), async {
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
    })
    .await;
    dependency_status("Redis", outcome, "500ms")
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// HTTP Basic auth in front of `/metrics`; credentials come from `METRICS_AUTH`.
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // username:password
    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());

    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

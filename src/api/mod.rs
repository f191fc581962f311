pub mod error;
pub mod health;
pub mod status;

use axum::{routing::get, Router};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::controller::StatusHandle;

/// Shared handler state: a read-only view of the engine.
#[derive(Clone)]
pub struct ApiState {
    pub status: StatusHandle,
}

pub fn router(state: ApiState, cfg: &Config) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/status", get(status::get_status))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::new(Duration::from_secs(cfg.server.request_timeout_secs))),
        )
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{cycle, StatusFreeze};
    use crate::domain::{EngineState, OperationMode};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{FixedOffset, TimeZone};
    use tower::ServiceExt;

    fn test_config() -> Config {
        use figment::providers::{Format, Toml};
        figment::Figment::new()
            .merge(Toml::string(
                r#"
                [server]
                host = "127.0.0.1"
                port = 0
                [controller]
                tick_seconds = 10
                installation_id = "test"
                state_dir = "state"
                "#,
            ))
            .extract()
            .unwrap()
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_unavailable_until_first_cycle() {
        let handle = StatusHandle::default();
        let app = router(ApiState { status: handle.clone() }, &test_config());

        let (code, body) = get(app.clone(), "/api/v1/status").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "ServiceUnavailable");

        let now = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 1, 15, 19, 0, 0)
            .unwrap();
        let snapshot = cycle::degraded_snapshot(
            &EngineState::default(),
            OperationMode::Winter,
            now,
            &mut StatusFreeze::new(0),
        );
        handle.publish(Some(snapshot), Ok(()), now).await;

        let (code, body) = get(app, "/api/v1/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["operation_mode"], "winter");
        assert_eq!(body["status"], "sensor_invalid");
    }

    #[tokio::test]
    async fn test_health_degraded_before_first_cycle() {
        let app = router(ApiState { status: StatusHandle::default() }, &test_config());
        let (code, body) = get(app, "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["controller"]["cycles"], 0);
    }
}

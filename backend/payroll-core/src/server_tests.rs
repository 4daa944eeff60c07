// src/server_tests.rs

#[cfg(test)]
mod tests {
    use crate::config::ViewConfig;
    use crate::ingest::ViewRefresher;
    use crate::server::*;
    use crate::store::{TableStore, WorkbookFile};
    use crate::views::{PayrollViews, SUMMARY_CURRENT_TABLE};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const RAW: &str = "payroll_raw";

    fn test_state(with_refresher: bool) -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let workbook = WorkbookFile::open(dir.path().join("workbook.json")).unwrap();
        let refresher: Option<Arc<dyn ViewRefresher>> = if with_refresher {
            Some(Arc::new(PayrollViews::new(ViewConfig::default())))
        } else {
            None
        };
        let state = AppState::new(workbook, refresher, RAW, Duration::from_millis(200));
        (dir, state)
    }

    async fn send(app: Router, method: Method, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn today_record(id: &str, emp: &str, min: i64) -> Value {
        let date = chrono::Utc::now()
            .with_timezone(&crate::period::VIEW_TIMEZONE)
            .format("%Y-%m-%d")
            .to_string();
        json!({"id": id, "date": date, "emp": emp, "min": min, "yen_h": 1200, "yen": min * 20})
    }

    #[tokio::test]
    async fn test_health_creates_ledger() {
        let (dir, state) = test_state(true);
        let (status, body) = send(router(state.clone()), Method::GET, "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
        let saved = WorkbookFile::open(dir.path().join("workbook.json")).unwrap();
        assert_eq!(saved.workbook().read_all(RAW).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_views() {
        let (dir, state) = test_state(true);
        let payload = json!([today_record("r1", "emp01", 60), today_record("r2", "emp01", 30)]);
        let (status, body) = send(router(state.clone()), Method::POST, &payload.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"ok": true, "inserted": 2, "updated": 0, "skipped": 0, "refreshed": true})
        );

        let workbook = state.workbook();
        let workbook = workbook.lock().await;
        let summary = workbook.workbook().read_all(SUMMARY_CURRENT_TABLE).unwrap();
        assert_eq!(summary[1][3].to_string(), "90");

        let saved = WorkbookFile::open(dir.path().join("workbook.json")).unwrap();
        assert_eq!(saved.workbook(), workbook.workbook());
    }

    #[tokio::test]
    async fn test_upsert_records_envelope_and_update() {
        let (_dir, state) = test_state(true);
        let first = json!({"records": [today_record("r1", "emp01", 60)]});
        send(router(state.clone()), Method::POST, &first.to_string()).await;

        let second = json!({"records": [today_record("r1", "emp01", 45), {"emp": "emp02"}]});
        let (_, body) = send(router(state.clone()), Method::POST, &second.to_string()).await;
        assert_eq!(body["inserted"], 0);
        assert_eq!(body["updated"], 1);
        assert_eq!(body["skipped"], 1);
    }

    #[tokio::test]
    async fn test_upsert_without_refresher() {
        let (_dir, state) = test_state(false);
        let payload = json!([today_record("r1", "emp01", 60)]);
        let (status, body) = send(router(state.clone()), Method::POST, &payload.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert_eq!(body["inserted"], 1);
        assert_eq!(body["refreshed"], false);
        assert_eq!(body["refresh_error"], REFRESH_HOOK_MISSING);

        let workbook = state.workbook();
        let workbook = workbook.lock().await;
        assert_eq!(workbook.workbook().last_row(RAW).unwrap(), 2);
        assert!(!workbook.workbook().has_table(SUMMARY_CURRENT_TABLE));
    }

    #[tokio::test]
    async fn test_clear_request() {
        let (dir, state) = test_state(true);
        let payload = json!([today_record("r1", "emp01", 60), today_record("r2", "emp02", 10)]);
        send(router(state.clone()), Method::POST, &payload.to_string()).await;

        let (status, body) = send(router(state.clone()), Method::POST, r#"{"op":"clear"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"ok": true, "op": "clear", "cleared_rows": 2, "refreshed": true})
        );

        let workbook = state.workbook();
        let workbook = workbook.lock().await;
        assert_eq!(workbook.workbook().read_all(SUMMARY_CURRENT_TABLE).unwrap().len(), 1);

        // The refreshed state reached the file, not only memory
        let saved = WorkbookFile::open(dir.path().join("workbook.json")).unwrap();
        assert_eq!(saved.workbook(), workbook.workbook());
    }

    #[tokio::test]
    async fn test_empty_body_is_an_empty_upsert() {
        let (_dir, state) = test_state(true);
        let (status, body) = send(router(state), Method::POST, "  ").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inserted"], 0);
        assert_eq!(body["refreshed"], true);
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let (_dir, state) = test_state(true);
        let (status, body) = send(router(state), Method::POST, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let (_dir, state) = test_state(true);
        let workbook = state.workbook();
        let _held = workbook.lock().await;

        let (status, body) = send(router(state.clone()), Method::POST, "[]").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ok"], false);
    }
}

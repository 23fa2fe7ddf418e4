//! Shared harness for integration tests: in-memory store and blob
//! backends behind the real router.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use serde_json::Value;

use drover_core::blob::MemoryBlobStore;
use drover_core::store::MemoryStore;
use drover_core::{DispatchConfig, Dispatcher};
use drover_server::infra::config::AuthConfig;
use drover_server::{AppState, Config, create_router};

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct-horse";

pub struct TestApp {
    pub server: TestServer,
    pub dispatcher: Arc<Dispatcher>,
    pub blob: Arc<MemoryBlobStore>,
}

pub fn test_config() -> Config {
    Config {
        bind: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        store_url: "memory://".to_string(),
        cors_origins: vec!["*".to_string()],
        dispatch: DispatchConfig {
            // Short lease so expiry scenarios run in test time.
            lease_timeout_sec: 2,
            total_job_timeout_sec: 10,
            max_retries: 3,
            events_max: 200,
            p0_enabled: true,
            priority_ips: Default::default(),
            heartbeat_stale_sec: 30,
            input_url_ttl_sec: 3600,
            output_url_ttl_sec: 86_400,
        },
        sweeper_enabled: false,
        sweep_interval: Duration::from_millis(200),
        auth: AuthConfig {
            jwt_secret: "integration-test-secret".to_string(),
            issuer: "drover".to_string(),
            audience: "drover-admin".to_string(),
            exp_min: 60,
            admin_username: Some(ADMIN_USER.to_string()),
            admin_password: Some(ADMIN_PASSWORD.to_string()),
        },
        blob_root: std::env::temp_dir().join("drover-test-blobs"),
        blob_public_base: "http://127.0.0.1:8080".to_string(),
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let mut config = test_config();
    tweak(&mut config);

    let store = Arc::new(MemoryStore::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store,
        blob.clone(),
        config.dispatch.clone(),
    ));
    let state = AppState::new(dispatcher.clone(), Arc::new(config), None);
    let server = TestServer::new(create_router(state)).expect("test server");

    TestApp {
        server,
        dispatcher,
        blob,
    }
}

impl TestApp {
    /// Submit `bytes` as a multipart upload from `ip`, returning the job id.
    pub async fn submit(&self, filename: &str, bytes: Vec<u8>, ip: &str) -> String {
        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(bytes)
                .file_name(filename)
                .mime_type("image/jpeg"),
        );
        let response = self
            .server
            .post("/api/jobs")
            .add_header(
                axum::http::HeaderName::from_static("x-forwarded-for"),
                axum::http::HeaderValue::from_str(ip).unwrap(),
            )
            .multipart(form)
            .await;
        response.assert_status_success();
        let body: Value = response.json();
        assert_eq!(body["status"], "queued");
        body["id"].as_str().expect("job id").to_string()
    }

    pub async fn register_worker(&self, capacity: u32) -> String {
        let response = self
            .server
            .post("/api/worker/register")
            .json(&serde_json::json!({ "name": "gpu-test", "capacity": capacity }))
            .await;
        response.assert_status_success();
        let body: Value = response.json();
        body["worker_id"].as_str().expect("worker id").to_string()
    }

    /// One lease poll over HTTP. Returns the grant object if one came back.
    pub async fn lease(&self, worker_id: &str) -> Option<Value> {
        let response = self
            .server
            .post("/api/worker/lease")
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "wants": 1,
                "active": 0,
            }))
            .await;
        response.assert_status_success();
        let body: Value = response.json();
        (!body["lease"].is_null()).then(|| body["lease"].clone())
    }

    pub async fn post_result(
        &self,
        worker_id: &str,
        job_id: &str,
        bytes: Vec<u8>,
    ) -> axum_test::TestResponse {
        let form = MultipartForm::new()
            .add_text("worker_id", worker_id)
            .add_text("job_id", job_id)
            .add_part(
                "file",
                Part::bytes(bytes)
                    .file_name("output.jpg")
                    .mime_type("image/jpeg"),
            );
        self.server.post("/api/worker/result").multipart(form).await
    }

    pub async fn admin_token(&self) -> String {
        let response = self
            .server
            .post("/api/auth/login")
            .json(&serde_json::json!({
                "username": ADMIN_USER,
                "password": ADMIN_PASSWORD,
            }))
            .await;
        response.assert_status_success();
        let body: Value = response.json();
        body["token"].as_str().expect("token").to_string()
    }

    pub async fn admin_get(&self, path: &str) -> axum_test::TestResponse {
        let token = self.admin_token().await;
        self.server
            .get(path)
            .add_header(
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            )
            .await
    }

    pub async fn admin_post(&self, path: &str) -> axum_test::TestResponse {
        let token = self.admin_token().await;
        self.server
            .post(path)
            .add_header(
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            )
            .await
    }

    pub async fn job_status(&self, job_id: &str) -> String {
        let response = self.admin_get(&format!("/api/jobs/{job_id}")).await;
        response.assert_status_success();
        let body: Value = response.json();
        body["job"]["status"].as_str().expect("status").to_string()
    }

    pub async fn job_detail(&self, job_id: &str) -> Value {
        let response = self.admin_get(&format!("/api/jobs/{job_id}")).await;
        response.assert_status_success();
        response.json()
    }
}

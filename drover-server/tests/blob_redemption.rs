//! Signed-URL redemption through the filesystem blob backend.

mod support;

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;

use drover_core::blob::FsBlobStore;
use drover_core::dispatch::SubmitUpload;
use drover_core::store::MemoryStore;
use drover_core::Dispatcher;
use drover_server::{AppState, create_router};

struct FsApp {
    server: TestServer,
    dispatcher: Arc<Dispatcher>,
    _blob_dir: tempfile::TempDir,
}

async fn spawn_fs_app() -> FsApp {
    let config = support::test_config();
    let blob_dir = tempfile::tempdir().expect("temp blob root");

    let fs = Arc::new(FsBlobStore::new(
        blob_dir.path(),
        "http://127.0.0.1:8080",
        config.auth.jwt_secret.as_bytes().to_vec(),
    ));
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store,
        fs.clone(),
        config.dispatch.clone(),
    ));
    let state = AppState::new(dispatcher.clone(), Arc::new(config), Some(fs));
    let server = TestServer::new(create_router(state)).expect("test server");

    FsApp {
        server,
        dispatcher,
        _blob_dir: blob_dir,
    }
}

fn path_and_query(url: &str) -> String {
    url.strip_prefix("http://127.0.0.1:8080")
        .expect("url uses the public base")
        .to_string()
}

#[tokio::test]
async fn signed_input_url_serves_the_uploaded_bytes() {
    let app = spawn_fs_app().await;
    let accepted = app
        .dispatcher
        .submit(SubmitUpload {
            bytes: vec![0xDE, 0xAD, 0xBE, 0xEF],
            content_type: "image/jpeg".into(),
            filename: "cat.jpg".into(),
            client_id: None,
            requester_ip: "203.0.113.7".into(),
            user_agent: "test".into(),
        })
        .await
        .unwrap();

    let url = app
        .dispatcher
        .artifact_url(&accepted.id, drover_core::dispatch::ArtifactKind::Input)
        .await
        .unwrap();

    let response = app.server.get(&path_and_query(&url)).await;
    response.assert_status_success();
    assert_eq!(response.header("content-type"), "image/jpeg");
    assert_eq!(
        response.as_bytes().to_vec(),
        vec![0xDE, 0xAD, 0xBE, 0xEF]
    );
}

#[tokio::test]
async fn tampered_or_unsigned_requests_are_refused() {
    let app = spawn_fs_app().await;
    let accepted = app
        .dispatcher
        .submit(SubmitUpload {
            bytes: vec![1, 2, 3],
            content_type: "image/jpeg".into(),
            filename: "cat.jpg".into(),
            client_id: None,
            requester_ip: "203.0.113.7".into(),
            user_agent: "test".into(),
        })
        .await
        .unwrap();

    let url = app
        .dispatcher
        .artifact_url(&accepted.id, drover_core::dispatch::ArtifactKind::Input)
        .await
        .unwrap();
    let good = path_and_query(&url);

    // Flip the signature.
    let tampered = format!("{}x", good);
    app.server
        .get(&tampered)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Point the signed path at a different key.
    let other = good.replace("cat.jpg", "dog.jpg");
    app.server
        .get(&other)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Missing query entirely fails at extraction.
    let bare: Vec<&str> = good.split('?').collect();
    let response = app.server.get(bare[0]).await;
    assert_ne!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn signed_urls_expire() {
    let app = spawn_fs_app().await;
    let accepted = app
        .dispatcher
        .submit(SubmitUpload {
            bytes: vec![7; 8],
            content_type: "image/jpeg".into(),
            filename: "cat.jpg".into(),
            client_id: None,
            requester_ip: "203.0.113.7".into(),
            user_agent: "test".into(),
        })
        .await
        .unwrap();

    let job = app.dispatcher.job(&accepted.id).await.unwrap();
    let key = job.input_path.unwrap();
    // Sign with a TTL that is already over.
    let fs = FsBlobStore::new(
        app._blob_dir.path(),
        "http://127.0.0.1:8080",
        support::test_config().auth.jwt_secret.as_bytes().to_vec(),
    );
    use drover_core::BlobStore as _;
    let url = fs.sign_url(&key, 0).unwrap();

    app.server
        .get(&path_and_query(&url))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

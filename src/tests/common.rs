use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::{
    config::AppConfig,
    db::{SqliteManager, SqlitePool},
    routes,
    state::AppState,
    storage::BlobStore,
    store::MetadataStore,
    tasks,
};

pub const MASTER_KEY: &str = "test-master-key";
pub const BOUNDARY: &str = "ablage-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(tweak, |state| state).await
    }

    /// `customize` runs on the state before the router is built.
    pub async fn build(tweak: impl FnOnce(&mut AppConfig), customize: impl FnOnce(AppState) -> AppState) -> Self {
        let dir = TempDir::new().unwrap();
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.auth.master_key = MASTER_KEY.to_string();
        cfg.server.base_url = "http://files.test/".to_string();
        cfg.storage.dir = dir.path().join("files").display().to_string();
        cfg.database.url = format!("sqlite://{}", dir.path().join("meta.db").display());
        cfg.database.max_connections = 4;
        tweak(&mut cfg);

        let pool = SqlitePool::new(SqliteManager::from_url(&cfg.database.url).unwrap(), cfg.database.max_connections);
        let (tx, rx) = mpsc::unbounded_channel();
        let store = MetadataStore::new(pool, cfg.database.acquire_timeout()).with_expiry_notifier(tx);
        store.init_schema().await.unwrap();
        let blobs = BlobStore::open(&cfg.storage.dir).await.unwrap();
        tokio::spawn(tasks::reap_expired_blobs(blobs.clone(), rx));

        let state = customize(AppState::new(store, blobs, cfg));
        Self { router: routes::router(state.clone()), state, dir }
    }

    pub fn blob_path(&self, name: &str) -> std::path::PathBuf {
        self.state.blobs.root().join(name)
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Uploads one file with the master key and returns the JSON response.
    pub async fn upload(&self, file_name: &str, content_type: &str, data: &[u8]) -> Value {
        let body = multipart(&[("file", file_name, content_type, data)], &[]);
        let resp = self.send(upload_request("/api/upload", body, Some(MASTER_KEY))).await;
        assert_eq!(resp.status(), 200);
        json_body(resp).await
    }
}

/// Builds a multipart/form-data body from file parts and plain text fields.
pub fn multipart(files: &[(&str, &str, &str, &[u8])], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content_type, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(uri: &str, body: Vec<u8>, key: Option<&str>) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(key) = key {
        req = req.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    req.body(Body::from(body)).unwrap()
}

pub fn authed(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {MASTER_KEY}"))
        .body(Body::empty())
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn json_body(resp: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

/// Stored name from an upload response's `file_url`.
pub fn stored_name(upload: &Value) -> String {
    upload["file_url"].as_str().unwrap().rsplit('/').next().unwrap().to_string()
}

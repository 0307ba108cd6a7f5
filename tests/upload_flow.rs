//! Integration tests for the upload workflow against an in-process backend
//!
//! A mock of the dataset service is served with axum on a random local port;
//! the real `ApiClient` talks to it over HTTP.

use agrishare::api::{ApiClient, DatasetBackend};
use agrishare::config::{ByteSize, Config};
use agrishare::notify::{NoticeLevel, RecordingNotifier};
use agrishare::session::{AuthState, FileTokenStore, SessionManager, SignOutReason};
use agrishare::upload::{
    DatasetMetadata, FileStatus, ProgressStatus, SelectedFile, UploadBatch, UploadLimits,
    UploadOrchestrator,
};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const DATASET_ID: i64 = 314;

fn mint_token(user_id: i64, ttl_secs: i64) -> String {
    let exp = time::OffsetDateTime::now_utc().unix_timestamp() + ttl_secs;
    let claims = json!({
        "sub": user_id.to_string(),
        "user_id": user_id,
        "email": format!("user{user_id}@example.org"),
        "role": "user",
        "exp": exp,
    });
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(b"backend-secret"))
        .unwrap()
}

#[derive(Debug, Clone)]
struct ReceivedFile {
    dataset_id: i64,
    name: String,
    size: usize,
}

/// Behaviour switches and call records for the mock backend
#[derive(Default)]
struct MockBackend {
    omit_dataset_id: bool,
    fail_file: Option<String>,
    reject_uploads: bool,
    created: Mutex<Vec<Value>>,
    uploads: Mutex<Vec<ReceivedFile>>,
    bearer_tokens: Mutex<Vec<String>>,
    refresh_credentials: Mutex<Vec<String>>,
    upload_calls: AtomicUsize,
}

impl MockBackend {
    fn uploaded_names(&self) -> Vec<String> {
        self.uploads.lock().unwrap().iter().map(|f| f.name.clone()).collect()
    }

    fn record_bearer(&self, headers: &HeaderMap) -> bool {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        match token {
            Some(token) => {
                self.bearer_tokens.lock().unwrap().push(token);
                true
            }
            None => false,
        }
    }
}

type Shared = Arc<MockBackend>;

async fn create_dataset(
    State(backend): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !backend.record_bearer(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Not authenticated"})));
    }
    backend.created.lock().unwrap().push(body.clone());

    let mut response = json!({
        "dataset_name": body["dataset_name"],
        "uploader_id": body["uploader_id"],
        "date_of_creation": "2024-05-01T10:00:00",
    });
    if !backend.omit_dataset_id {
        response["dataset_id"] = json!(DATASET_ID);
    }
    (StatusCode::OK, Json(response))
}

async fn upload_file(
    State(backend): State<Shared>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    backend.upload_calls.fetch_add(1, Ordering::SeqCst);
    if backend.reject_uploads || !backend.record_bearer(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Could not validate credentials"})));
    }

    let mut dataset_id = None;
    let mut file = None;
    while let Some(field) = multipart.next_field().await.unwrap() {
        match field.name() {
            Some("dataset_id") => dataset_id = field.text().await.unwrap().parse::<i64>().ok(),
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let size = field.bytes().await.unwrap().len();
                file = Some((name, size));
            }
            _ => {}
        }
    }
    let (Some(dataset_id), Some((name, size))) = (dataset_id, file) else {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "missing field"})));
    };

    if backend.fail_file.as_deref() == Some(name.as_str()) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "disk full"})));
    }
    backend.uploads.lock().unwrap().push(ReceivedFile {
        dataset_id,
        name: name.clone(),
        size,
    });
    (
        StatusCode::OK,
        Json(json!({"file_id": 1, "file_name": name, "size": size, "dataset_id": dataset_id})),
    )
}

async fn login(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] != "correct horse" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid credentials"})));
    }
    (
        StatusCode::OK,
        Json(json!({"access_token": mint_token(21, 3600), "token_type": "bearer"})),
    )
}

async fn refresh(
    State(backend): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let Some(credential) = params.get("refresh_token") else {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "missing refresh_token"})));
    };
    backend.refresh_credentials.lock().unwrap().push(credential.clone());
    (
        StatusCode::OK,
        Json(json!({"access_token": mint_token(7, 7200), "token_type": "bearer"})),
    )
}

async fn get_dataset(State(backend): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Json<Value> {
    backend.record_bearer(&headers);
    Json(json!({
        "dataset_id": id,
        "dataset_name": "Maize yields",
        "dataset_description": "Plot-level yields",
        "downloads_count": 4,
        "uploader_id": 7,
        "date_of_creation": "2024-05-01T10:00:00.5",
        "tags": ["maize", "yield"],
        "file_types": ["csv"]
    }))
}

async fn dataset_files(Path(id): Path<i64>) -> Json<Value> {
    Json(json!([
        {"file_id": 1, "file_name": "a.csv", "size": 10, "file_type": "text/csv",
         "file_date_of_upload": "2024-05-02T08:30:00", "file_url": "uploads/a.csv", "dataset_id": id},
        {"file_id": 2, "file_name": "b.csv", "file_date_of_upload": "2024-05-02T08:31:00", "dataset_id": id}
    ]))
}

async fn download(headers: HeaderMap, Path(id): Path<i64>) -> (StatusCode, Vec<u8>) {
    if headers.get("authorization").is_none() {
        return (StatusCode::UNAUTHORIZED, Vec::new());
    }
    (StatusCode::OK, format!("contents of file {id}").into_bytes())
}

async fn start_mock_backend(backend: Shared) -> String {
    let app = Router::new()
        .route("/datasets/", post(create_dataset))
        .route("/datasets/{id}", get(get_dataset))
        .route("/datasets/{id}/files", get(dataset_files))
        .route("/upload-file/", post(upload_file))
        .route("/files/{id}/download", get(download))
        .route("/users/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .with_state(backend);

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let bound_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{bound_addr}")
}

struct TestContext {
    backend: Shared,
    session: Arc<SessionManager>,
    client: Arc<ApiClient>,
    _dir: TempDir,
}

impl TestContext {
    async fn setup(backend: MockBackend) -> Self {
        Self::setup_with_idle(backend, Duration::from_secs(300)).await
    }

    async fn setup_with_idle(backend: MockBackend, idle_timeout: Duration) -> Self {
        let backend = Arc::new(backend);
        let mut config = Config::default();
        config.api.base_url = start_mock_backend(backend.clone()).await;
        config.upload.chunk_size = ByteSize(16);

        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::open(dir.path()).unwrap();
        let session = Arc::new(SessionManager::new(Arc::new(store), idle_timeout));
        session.restore();
        session.login(&mint_token(7, 3600), None).unwrap();

        let client = Arc::new(ApiClient::new(&config, session.clone()).unwrap());
        Self {
            backend,
            session,
            client,
            _dir: dir,
        }
    }

    fn orchestrator(&self) -> (UploadOrchestrator, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let orchestrator =
            UploadOrchestrator::new(self.client.clone(), self.session.clone(), notifier.clone());
        (orchestrator, notifier)
    }
}

fn batch(files: &[(&str, usize)]) -> UploadBatch {
    let limits = UploadLimits {
        max_file_size: ByteSize::kib(64),
        max_files: 10,
        accept: vec![],
    };
    let metadata = DatasetMetadata::new("A", "B").with_tags(["soil", "x"]);
    let mut batch = UploadBatch::new(metadata, limits);
    batch.selection.add(
        files
            .iter()
            .map(|(name, size)| SelectedFile::from_bytes(*name, vec![b'x'; *size])),
    );
    batch
}

#[tokio::test]
async fn test_all_files_upload_and_progress_reaches_100() {
    let ctx = TestContext::setup(MockBackend::default()).await;
    let (orchestrator, notifier) = ctx.orchestrator();
    let mut batch = batch(&[("one.csv", 40), ("two.csv", 5), ("three.csv", 100)]);

    let outcome = orchestrator.upload_dataset(&mut batch).await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.dataset_id, Some(DATASET_ID));
    assert_eq!(ctx.backend.uploaded_names(), ["one.csv", "two.csv", "three.csv"]);

    let uploads = ctx.backend.uploads.lock().unwrap().clone();
    assert!(uploads.iter().all(|f| f.dataset_id == DATASET_ID));
    assert_eq!(uploads.iter().map(|f| f.size).collect::<Vec<_>>(), [40, 5, 100]);

    let created = ctx.backend.created.lock().unwrap();
    assert_eq!(created[0]["uploader_id"], 7);
    assert_eq!(created[0]["tags"], json!(["soil"]));

    let progress = orchestrator.progress();
    assert_eq!(progress.overall_percent, 100);
    assert_eq!(progress.completed_files, 3);
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(notifier.last().unwrap().level, NoticeLevel::Success);
    assert!(batch.selection.entries().iter().all(|e| e.progress_percent() == 100));
}

#[tokio::test]
async fn test_missing_dataset_id_means_no_file_uploads() {
    let ctx = TestContext::setup(MockBackend {
        omit_dataset_id: true,
        ..Default::default()
    })
    .await;
    let (orchestrator, notifier) = ctx.orchestrator();
    let mut batch = batch(&[("x.csv", 3), ("y.csv", 3)]);

    let outcome = orchestrator.upload_dataset(&mut batch).await;

    assert!(!outcome.success);
    assert!(!outcome.error.unwrap_or_default().is_empty());
    assert_eq!(ctx.backend.upload_calls.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.last().unwrap().level, NoticeLevel::Error);
}

#[tokio::test]
async fn test_failure_on_second_file_skips_the_third() {
    let ctx = TestContext::setup(MockBackend {
        fail_file: Some("second.csv".into()),
        ..Default::default()
    })
    .await;
    let (orchestrator, _) = ctx.orchestrator();
    let mut batch = batch(&[("first.csv", 8), ("second.csv", 8), ("third.csv", 8)]);

    let outcome = orchestrator.upload_dataset(&mut batch).await;

    assert!(!outcome.success);
    assert_eq!(outcome.dataset_id, Some(DATASET_ID));
    assert_eq!(ctx.backend.upload_calls.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.backend.uploaded_names(), ["first.csv"]);

    let progress = orchestrator.progress();
    assert_eq!(progress.completed_files, 1);
    assert_eq!(progress.status, ProgressStatus::Error);
    assert_eq!(batch.selection.entries()[2].status(), FileStatus::Idle);
    assert!(batch.selection.entries()[1].error().unwrap().contains("disk full"));
}

#[tokio::test]
async fn test_unauthorized_upload_signs_out() {
    let ctx = TestContext::setup(MockBackend {
        reject_uploads: true,
        ..Default::default()
    })
    .await;
    let (orchestrator, _) = ctx.orchestrator();
    let mut batch = batch(&[("a.csv", 4), ("b.csv", 4)]);

    let outcome = orchestrator.upload_dataset(&mut batch).await;

    assert!(!outcome.success);
    assert_eq!(ctx.backend.upload_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        ctx.session.state(),
        AuthState::SignedOut(Some(SignOutReason::Unauthorized))
    );
    assert!(ctx.session.bearer_token().is_none());
}

#[tokio::test]
async fn test_login_and_bad_password() {
    let ctx = TestContext::setup(MockBackend::default()).await;
    let before = ctx.session.bearer_token();

    let err = ctx.client.login("user21@example.org", "wrong").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    // A failed credential exchange leaves the current session alone.
    assert_eq!(ctx.session.bearer_token(), before);

    let response = ctx.client.login("user21@example.org", "correct horse").await.unwrap();
    let session = ctx
        .session
        .login(&response.access_token, response.refresh_token.as_deref())
        .unwrap();
    assert_eq!(session.uploader_id(), Some(21));
}

#[tokio::test]
async fn test_activity_after_idle_refreshes_before_request() {
    let ctx = TestContext::setup_with_idle(MockBackend::default(), Duration::from_millis(200)).await;
    let original = ctx.session.bearer_token().unwrap();

    ctx.client.get_dataset(1).await.unwrap();
    assert!(ctx.backend.refresh_credentials.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    ctx.client.get_dataset(1).await.unwrap();

    let credentials = ctx.backend.refresh_credentials.lock().unwrap().clone();
    assert_eq!(credentials, [original.clone()]);
    let renewed = ctx.session.bearer_token().unwrap();
    assert_ne!(renewed, original);
    assert_eq!(ctx.backend.bearer_tokens.lock().unwrap().last(), Some(&renewed));
}

#[tokio::test]
async fn test_read_side_endpoints() {
    let ctx = TestContext::setup(MockBackend::default()).await;

    let dataset = ctx.client.get_dataset(9).await.unwrap();
    assert_eq!(dataset.dataset_id, 9);
    assert_eq!(dataset.tags, ["maize", "yield"]);

    let files = ctx.client.list_dataset_files(9).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].size, None);

    let bytes = ctx.client.download_file(2).await.unwrap();
    assert_eq!(&bytes[..], b"contents of file 2");

    ctx.session.logout(SignOutReason::UserRequested);
    assert!(ctx.client.download_file(2).await.is_err());
}

#[tokio::test]
async fn test_backend_trait_reports_chunk_progress() {
    let ctx = TestContext::setup(MockBackend::default()).await;
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let file = SelectedFile::from_bytes("ticks.csv", vec![b'1'; 40]);

    ctx.client.upload_file(DATASET_ID, &file, tx).await.unwrap();

    let mut ticks = Vec::new();
    while let Ok(tick) = rx.try_recv() {
        ticks.push(tick.sent);
    }
    assert_eq!(ticks, [16, 32, 40]);
}

#[tokio::test]
async fn test_file_on_disk_is_streamed_at_upload_time() {
    let ctx = TestContext::setup(MockBackend::default()).await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plots.csv");
    tokio::fs::write(&path, vec![b'7'; 40]).await.unwrap();
    let file = SelectedFile::from_path(&path).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    ctx.client.upload_file(DATASET_ID, &file, tx).await.unwrap();

    let uploads = ctx.backend.uploads.lock().unwrap().clone();
    assert_eq!(uploads[0].name, "plots.csv");
    assert_eq!(uploads[0].size, 40);
    let mut last = None;
    while let Ok(tick) = rx.try_recv() {
        last = Some(tick);
    }
    let last = last.unwrap();
    assert_eq!((last.sent, last.total), (40, 40));

    tokio::fs::remove_file(&path).await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::channel(64);
    let err = ctx.client.upload_file(DATASET_ID, &file, tx).await.unwrap_err();
    assert!(matches!(err, agrishare::api::ApiError::LocalFile(_)));
    assert_eq!(ctx.backend.upload_calls.load(Ordering::SeqCst), 1);
}

//! End-to-end runs of the download orchestrator against an in-memory source

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lodestone_core::builder::{BuildOptions, OsName, Platform};
use lodestone_core::engine::verify::sha1_hex;
use lodestone_core::engine::{ByteStream, FetchResponse};
use lodestone_core::{
    DownloadError, DownloadOptions, DownloadOrchestrator, FileSource, MirrorPolicy,
    StaticVersionResolver, StorageLayout, VersionDescriptor,
};
use lodestone_types::{
    CompletedResult, DownloadCategory, DownloadEvent, OriginFallback, StorageOptions, TaskStatus,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

const CHUNK: usize = 4096;

enum Reply {
    /// One chunk of the body, then nothing until the reader gives up
    Hang,
}

/// Permanent failure returned for a URL on every fetch
#[derive(Debug, Clone, Copy)]
enum Failure {
    Status(u16),
    Io,
}

impl Failure {
    fn error(self) -> DownloadError {
        match self {
            Failure::Status(status) => DownloadError::ServerError {
                status,
                message: "Refused".to_string(),
            },
            Failure::Io => DownloadError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
        }
    }
}

/// Serves registered bodies, honours offsets and logs every fetch
#[derive(Default)]
struct MemorySource {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, Failure>>,
    scripted: Mutex<HashMap<String, VecDeque<Reply>>>,
    fetches: Mutex<Vec<(String, u64)>>,
}

impl MemorySource {
    fn serve(&self, url: &str, body: Vec<u8>) {
        self.files.lock().insert(url.to_string(), body);
    }

    fn fail(&self, url: &str, failure: Failure) {
        self.failures.lock().insert(url.to_string(), failure);
    }

    fn script(&self, url: &str, reply: Reply) {
        self.scripted
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    fn fetches(&self) -> Vec<(String, u64)> {
        self.fetches.lock().clone()
    }

    fn fetches_of(&self, url: &str) -> Vec<u64> {
        self.fetches()
            .into_iter()
            .filter(|(u, _)| u == url)
            .map(|(_, offset)| offset)
            .collect()
    }
}

fn chunked(data: Vec<u8>) -> ByteStream {
    let chunks: Vec<Result<Bytes, DownloadError>> = data
        .chunks(CHUNK)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(chunks).boxed()
}

#[async_trait]
impl FileSource for MemorySource {
    async fn fetch(&self, url: &str, offset: u64) -> Result<FetchResponse, DownloadError> {
        self.fetches.lock().push((url.to_string(), offset));

        if let Some(failure) = self.failures.lock().get(url).copied() {
            return Err(failure.error());
        }
        let body = self.files.lock().get(url).cloned();
        let Some(body) = body else {
            return Err(DownloadError::ServerError {
                status: 404,
                message: "Not Found".to_string(),
            });
        };

        let reply = self.scripted.lock().get_mut(url).and_then(|q| q.pop_front());
        if let Some(Reply::Hang) = reply {
            let first = body[..CHUNK.min(body.len())].to_vec();
            let stream = futures::stream::iter(vec![Ok(Bytes::from(first))])
                .chain(futures::stream::pending())
                .boxed();
            return Ok(FetchResponse {
                resumed: false,
                content_length: Some(body.len() as u64),
                stream,
            });
        }

        let start = offset as usize;
        let resumed = start > 0 && start < body.len();
        let rest = if resumed { body[start..].to_vec() } else { body };
        Ok(FetchResponse {
            resumed,
            content_length: Some(rest.len() as u64),
            stream: chunked(rest),
        })
    }
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    source: Arc<MemorySource>,
    resolver: StaticVersionResolver,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        Self {
            _dir: dir,
            root,
            source: Arc::new(MemorySource::default()),
            resolver: StaticVersionResolver::new(),
        }
    }

    /// Register a body and return its `{url, sha1, size}` reference
    fn file(&self, url: &str, body: Vec<u8>) -> Value {
        let reference = json!({ "url": url, "sha1": sha1_hex(&body), "size": body.len() });
        self.source.serve(url, body);
        reference
    }

    fn descriptor(&mut self, descriptor: Value) {
        let descriptor: VersionDescriptor = serde_json::from_value(descriptor).unwrap();
        self.resolver.insert(descriptor);
    }

    fn orchestrator(&self, max_retries: u32, mirror: MirrorPolicy) -> DownloadOrchestrator {
        let options = DownloadOptions {
            parallelism: 4,
            max_retries,
            retry_delay: Duration::from_millis(5),
            progress_interval: Duration::from_millis(20),
            build: BuildOptions {
                storage: StorageOptions::default(),
                asset_base_url: "https://assets.test".to_string(),
                include_log_config: true,
            },
            platform: Platform::new(OsName::Linux, "6.1", "x86_64"),
            features: BTreeMap::new(),
        };
        DownloadOrchestrator::new(
            StorageLayout::new(&self.root),
            self.source.clone(),
            Arc::new(self.resolver.clone()),
            options,
            mirror,
        )
    }
}

fn body(label: &str, len: usize) -> Vec<u8> {
    label.bytes().cycle().take(len).collect()
}

async fn wait_completed(
    events: &mut broadcast::Receiver<DownloadEvent>,
    version_id: &str,
) -> CompletedResult {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(DownloadEvent::DownloadCompleted(result)) if result.version_id == version_id => {
                    return result;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), wait)
        .await
        .expect("download did not finish")
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("condition never held");
}

fn partial_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(partial_files(&path));
        } else if path.extension().map(|e| e == "part").unwrap_or(false) {
            found.push(path);
        }
    }
    found
}

/// A release with 40 libraries, 5 natives and 1,200 assets
fn full_release(fixture: &mut Fixture) {
    let client = fixture.file("https://origin.test/1.20.1/client.jar", body("client", 200_000));

    let mut objects = serde_json::Map::new();
    for i in 0..1200 {
        let data = format!("asset object number {}", i).into_bytes();
        let hash = sha1_hex(&data);
        let url = format!("https://assets.test/{}/{}", &hash[..2], hash);
        objects.insert(
            format!("minecraft/sounds/{}.ogg", i),
            json!({ "hash": hash, "size": data.len() }),
        );
        fixture.source.serve(&url, data);
    }
    let index = serde_json::to_vec(&json!({ "objects": objects })).unwrap();
    let index_ref = fixture.file("https://origin.test/indexes/5.json", index);

    let mut libraries = Vec::new();
    for i in 0..40 {
        let path = format!("com/example/lib{}/1.0/lib{}-1.0.jar", i, i);
        let mut artifact = fixture.file(
            &format!("https://libraries.test/{}", path),
            body(&format!("library {}", i), 10_000 + i * 37),
        );
        artifact["path"] = json!(path);
        libraries.push(json!({
            "name": format!("com.example:lib{}:1.0", i),
            "downloads": { "artifact": artifact }
        }));
    }
    for i in 0..5 {
        let path = format!("org/lwjgl/part{}/3.3.1/part{}-3.3.1-natives-linux.jar", i, i);
        let mut artifact = fixture.file(
            &format!("https://libraries.test/{}", path),
            body(&format!("natives {}", i), 30_000),
        );
        artifact["path"] = json!(path);
        libraries.push(json!({
            "name": format!("org.lwjgl:part{}:3.3.1:natives-linux", i),
            "downloads": { "artifact": artifact }
        }));
    }

    let mut asset_index = index_ref;
    asset_index["id"] = json!("5");
    fixture.descriptor(json!({
        "id": "1.20.1",
        "type": "release",
        "mainClass": "net.minecraft.client.main.Main",
        "javaVersion": { "component": "java-runtime-gamma", "majorVersion": 17 },
        "downloads": { "client": client },
        "assetIndex": asset_index,
        "assets": "5",
        "libraries": libraries
    }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_release_downloads_every_file() {
    let mut fixture = Fixture::new();
    full_release(&mut fixture);
    let engine = fixture.orchestrator(3, MirrorPolicy::none());
    let mut events = engine.subscribe();

    assert!(engine.start_download("1.20.1", None, None).await.unwrap());
    let result = wait_completed(&mut events, "1.20.1").await;

    assert!(result.is_success(), "failed: {:?}", result.failed);
    assert_eq!(result.success.len(), 1 + 1 + 40 + 5 + 1200);
    let count = |category: DownloadCategory| result.success.iter().filter(|t| t.category == category).count();
    assert_eq!(count(DownloadCategory::Libraries), 40);
    assert_eq!(count(DownloadCategory::Natives), 5);
    assert_eq!(count(DownloadCategory::Assets), 1200);

    let layout = StorageLayout::new(&fixture.root);
    assert_eq!(std::fs::metadata(layout.version_jar("1.20.1")).unwrap().len(), 200_000);
    assert!(partial_files(&fixture.root).is_empty());
    assert!(!engine.is_running("1.20.1"));

    // The detail event follows a successful run
    let detail = loop {
        match events.recv().await {
            Ok(DownloadEvent::CompletedInfo(detail)) => break detail,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => panic!("event channel closed"),
        }
    };
    assert_eq!(detail.id, "1.20.1");
    assert_eq!(detail.java_version.map(|j| j.major_version), Some(17));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_subscriber_still_sees_failures_in_the_result() {
    let mut fixture = Fixture::new();
    full_release(&mut fixture);
    let broken = "https://libraries.test/com/example/lib7/1.0/lib7-1.0.jar";
    fixture.source.fail(broken, Failure::Status(403));
    let engine = fixture.orchestrator(2, MirrorPolicy::none());
    let mut idle = engine.subscribe();
    let mut active = engine.subscribe();

    engine.start_download("1.20.1", None, None).await.unwrap();
    let seen = wait_completed(&mut active, "1.20.1").await;
    assert_eq!(seen.failed.len(), 1);

    let mut result = None;
    loop {
        match idle.try_recv() {
            Ok(DownloadEvent::DownloadCompleted(completed)) => result = Some(completed),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    let result = result.expect("completion event was dropped");
    assert_eq!(result.success.len(), 1246);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].task.origin_url, broken);
    assert!(result.failed[0].error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_run_fetches_nothing() {
    let mut fixture = Fixture::new();
    full_release(&mut fixture);
    let engine = fixture.orchestrator(3, MirrorPolicy::none());
    let mut events = engine.subscribe();

    engine.start_download("1.20.1", None, None).await.unwrap();
    assert!(wait_completed(&mut events, "1.20.1").await.is_success());
    let fetched = fixture.source.fetches().len();

    engine.start_download("1.20.1", None, None).await.unwrap();
    let result = wait_completed(&mut events, "1.20.1").await;
    assert!(result.is_success());
    assert_eq!(result.success.len(), 1247);
    assert_eq!(fixture.source.fetches().len(), fetched);
}

#[tokio::test]
async fn retries_stop_at_the_limit() {
    let mut fixture = Fixture::new();
    let library = fixture.file("https://libraries.test/a/b/1/b-1.jar", body("lib", 5000));
    fixture.descriptor(json!({
        "id": "broken",
        "downloads": {
            "client": { "url": "https://origin.test/missing.jar", "sha1": "00", "size": 10 }
        },
        "libraries": [
            { "name": "a:b:1", "downloads": { "artifact": library } }
        ]
    }));
    let engine = fixture.orchestrator(3, MirrorPolicy::none());
    let mut events = engine.subscribe();

    engine.start_download("broken", None, None).await.unwrap();
    let result = wait_completed(&mut events, "broken").await;

    assert!(!result.is_success());
    assert_eq!(result.success.len(), 1);
    assert_eq!(result.failed.len(), 1);
    let failed = &result.failed[0];
    assert_eq!(failed.task.status, TaskStatus::Failed);
    assert_eq!(failed.task.retry_count, 3);
    assert!(failed.error.is_some());
    assert_eq!(fixture.source.fetches_of("https://origin.test/missing.jar").len(), 3);
}

#[tokio::test]
async fn every_failure_kind_uses_the_full_retry_budget() {
    for (failure, max_retries) in [
        (Failure::Status(403), 3),
        (Failure::Status(410), 3),
        (Failure::Status(401), 5),
        (Failure::Io, 3),
    ] {
        let mut fixture = Fixture::new();
        let client = fixture.file("https://origin.test/denied.jar", body("client", 2000));
        fixture.source.fail("https://origin.test/denied.jar", failure);
        fixture.descriptor(json!({ "id": "denied", "downloads": { "client": client } }));
        let engine = fixture.orchestrator(max_retries, MirrorPolicy::none());
        let mut events = engine.subscribe();

        engine.start_download("denied", None, None).await.unwrap();
        let result = wait_completed(&mut events, "denied").await;

        assert_eq!(result.failed.len(), 1, "{:?}", failure);
        assert_eq!(result.failed[0].task.retry_count, max_retries, "{:?}", failure);
        assert_eq!(
            fixture.source.fetches_of("https://origin.test/denied.jar").len(),
            max_retries as usize,
            "{:?}",
            failure
        );
    }
}

#[tokio::test]
async fn forbidden_mirror_still_reaches_the_origin_last() {
    let mut fixture = Fixture::new();
    let client = fixture.file("https://origin.test/v/client.jar", body("client", 9000));
    fixture.source.fail("https://mirror.test/v/client.jar", Failure::Status(403));
    fixture.descriptor(json!({ "id": "mirrored", "downloads": { "client": client } }));
    let mirror = MirrorPolicy::with_base("https://mirror.test", OriginFallback::FinalAttempt);
    let engine = fixture.orchestrator(3, mirror);
    let mut events = engine.subscribe();

    engine.start_download("mirrored", None, None).await.unwrap();
    let result = wait_completed(&mut events, "mirrored").await;

    assert!(result.is_success());
    let urls: Vec<String> = fixture.source.fetches().into_iter().map(|(u, _)| u).collect();
    assert_eq!(
        urls,
        vec![
            "https://mirror.test/v/client.jar",
            "https://mirror.test/v/client.jar",
            "https://origin.test/v/client.jar",
        ]
    );
}

#[tokio::test]
async fn last_attempt_falls_back_to_the_origin() {
    let mut fixture = Fixture::new();
    let client = fixture.file("https://origin.test/v/client.jar", body("client", 9000));
    fixture.descriptor(json!({ "id": "mirrored", "downloads": { "client": client } }));
    let mirror = MirrorPolicy::with_base("https://mirror.test", OriginFallback::FinalAttempt);
    let engine = fixture.orchestrator(3, mirror);
    let mut events = engine.subscribe();

    engine.start_download("mirrored", None, None).await.unwrap();
    let result = wait_completed(&mut events, "mirrored").await;

    assert!(result.is_success());
    let urls: Vec<String> = fixture.source.fetches().into_iter().map(|(u, _)| u).collect();
    assert_eq!(
        urls,
        vec![
            "https://mirror.test/v/client.jar",
            "https://mirror.test/v/client.jar",
            "https://origin.test/v/client.jar",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_removes_partial_files() {
    let mut fixture = Fixture::new();
    let client = fixture.file("https://origin.test/big/client.jar", body("client", 100_000));
    fixture.source.script("https://origin.test/big/client.jar", Reply::Hang);
    let mut libraries = Vec::new();
    for i in 0..3 {
        let url = format!("https://libraries.test/x/y{}/1/y{}-1.jar", i, i);
        let artifact = fixture.file(&url, body("lib", 50_000));
        fixture.source.script(&url, Reply::Hang);
        libraries.push(json!({ "name": format!("x:y{}:1", i), "downloads": { "artifact": artifact } }));
    }
    fixture.descriptor(json!({
        "id": "stuck",
        "downloads": { "client": client },
        "libraries": libraries
    }));
    let engine = fixture.orchestrator(3, MirrorPolicy::none());
    let mut events = engine.subscribe();

    engine.start_download("stuck", None, None).await.unwrap();
    let source = fixture.source.clone();
    wait_for(|| source.fetches().len() == 4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(engine.cancel(Some("stuck")).await);
    let result = wait_completed(&mut events, "stuck").await;

    assert_eq!(result.cancelled.len(), 4);
    assert!(result.success.is_empty());
    assert!(partial_files(&fixture.root).is_empty());
    assert_eq!(engine.queued("stuck"), 0);
    assert!(!engine.is_running("stuck"));
    assert!(!StorageLayout::new(&fixture.root).version_jar("stuck").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_keeps_the_partial_and_resume_continues_it() {
    let mut fixture = Fixture::new();
    let url = "https://origin.test/slow/client.jar";
    let client = fixture.file(url, body("client", 64_000));
    fixture.source.script(url, Reply::Hang);
    fixture.descriptor(json!({ "id": "slow", "downloads": { "client": client } }));
    let engine = fixture.orchestrator(3, MirrorPolicy::none());
    let mut events = engine.subscribe();

    engine.start_download("slow", None, None).await.unwrap();
    let source = fixture.source.clone();
    wait_for(|| !source.fetches_of(url).is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(engine.pause(Some("slow")));
    wait_for(|| engine.queued("slow") == 1).await;
    let progress = engine.progress("slow");
    assert_eq!(progress[0].task.status, TaskStatus::Paused);

    let partial = progress[0].task.partial_path();
    assert_eq!(std::fs::metadata(&partial).unwrap().len(), CHUNK as u64);

    assert!(engine.resume(Some("slow")));
    let result = wait_completed(&mut events, "slow").await;
    assert!(result.is_success());
    assert_eq!(fixture.source.fetches_of(url), vec![0, CHUNK as u64]);
    assert!(!partial.exists());
}

#[tokio::test]
async fn starting_a_running_version_again_is_refused() {
    let mut fixture = Fixture::new();
    let url = "https://origin.test/once/client.jar";
    let client = fixture.file(url, body("client", 20_000));
    fixture.source.script(url, Reply::Hang);
    fixture.descriptor(json!({ "id": "once", "downloads": { "client": client } }));
    let engine = fixture.orchestrator(3, MirrorPolicy::none());

    assert!(engine.start_download("once", None, None).await.unwrap());
    assert!(!engine.start_download("once", None, None).await.unwrap());
    // Installing under another name is a separate run
    assert!(engine.start_download("once", Some("once-copy"), None).await.unwrap());
    assert!(engine.cancel(None).await);
}

#[tokio::test]
async fn unknown_versions_are_reported() {
    let fixture = Fixture::new();
    let engine = fixture.orchestrator(3, MirrorPolicy::none());
    let err = engine.start_download("nope", None, None).await.unwrap_err();
    assert!(matches!(err, DownloadError::VersionNotFound(id) if id == "nope"));
}

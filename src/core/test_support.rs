// Shared fixtures for unit tests: jar builders, a scripted HTTP server and a
// registry double.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::core::error::{ModError, ModResult};
use crate::core::registry::{ModRegistry, ModVersion, SearchHit, SearchQuery};

/// Write a zip archive with the given entries.
pub fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

pub fn http_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Response that promises `declared` bytes but hangs up after `body`.
pub fn truncated_response(declared: usize, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/java-archive\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Serve one scripted response per connection, in order.
///
/// Returns the base URL and a handle yielding the request lines received.
pub async fn serve(responses: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<String>>) {
    serve_after(Duration::ZERO, responses).await
}

/// Like [`serve`], but each response is held back for `delay`.
pub async fn serve_after(
    delay: Duration,
    responses: Vec<Vec<u8>>,
) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            let request = String::from_utf8_lossy(&buf);
            seen.push(request.lines().next().unwrap_or_default().to_string());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
        seen
    });

    (base, handle)
}

/// In-memory registry that counts every call.
#[derive(Default)]
pub struct FakeRegistry {
    pub versions: HashMap<String, Vec<ModVersion>>,
    pub hits: Vec<SearchHit>,
    pub by_hash: HashMap<String, ModVersion>,
    pub fail: bool,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) -> ModResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(ModError::Timeout("fake registry".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ModRegistry for FakeRegistry {
    async fn get_versions_for_mod(&self, project_id: &str) -> ModResult<Vec<ModVersion>> {
        self.record()?;
        self.versions
            .get(project_id)
            .cloned()
            .ok_or_else(|| ModError::ModNotFound(project_id.to_string()))
    }

    async fn search(&self, query: &SearchQuery) -> ModResult<Vec<SearchHit>> {
        self.record()?;
        self.queries.lock().unwrap().push(query.query.clone());
        Ok(self.hits.clone())
    }

    async fn get_project(&self, project_id: &str) -> ModResult<SearchHit> {
        self.record()?;
        self.hits
            .iter()
            .find(|h| h.project_id == project_id)
            .cloned()
            .ok_or_else(|| ModError::ModNotFound(project_id.to_string()))
    }

    async fn version_from_hash(&self, sha1: &str) -> ModResult<Option<ModVersion>> {
        self.record()?;
        Ok(self.by_hash.get(sha1).cloned())
    }
}

pub fn version(number: &str, date: &str, game_versions: &[&str], loaders: &[&str]) -> ModVersion {
    ModVersion::from_value(&serde_json::json!({
        "id": format!("id-{number}"),
        "project_id": "proj",
        "name": format!("Release {number}"),
        "version_number": number,
        "date_published": date,
        "game_versions": game_versions,
        "loaders": loaders,
        "files": [{
            "url": format!("https://cdn.example/mod-{number}.jar"),
            "filename": format!("mod-{number}.jar"),
            "hashes": { "sha1": format!("sha-{number}") }
        }]
    }))
    .unwrap()
}

pub fn hit(project_id: &str, title: &str) -> SearchHit {
    SearchHit {
        project_id: project_id.to_string(),
        slug: Some(title.to_lowercase()),
        title: title.to_string(),
        description: Some(format!("{title} from the registry")),
        author: Some("someone".into()),
        icon_url: Some(format!("https://cdn.example/{project_id}.png")),
        downloads: Some(42),
        likes: Some(7),
        last_updated: Some("2024-01-01T00:00:00Z".into()),
        categories: vec!["utility".into()],
        loaders: vec!["fabric".into()],
    }
}

//! Install sessions against a mock npm registry over HTTP.
//!
//! Uses the real `RegistryClient` and `TarballFetcher`; nothing touches the network.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use minipm_core::pkg::{
    codes, InstallSession, PackageSpec, RegistryClient, SessionOptions, TarballFetcher,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;
use tar::Builder;
use tempfile::TempDir;

type Deps = Vec<(String, String)>;

/// Packages served by the mock registry.
#[derive(Default)]
struct Packages {
    versions: BTreeMap<String, Vec<(String, Deps)>>,
    corrupt: HashSet<String>,
    broken: HashSet<String>,
}

impl Packages {
    fn new() -> Self {
        Self::default()
    }

    /// Publish versions in ascending order; the last one is `latest`.
    fn publish(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        let deps = deps
            .iter()
            .map(|(n, r)| ((*n).to_string(), (*r).to_string()))
            .collect();
        self.versions
            .entry(name.to_string())
            .or_default()
            .push((version.to_string(), deps));
        self
    }

    /// Serve garbage instead of the tarball for `name@version`.
    fn corrupt(mut self, id: &str) -> Self {
        self.corrupt.insert(id.to_string());
        self
    }

    /// Answer every metadata request for `name` with a 500.
    fn broken(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }
}

struct ServerState {
    base_url: String,
    packages: Packages,
    hits: Mutex<Vec<String>>,
}

impl ServerState {
    fn hit(&self, path: String) {
        self.hits.lock().unwrap().push(path);
    }
}

#[derive(Serialize)]
struct Dist {
    tarball: String,
}

#[derive(Serialize)]
struct VersionDoc<'a> {
    name: &'a str,
    version: &'a str,
    dependencies: IndexMap<&'a str, &'a str>,
    dist: Dist,
    #[serde(skip_serializing_if = "Option::is_none")]
    versions: Option<IndexMap<&'a str, serde_json::Value>>,
}

struct MockRegistry {
    url: String,
    state: Arc<ServerState>,
}

impl MockRegistry {
    /// Start the mock registry on a free port in a background thread.
    fn start(packages: Packages) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(ServerState {
            base_url: url.clone(),
            packages,
            hits: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/:name/-/:file", get(handle_tarball))
            .route("/:name/:tag", get(handle_document))
            .with_state(Arc::clone(&state));

        thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        Self { url, state }
    }

    fn hits(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().len()
    }

    fn session(&self, retries: u32) -> (InstallSession<RegistryClient, TarballFetcher>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let client = RegistryClient::new(&self.url).unwrap();
        let fetcher = TarballFetcher::new(client.http().clone());
        let session = InstallSession::new(client, fetcher, dir.path().join("node_modules"))
            .with_options(SessionOptions {
                retries,
                ..SessionOptions::default()
            });
        (session, dir)
    }
}

async fn handle_document(
    State(state): State<Arc<ServerState>>,
    Path((name, tag)): Path<(String, String)>,
) -> Response {
    state.hit(format!("/{name}/{tag}"));

    if state.packages.broken.contains(&name) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    let Some(versions) = state.packages.versions.get(&name) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let is_latest = tag == "latest";
    let entry = if is_latest {
        versions.last()
    } else {
        versions.iter().find(|(v, _)| *v == tag)
    };
    let Some((version, deps)) = entry else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let doc = VersionDoc {
        name: &name,
        version,
        dependencies: deps.iter().map(|(n, r)| (n.as_str(), r.as_str())).collect(),
        dist: Dist {
            tarball: format!("{}/{name}/-/{name}-{version}.tgz", state.base_url),
        },
        versions: is_latest.then(|| {
            versions
                .iter()
                .map(|(v, _)| (v.as_str(), serde_json::json!({ "version": v })))
                .collect()
        }),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&doc).unwrap(),
    )
        .into_response()
}

async fn handle_tarball(
    State(state): State<Arc<ServerState>>,
    Path((name, file)): Path<(String, String)>,
) -> Response {
    state.hit(format!("/{name}/-/{file}"));

    // Tarball format: name-version.tgz
    let version = file
        .strip_prefix(&format!("{name}-"))
        .and_then(|s| s.strip_suffix(".tgz"))
        .unwrap_or("");

    let published = state
        .packages
        .versions
        .get(&name)
        .is_some_and(|vs| vs.iter().any(|(v, _)| v == version));
    if !published {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }

    let body = if state.packages.corrupt.contains(&format!("{name}@{version}")) {
        b"this is not a gzip stream".to_vec()
    } else {
        create_test_tarball(&name, version)
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/gzip")],
        Body::from(body),
    )
        .into_response()
}

/// Create a test tarball with a package.json.
fn create_test_tarball(name: &str, version: &str) -> Vec<u8> {
    let pkg_json = format!(r#"{{"name":"{name}","version":"{version}","main":"index.js"}}"#);
    let index_js = b"module.exports = 42;";

    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);

        let mut header = tar::Header::new_gnu();
        header.set_path("package/package.json").unwrap();
        header.set_size(pkg_json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, pkg_json.as_bytes()).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_path("package/index.js").unwrap();
        header.set_size(index_js.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &index_js[..]).unwrap();

        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

fn spec(s: &str) -> PackageSpec {
    PackageSpec::parse(s).unwrap()
}

fn installed_version(dir: &TempDir, name: &str) -> Option<String> {
    let path = dir
        .path()
        .join("node_modules")
        .join(name)
        .join("package.json");
    let raw = std::fs::read_to_string(path).ok()?;
    let json: serde_json::Value = serde_json::from_str(&raw).ok()?;
    json["version"].as_str().map(str::to_string)
}

#[tokio::test]
async fn test_install_with_transitive_dependency() {
    let registry = MockRegistry::start(
        Packages::new()
            .publish("foo", "1.0.0", &[("bar", "^1.0.0")])
            .publish("bar", "1.0.0", &[])
            .publish("bar", "1.2.0", &[]),
    );
    let (mut session, dir) = registry.session(0);

    let report = session.install_all(&[spec("foo")]).await;

    assert!(report.ok(), "install failed: {:?}", report.roots);
    assert_eq!(installed_version(&dir, "foo").as_deref(), Some("1.0.0"));
    assert_eq!(installed_version(&dir, "bar").as_deref(), Some("1.2.0"));
    assert!(dir.path().join("node_modules/bar/index.js").exists());

    assert_eq!(registry.hits("/bar/-/bar-1.2.0.tgz"), 1);
    assert_eq!(registry.hits("/bar/-/bar-1.0.0.tgz"), 0);
    assert_eq!(registry.hits("/bar/latest"), 1);
}

#[tokio::test]
async fn test_metadata_fetched_once_per_session() {
    let registry = MockRegistry::start(
        Packages::new()
            .publish("foo", "1.0.0", &[("bar", "^1.0.0")])
            .publish("bar", "1.0.0", &[]),
    );
    let (mut session, _dir) = registry.session(0);

    assert!(session.install_all(&[spec("foo")]).await.ok());
    let after_first = registry.total_hits();

    let report = session.install_all(&[spec("foo"), spec("bar@1.0.0")]).await;

    assert!(report.ok());
    assert!(report.packages.is_empty());
    assert_eq!(registry.total_hits(), after_first);
}

#[tokio::test]
async fn test_upgrade_replaces_directory() {
    let registry = MockRegistry::start(
        Packages::new()
            .publish("x", "1.0.0", &[])
            .publish("x", "1.5.0", &[]),
    );
    let (mut session, dir) = registry.session(0);

    let report = session
        .install_all(&[spec("x@1.0.0"), spec("x@^1.5.0")])
        .await;

    assert!(report.ok());
    assert_eq!(report.stats.fetched, 2);
    assert_eq!(installed_version(&dir, "x").as_deref(), Some("1.5.0"));

    // No staging or backup directories are left behind
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("node_modules"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "x")
        .collect();
    assert!(leftovers.is_empty(), "unexpected entries: {leftovers:?}");
}

#[tokio::test]
async fn test_corrupt_tarball_leaves_no_directory() {
    let registry = MockRegistry::start(
        Packages::new()
            .publish("app", "1.0.0", &[("bad", "1.0.0")])
            .publish("bad", "1.0.0", &[])
            .corrupt("bad@1.0.0"),
    );
    let (mut session, dir) = registry.session(0);

    let report = session.install_all(&[spec("app")]).await;

    let (failed, err) = report.failures().next().unwrap();
    assert_eq!(failed.name, "app");
    assert_eq!(err.code(), codes::PKG_EXTRACT_FAILED);
    assert!(err.message().contains("bad@1.0.0"));
    assert!(!dir.path().join("node_modules/bad").exists());
    assert_eq!(installed_version(&dir, "app").as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_unknown_package_does_not_stop_other_roots() {
    let registry = MockRegistry::start(Packages::new().publish("foo", "1.0.0", &[]));
    let (mut session, dir) = registry.session(0);

    let report = session.install_all(&[spec("ghost"), spec("foo")]).await;

    assert!(!report.ok());
    assert_eq!(
        report.roots[0].result.as_ref().unwrap_err().code(),
        codes::PKG_NOT_FOUND
    );
    assert!(report.roots[1].result.is_ok());
    assert_eq!(installed_version(&dir, "foo").as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_registry_error_is_retried() {
    let registry = MockRegistry::start(Packages::new().publish("flaky", "1.0.0", &[]).broken("flaky"));
    let (mut session, _dir) = registry.session(2);

    let err = session.install(&spec("flaky")).await.unwrap_err();

    assert_eq!(err.code(), codes::PKG_REGISTRY_ERROR);
    assert_eq!(registry.hits("/flaky/latest"), 3);
}

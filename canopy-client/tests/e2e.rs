//! End-to-end tests: the real server router on an ephemeral port, driven
//! through `RemoteClient` and the sync workflows.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use canopy_client::{
    file_url, sync, ClientError, FetchCause, FetchOptions, LocalStateStore, MockFs,
    RemoteClient, StoreOptions,
};
use canopy_server::config::MountConfig;
use canopy_server::{build_router, AppState, Config};

struct Server {
    base: String,
    dir: tempfile::TempDir,
}

impl Server {
    fn url(&self, mount: &str) -> String {
        format!("{}/{}/", self.base, mount)
    }

    fn root(&self, mount: &str) -> PathBuf {
        self.dir.path().join(mount)
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Server with a read-only hashed `src` mount and a writable hashed `dest`.
async fn spawn_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let mut mounts = BTreeMap::new();
    for (name, writable) in [("src", false), ("dest", true)] {
        std::fs::create_dir_all(dir.path().join(name)).unwrap();
        mounts.insert(
            name.to_string(),
            MountConfig {
                path: dir.path().join(name),
                writable,
                checksum: true,
            },
        );
    }
    let config = Config {
        mounts,
        ..Config::default()
    };
    let state = AppState::from_config(&config).unwrap();
    let base = serve(build_router(Arc::new(state))).await;
    Server { base, dir }
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn tree_contents(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let kind = entry.file_type().unwrap();
            if kind.is_dir() {
                stack.push(path);
            } else if kind.is_file() {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                out.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }
    out
}

fn patterned(len: usize, seed: u32) -> Vec<u8> {
    (0..len as u32)
        .map(|i| (i.wrapping_mul(2654435761).wrapping_add(seed) >> 13) as u8)
        .collect()
}

// ===========================================
// ManifestTransport
// ===========================================

#[tokio::test]
async fn manifest_fetch_and_mount_listing() {
    let server = spawn_server().await;
    write(&server.root("src"), "a.txt", b"alpha");
    write(&server.root("src"), "nested/b.bin", &[1u8; 100]);

    let client = RemoteClient::new();
    let manifest = client.fetch_manifest(&server.url("src")).await.unwrap();
    assert_eq!(
        manifest.paths().collect::<Vec<_>>(),
        vec!["a.txt", "nested/b.bin"]
    );
    assert_eq!(manifest.get("nested/b.bin").unwrap().size, 100);
    assert_ne!(manifest.get("a.txt").unwrap().hash, 0);

    let mounts = client.list_mounts(&server.base).await.unwrap();
    assert_eq!(mounts, vec!["dest", "src"]);
}

#[tokio::test]
async fn partial_manifest_is_kept_alongside_error() {
    let app = Router::new()
        .route(
            "/good/",
            get(|| async {
                "{\"name\": \"a\", \"size\": 37665, \"mode\": 644, \"mtime\": 1402853551, \"hash\": 90018}\n\
                 {\"name\": \"b\", \"size\": 21866, \"mode\": 644, \"mtime\": 1402853551, \"hash\": 62130}\n\
                 {\"name\": \"c\", \"size\": 75648, \"mode\": 644, \"mtime\": 1402853551, \"hash\": 51301, \"linkdest\": \"a\"}"
            }),
        )
        .route(
            "/partial/",
            get(|| async {
                "{\"name\": \"a\", \"size\": 37665, \"mode\": 644, \"mtime\": 1402853551, \"hash\": 90018} blah"
            }),
        )
        .route(
            "/broken/",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "Broken") }),
        );
    let base = serve(app).await;
    let client = RemoteClient::new();

    let manifest = client.fetch_manifest(&format!("{base}/good/")).await.unwrap();
    assert_eq!(manifest.len(), 3);
    let c = manifest.get("c").unwrap();
    assert_eq!((c.size, c.mode, c.hash), (75648, 644, 51301));
    assert_eq!(c.link_target, "a");

    let err = client
        .fetch_manifest(&format!("{base}/partial/"))
        .await
        .unwrap_err();
    assert!(matches!(err.cause(), FetchCause::Decode(_)));
    assert_eq!(err.partial().len(), 1);
    assert_eq!(err.partial().get("a").unwrap().hash, 90018);

    let err = client
        .fetch_manifest(&format!("{base}/broken/"))
        .await
        .unwrap_err();
    assert!(matches!(err.cause(), FetchCause::Status(s) if s.as_u16() == 500));
    assert!(err.partial().is_empty());
}

// ===========================================
// Transfers through the filesystem capability
// ===========================================

#[tokio::test]
async fn download_retries_create_after_making_parents() {
    let server = spawn_server().await;
    write(&server.root("src"), "x", b"content");
    let url = file_url(&server.url("src"), "x").unwrap();
    let dest = Path::new("/staging/some/path");

    let fs = MockFs::new();
    fs.fail_next_create(io::ErrorKind::NotFound);
    let client = RemoteClient::with_fs(Arc::new(fs.clone()));
    let bytes = client.download_file(&url, dest).await.unwrap();
    assert_eq!(bytes, 7);
    assert_eq!(fs.written(dest).unwrap(), b"content");
    assert_eq!(fs.created_dirs(), vec![PathBuf::from("/staging/some")]);

    let fs = MockFs::new();
    fs.fail_next_create(io::ErrorKind::NotFound);
    fs.fail_next_create(io::ErrorKind::PermissionDenied);
    let client = RemoteClient::with_fs(Arc::new(fs));
    let err = client.download_file(&url, dest).await.unwrap_err();
    assert!(matches!(err, ClientError::Io { op: "create", .. }));
}

#[tokio::test]
async fn download_of_missing_file_is_a_status_error() {
    let server = spawn_server().await;
    let url = file_url(&server.url("src"), "none").unwrap();
    let fs = MockFs::new();
    let client = RemoteClient::with_fs(Arc::new(fs.clone()));
    let err = client.download_file(&url, Path::new("/x")).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status.as_u16() == 404));
    assert!(fs.written(Path::new("/x")).is_none());
}

#[tokio::test]
async fn upload_reads_through_fs_and_checks_status() {
    let server = spawn_server().await;
    let fs = MockFs::new();
    fs.add_file("/staging/f", b"uploaded".to_vec());
    let client = RemoteClient::with_fs(Arc::new(fs.clone()));

    client
        .upload_file(Path::new("/staging/f"), &file_url(&server.url("dest"), "f").unwrap())
        .await
        .unwrap();
    assert_eq!(std::fs::read(server.root("dest").join("f")).unwrap(), b"uploaded");

    let err = client
        .upload_file(Path::new("/staging/none"), &file_url(&server.url("dest"), "g").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_missing_local_file());

    let err = client
        .upload_file(Path::new("/staging/f"), &file_url(&server.url("src"), "f").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status.as_u16() == 405));
}

#[tokio::test]
async fn delete_reports_server_refusal() {
    let server = spawn_server().await;
    write(&server.root("src"), "keep", b"k");
    write(&server.root("dest"), "drop", b"d");
    let client = RemoteClient::new();

    client
        .delete_file(&file_url(&server.url("dest"), "drop").unwrap())
        .await
        .unwrap();
    assert!(!server.root("dest").join("drop").exists());

    let err = client
        .delete_file(&file_url(&server.url("src"), "keep").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status.as_u16() == 405));
    assert!(server.root("src").join("keep").exists());
}

// ===========================================
// Workflows
// ===========================================

#[tokio::test]
async fn snapshot_fetch_store_mirrors_source() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let src_db = work.path().join("src.db");
    let dest_db = work.path().join("dest.db");
    let staging = work.path().join("staging");

    write(&server.root("src"), "same.txt", b"unchanged");
    write(&server.root("src"), "big.bin", &patterned(50_000, 1));
    write(&server.root("src"), "dir/new.txt", b"brand new");
    write(&server.root("src"), "changed.txt", b"new content, longer");
    write(&server.root("dest"), "same.txt", b"unchanged");
    write(&server.root("dest"), "changed.txt", b"old content");
    write(&server.root("dest"), "extra/stale.txt", b"remove me");

    let client = RemoteClient::new();
    assert_eq!(
        sync::build_snapshot(&client, &server.url("src"), &src_db).await.unwrap(),
        4
    );
    assert_eq!(
        sync::build_snapshot(&client, &server.url("dest"), &dest_db).await.unwrap(),
        3
    );

    let fetched = sync::fetch(
        &client,
        &dest_db,
        &server.url("src"),
        &staging,
        &FetchOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(fetched.downloaded, vec!["big.bin", "changed.txt", "dir/new.txt"]);
    assert_eq!(fetched.to_remove, vec!["extra/stale.txt"]);
    assert_eq!(fetched.bytes, 50_000 + 19 + 9);
    assert_eq!(std::fs::read(staging.join("dir/new.txt")).unwrap(), b"brand new");
    assert!(!staging.join("same.txt").exists());

    let stored = sync::store(
        &client,
        &src_db,
        &server.url("dest"),
        &staging,
        &StoreOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(stored.deleted, vec!["extra/stale.txt"]);
    assert_eq!(stored.uploaded, vec!["big.bin", "changed.txt", "dir/new.txt"]);
    assert!(stored.skipped.is_empty());

    assert_eq!(tree_contents(&server.root("dest")), tree_contents(&server.root("src")));

    // A second round finds nothing to do.
    sync::build_snapshot(&client, &server.url("dest"), &dest_db).await.unwrap();
    let again = sync::fetch(
        &client,
        &dest_db,
        &server.url("src"),
        &staging,
        &FetchOptions::default(),
    )
    .await
    .unwrap();
    assert!(again.downloaded.is_empty());
    assert!(again.to_remove.is_empty());
}

#[tokio::test]
async fn fetch_against_empty_snapshot_takes_everything() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let empty_db = work.path().join("empty.db");
    let staging = work.path().join("staging");
    write(&server.root("src"), "a", &[0u8; 100]);
    write(&server.root("src"), "b", &[0u8; 200]);

    // Leftovers from an earlier run must not survive.
    write(&staging, "leftover", b"old");

    let client = RemoteClient::new();
    sync::empty_snapshot(&empty_db).await.unwrap();
    let report = sync::fetch(
        &client,
        &empty_db,
        &server.url("src"),
        &staging,
        &FetchOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(report.downloaded, vec!["b", "a"]);
    assert!(!staging.join("leftover").exists());
}

#[tokio::test]
async fn fetch_never_touches_the_destination_store() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let dest_db = work.path().join("dest.db");
    write(&server.root("src"), "a", b"a");

    let client = RemoteClient::new();
    sync::build_snapshot(&client, &server.url("dest"), &dest_db).await.unwrap();
    let before = std::fs::read(&dest_db).unwrap();
    sync::fetch(
        &client,
        &dest_db,
        &server.url("src"),
        &work.path().join("staging"),
        &FetchOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(std::fs::read(&dest_db).unwrap(), before);
}

#[tokio::test]
async fn store_skips_paths_with_nothing_staged() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let src_db = work.path().join("src.db");
    let staging = work.path().join("staging");
    write(&server.root("src"), "present", b"here");
    write(&server.root("src"), "vanished", b"gone before staging");

    let client = RemoteClient::new();
    sync::build_snapshot(&client, &server.url("src"), &src_db).await.unwrap();
    write(&staging, "present", b"here");

    let report = sync::store(
        &client,
        &src_db,
        &server.url("dest"),
        &staging,
        &StoreOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(report.uploaded, vec!["present"]);
    assert_eq!(report.skipped, vec!["vanished"]);
    assert!(!server.root("dest").join("vanished").exists());
}

#[tokio::test]
async fn store_aborts_when_destination_refuses() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let db = work.path().join("db");
    let staging = work.path().join("staging");
    write(&server.root("dest"), "f", b"content");
    write(&staging, "f", b"content");

    let client = RemoteClient::new();
    sync::build_snapshot(&client, &server.url("dest"), &db).await.unwrap();
    // The read-only mount refuses the upload.
    let err = sync::store(&client, &db, &server.url("src"), &staging, &StoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status.as_u16() == 405));
}

async fn refuse_deletes(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    if request.method() == axum::http::Method::DELETE {
        return axum::response::IntoResponse::into_response((
            axum::http::StatusCode::FORBIDDEN,
            "no deletes",
        ));
    }
    next.run(request).await
}

#[tokio::test]
async fn store_stops_at_a_failed_delete() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dest");
    write(&root, "extra", b"not in the snapshot");
    let mut mounts = BTreeMap::new();
    mounts.insert(
        "dest".to_string(),
        MountConfig {
            path: root.clone(),
            writable: true,
            checksum: true,
        },
    );
    let config = Config {
        mounts,
        ..Config::default()
    };
    let state = AppState::from_config(&config).unwrap();
    let app = build_router(Arc::new(state)).layer(axum::middleware::from_fn(refuse_deletes));
    let base = serve(app).await;

    let work = tempfile::tempdir().unwrap();
    let db = work.path().join("src.db");
    let staging = work.path().join("staging");
    write(&staging, "new", b"fresh");
    // A snapshot of a tree holding only "new".
    let mut store = LocalStateStore::create(&db);
    store.add_file(canopy_types::FileRecord {
        path: "new".into(),
        size: 5,
        hash: 1,
        ..Default::default()
    });
    store.release().await.unwrap();
    let client = RemoteClient::new();

    let err = sync::store(
        &client,
        &db,
        &format!("{base}/dest/"),
        &staging,
        &StoreOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status.as_u16() == 403));
    assert!(root.join("extra").exists());
    assert!(!root.join("new").exists());
}

#[tokio::test]
async fn snapshot_failure_leaves_no_store() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let db = work.path().join("db");
    let client = RemoteClient::new();
    let err = sync::build_snapshot(&client, &server.url("nope"), &db)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Manifest(_)));
    assert!(!db.exists());
}

#[tokio::test]
async fn delta_fetch_and_delta_store() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let src_db = work.path().join("src.db");
    let dest_db = work.path().join("dest.db");
    let staging = work.path().join("staging");

    let old = patterned(200_000, 7);
    let mut new = old.clone();
    new[100_000..100_016].copy_from_slice(b"sixteen  changed");
    new.extend_from_slice(b"appended tail");
    write(&server.root("src"), "doc.bin", &new);
    write(&server.root("dest"), "doc.bin", &old);

    let client = RemoteClient::new();
    sync::build_snapshot(&client, &server.url("src"), &src_db).await.unwrap();
    sync::build_snapshot(&client, &server.url("dest"), &dest_db).await.unwrap();

    // The destination tree doubles as the local basis.
    let fetched = sync::fetch(
        &client,
        &dest_db,
        &server.url("src"),
        &staging,
        &FetchOptions {
            basis: Some(server.root("dest")),
        },
    )
    .await
    .unwrap();
    assert_eq!(fetched.patched, vec!["doc.bin"]);
    assert!(fetched.downloaded.is_empty());
    assert_eq!(std::fs::read(staging.join("doc.bin")).unwrap(), new);

    let stored = sync::store(
        &client,
        &src_db,
        &server.url("dest"),
        &staging,
        &StoreOptions { delta: true },
    )
    .await
    .unwrap();
    assert_eq!(stored.patched, vec!["doc.bin"]);
    assert_eq!(std::fs::read(server.root("dest").join("doc.bin")).unwrap(), new);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_listed_by_fetch_and_created_by_store() {
    let server = spawn_server().await;
    let work = tempfile::tempdir().unwrap();
    let src_db = work.path().join("src.db");
    let dest_db = work.path().join("dest.db");
    let staging = work.path().join("staging");

    write(&server.root("src"), "target.txt", b"t");
    std::os::unix::fs::symlink("../target.txt", server.root("src").join("link")).unwrap();
    std::fs::create_dir_all(server.root("src").join("deep")).unwrap();
    std::os::unix::fs::symlink("../target.txt", server.root("src").join("deep/link")).unwrap();

    let client = RemoteClient::new();
    sync::build_snapshot(&client, &server.url("src"), &src_db).await.unwrap();
    sync::empty_snapshot(&dest_db).await.unwrap();

    let fetched = sync::fetch(
        &client,
        &dest_db,
        &server.url("src"),
        &staging,
        &FetchOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(fetched.downloaded, vec!["target.txt"]);
    let mut links = fetched.symlinks.clone();
    links.sort();
    assert_eq!(links, vec!["deep/link", "link"]);
    assert!(!staging.join("link").exists());

    let stored = sync::store(
        &client,
        &src_db,
        &server.url("dest"),
        &staging,
        &StoreOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(stored.linked.len(), 2);
    assert_eq!(
        std::fs::read_link(server.root("dest").join("deep/link")).unwrap(),
        PathBuf::from("../target.txt")
    );

    let snapshot = LocalStateStore::open(&src_db).await.unwrap();
    assert!(snapshot.manifest().get("link").unwrap().is_symlink());
}

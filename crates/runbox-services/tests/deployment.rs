use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use runbox_artifact::UploadConfig;
use runbox_core::config::RuntimeConfig;
use runbox_core::protocol::{BucketKind, PatchChange};
use runbox_sandbox::{IsolationConfig, SandboxManager};
use runbox_services::{DeploymentManager, ServiceError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOUBLER: &str = "import json, sys\ndata = json.load(sys.stdin)\nprint(data['x'] * 2)\n";

fn manager(root: &Path) -> DeploymentManager {
    let config = RuntimeConfig::with_dirs(root.join("bucket"), root.join("work"));
    DeploymentManager::new(config, IsolationConfig::disabled(), Arc::new(SandboxManager::new()))
}

async fn serve_file(server: &MockServer, route: &str, body: &str) -> String {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

async fn serve_manifest(server: &MockServer, manifest: serde_json::Value) -> String {
    Mock::given(method("GET"))
        .and(path("/meta.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(manifest))
        .mount(server)
        .await;
    format!("{}/meta.json", server.uri())
}

/// Deploy a manifest whose files are served from `server`.
async fn deploy_files(mgr: &DeploymentManager, server: &MockServer, files: &[(&str, &str)]) -> String {
    let mut entries = Vec::new();
    for (i, (rel, body)) in files.iter().enumerate() {
        let url = serve_file(server, &format!("/files/{}", i), body).await;
        entries.push(json!({"path": rel, "url": url}));
    }
    let meta_url = serve_manifest(server, json!({"entry": files[0].0, "files": entries})).await;
    mgr.deploy(&meta_url, Some("team-a")).await.unwrap().sandbox_id
}

fn cached_files(root: &Path, execution_id: &str) -> Vec<PathBuf> {
    runbox_fs::walk(&root.join("bucket/invokes").join(execution_id)).unwrap()
}

fn deploy_dirs(root: &Path) -> usize {
    std::fs::read_dir(root.join("work"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn deploy_then_invoke_doubles_input() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());

    let id = deploy_files(&mgr, &server, &[("main.py", DOUBLER)]).await;
    let result = mgr.invoke(&id, &json!({"x": 2}), None).await.unwrap();

    assert_eq!(result.result, "4");
    assert!(result.uploads.is_empty());

    let deployment = mgr.get_deployment(&id).unwrap();
    assert_eq!(deployment.entry, "main.py");
    assert_eq!(deployment.namespace.as_deref(), Some("team-a"));
    assert!(deployment.work_dir.join("main.py").is_file());
    assert_eq!(mgr.list_deployments(), vec![deployment]);
}

#[tokio::test]
async fn nested_files_get_parent_dirs() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let main = "from pkg.util import triple\nprint(triple(3))\n";

    let id = deploy_files(
        &mgr,
        &server,
        &[
            ("main.py", main),
            ("pkg/__init__.py", ""),
            ("pkg/util.py", "def triple(v):\n    return v * 3\n"),
        ],
    )
    .await;

    let result = mgr.invoke(&id, &json!(null), None).await.unwrap();
    assert_eq!(result.result, "9");
}

#[tokio::test]
async fn missing_entry_leaves_no_directory() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let url = serve_file(&server, "/files/main.py", DOUBLER).await;
    let meta_url = serve_manifest(&server, json!({"files": [{"path": "main.py", "url": url}]})).await;

    let err = mgr.deploy(&meta_url, None).await.unwrap_err();

    assert!(matches!(err, ServiceError::Manifest(_)), "{:?}", err);
    assert_eq!(deploy_dirs(root.path()), 0);
    assert!(mgr.list_deployments().is_empty());
}

#[tokio::test]
async fn escaping_manifest_path_is_rejected() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let url = serve_file(&server, "/files/evil.py", "x = 1").await;
    let meta_url = serve_manifest(
        &server,
        json!({"entry": "main.py", "files": [{"path": "../evil.py", "url": url}]}),
    )
    .await;

    let err = mgr.deploy(&meta_url, None).await.unwrap_err();

    assert!(matches!(err, ServiceError::Manifest(_)), "{:?}", err);
    assert_eq!(deploy_dirs(root.path()), 0);
}

#[tokio::test]
async fn failed_download_removes_directory() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let good = serve_file(&server, "/files/main.py", DOUBLER).await;
    let meta_url = serve_manifest(
        &server,
        json!({"entry": "main.py", "files": [
            {"path": "main.py", "url": good},
            {"path": "data.csv", "url": format!("{}/files/missing", server.uri())}
        ]}),
    )
    .await;

    let err = mgr.deploy(&meta_url, None).await.unwrap_err();

    assert!(matches!(err, ServiceError::Setup(_)), "{:?}", err);
    assert_eq!(deploy_dirs(root.path()), 0);
}

#[tokio::test]
async fn only_new_files_are_cached_and_uploaded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let main = "open('a.txt','w').write('rewritten')\nopen('b.txt','w').write('fresh')\nprint('ok')\n";

    let id = deploy_files(&mgr, &server, &[("main.py", main), ("a.txt", "seed")]).await;
    let upload = UploadConfig {
        upload_token: "tok".into(),
        file_upload_url: format!("{}/upload", server.uri()),
        public: false,
    };
    let result = mgr.invoke(&id, &json!({}), Some(&upload)).await.unwrap();

    let names: Vec<&str> = result.uploads.iter().map(|u| u.filename.as_str()).collect();
    assert_eq!(names, vec!["b.txt"]);
    assert_eq!(cached_files(root.path(), &result.execution_id), vec![PathBuf::from("b.txt")]);

    let cached = mgr
        .get_file(&result.execution_id, "b.txt", BucketKind::Invokes)
        .unwrap();
    assert_eq!(std::fs::read_to_string(cached).unwrap(), "fresh");
}

#[tokio::test]
async fn invokes_share_the_deployment_directory() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let main = "import os\n\
                n = int(open('count.txt').read()) if os.path.exists('count.txt') else 0\n\
                open('count.txt','w').write(str(n + 1))\n\
                print(n + 1)\n";

    let id = deploy_files(&mgr, &server, &[("main.py", main)]).await;
    let first = mgr.invoke(&id, &json!({}), None).await.unwrap();
    let second = mgr.invoke(&id, &json!({}), None).await.unwrap();

    assert_eq!(first.result, "1");
    assert_eq!(second.result, "2");
    assert_eq!(cached_files(root.path(), &first.execution_id), vec![PathBuf::from("count.txt")]);
    // Existed before the second run, so it is not new.
    assert!(cached_files(root.path(), &second.execution_id).is_empty());
}

#[tokio::test]
async fn sandbox_id_and_unbuffered_env_are_injected() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let main = "import os\nprint(os.environ['SANDBOX_ID'], os.environ['PYTHONUNBUFFERED'])\n";

    let id = deploy_files(&mgr, &server, &[("main.py", main)]).await;
    let result = mgr.invoke(&id, &json!({}), None).await.unwrap();

    assert_eq!(result.result, format!("{} 1", id));
}

#[tokio::test]
async fn non_zero_exit_is_a_process_error() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let main = "import sys\nsys.stderr.write('bad input')\nsys.exit(3)\n";

    let id = deploy_files(&mgr, &server, &[("main.py", main)]).await;
    let err = mgr.invoke(&id, &json!({}), None).await.unwrap_err();

    match err {
        ServiceError::Process {
            exit_code,
            signal,
            stderr,
        } => {
            assert_eq!(exit_code, Some(3));
            assert_eq!(signal, None);
            assert!(stderr.contains("bad input"));
        }
        other => panic!("expected process error, got {:?}", other),
    }
}

#[tokio::test]
async fn patch_applies_changes_in_order() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());

    let id = deploy_files(&mgr, &server, &[("main.py", DOUBLER), ("old.txt", "x")]).await;
    let tripler = serve_file(
        &server,
        "/v2/main.py",
        "import json, sys\nprint(json.load(sys.stdin)['x'] * 3)\n",
    )
    .await;
    let helper = serve_file(&server, "/v2/helper.py", "VALUE = 1\n").await;

    mgr.patch(
        &id,
        &[
            PatchChange::Modify { path: "main.py".into(), url: tripler },
            PatchChange::Add { path: "lib/helper.py".into(), url: helper },
            PatchChange::Delete { path: "old.txt".into() },
            PatchChange::Delete { path: "never-existed.txt".into() },
        ],
        true,
    )
    .await
    .unwrap();

    let work_dir = mgr.get_deployment(&id).unwrap().work_dir;
    assert!(work_dir.join("lib/helper.py").is_file());
    assert!(!work_dir.join("old.txt").exists());
    let result = mgr.invoke(&id, &json!({"x": 2}), None).await.unwrap();
    assert_eq!(result.result, "6");
}

#[tokio::test]
async fn patch_rejects_escaping_paths_and_unknown_ids() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let id = deploy_files(&mgr, &server, &[("main.py", DOUBLER)]).await;

    let err = mgr
        .patch(&id, &[PatchChange::Delete { path: "../../etc/passwd".into() }], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation { .. }), "{:?}", err);

    let err = mgr.patch("no-such-id", &[], false).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn delete_removes_entry_and_directory() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let id = deploy_files(&mgr, &server, &[("main.py", DOUBLER)]).await;
    let work_dir = mgr.get_deployment(&id).unwrap().work_dir;

    assert!(mgr.delete_deployment(&id).await);

    assert!(!work_dir.exists());
    assert!(mgr.get_deployment(&id).is_none());
    let err = mgr.invoke(&id, &json!({"x": 2}), None).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(!mgr.delete_deployment(&id).await);
}

#[tokio::test]
async fn concurrent_invokes_race_on_the_same_directory() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let main = "import json, sys, time\n\
                name = json.load(sys.stdin)['name']\n\
                time.sleep(0.3)\n\
                open(name + '.txt', 'w').write(name)\n\
                time.sleep(0.3)\n\
                print(name)\n";
    let id = deploy_files(&mgr, &server, &[("main.py", main)]).await;

    let input_a = json!({"name": "a"});
    let input_b = json!({"name": "b"});
    let (a, b) = tokio::join!(
        mgr.invoke(&id, &input_a, None),
        mgr.invoke(&id, &input_b, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.result, "a");
    assert_eq!(b.result, "b");
    // No locking: each run may also report the other's file as new.
    let both = [PathBuf::from("a.txt"), PathBuf::from("b.txt")];
    let seen_a = cached_files(root.path(), &a.execution_id);
    let seen_b = cached_files(root.path(), &b.execution_id);
    assert!(seen_a.contains(&both[0]));
    assert!(seen_b.contains(&both[1]));
    assert!(seen_a.iter().chain(&seen_b).all(|p| both.contains(p)));
}

#[cfg(unix)]
#[tokio::test]
async fn patch_never_writes_through_links_planted_by_the_entrypoint() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("victim.txt"), "untouched").unwrap();
    let mgr = manager(root.path());
    let main = "import json, os, sys\n\
                target = json.load(sys.stdin)['target']\n\
                os.symlink(target, 'out')\n\
                os.symlink(os.path.join(target, 'victim.txt'), 'link.txt')\n\
                print('planted')\n";

    let id = deploy_files(&mgr, &server, &[("main.py", main)]).await;
    let target = outside.path().to_string_lossy().to_string();
    let result = mgr.invoke(&id, &json!({"target": target}), None).await.unwrap();
    assert_eq!(result.result, "planted");
    let payload = serve_file(&server, "/v2/pwn.txt", "pwned").await;

    let err = mgr
        .patch(&id, &[PatchChange::Add { path: "out/pwn.txt".into(), url: payload.clone() }], false)
        .await
        .unwrap_err();
    assert!(
        matches!(err, ServiceError::Validation { ref field, .. } if field == "changes[0].path"),
        "{:?}",
        err
    );
    assert!(!outside.path().join("pwn.txt").exists());

    let err = mgr
        .patch(
            &id,
            &[
                PatchChange::Delete { path: "never-existed.txt".into() },
                PatchChange::Delete { path: "out/victim.txt".into() },
            ],
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation { ref field, .. } if field == "changes[1].path"));
    assert!(outside.path().join("victim.txt").exists());

    // A link as the target itself is replaced, not followed.
    mgr.patch(&id, &[PatchChange::Modify { path: "link.txt".into(), url: payload }], false)
        .await
        .unwrap();
    let work_dir = mgr.get_deployment(&id).unwrap().work_dir;
    let link = work_dir.join("link.txt");
    assert!(!std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(std::fs::read_to_string(&link).unwrap(), "pwned");
    assert_eq!(
        std::fs::read_to_string(outside.path().join("victim.txt")).unwrap(),
        "untouched"
    );

    mgr.patch(&id, &[PatchChange::Delete { path: "out".into() }], false)
        .await
        .unwrap();
    assert!(std::fs::symlink_metadata(work_dir.join("out")).is_err());
    assert!(outside.path().join("victim.txt").exists());
}

#[tokio::test(flavor = "current_thread")]
async fn invoke_snapshots_many_files_on_a_single_thread() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let mgr = manager(root.path());
    let main = "import os\n\
                for d in range(8):\n\
                \x20   os.makedirs(f'gen/d{d}', exist_ok=True)\n\
                \x20   for f in range(40):\n\
                \x20       open(f'gen/d{d}/f{f}.txt','w').write(str(f))\n\
                print('done')\n";
    let seeds: Vec<(String, String)> = (0..100)
        .map(|i| (format!("seed/s{}.txt", i), i.to_string()))
        .collect();
    let mut files: Vec<(&str, &str)> = vec![("main.py", main)];
    files.extend(seeds.iter().map(|(p, b)| (p.as_str(), b.as_str())));

    let id = deploy_files(&mgr, &server, &files).await;
    let result = mgr.invoke(&id, &json!({}), None).await.unwrap();

    assert_eq!(result.result, "done");
    let cached = cached_files(root.path(), &result.execution_id);
    assert_eq!(cached.len(), 320);
    assert!(cached.iter().all(|p| p.starts_with("gen")));
}

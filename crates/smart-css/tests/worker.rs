//! Isolated execution through the real worker binary and supervised tasks.

use smart_css::{
    BundleJob, BundleOptions, Error, Isolation, Logger, ProcessIsolate, SupervisorPolicy, bundle,
    supervise,
};
use std::path::{Path, PathBuf};

const WORKER: &str = env!("CARGO_BIN_EXE_smart-css-worker");

fn options(root: &Path) -> BundleOptions {
    BundleOptions {
        bundle_dir: root.join("dist"),
        cache_dir: root.join("cache"),
        asset_dir: root.join("dist"),
        logger: Logger::disabled(),
        ..BundleOptions::default()
    }
}

/// Generous enough for a cold process start on a loaded machine.
fn patient() -> SupervisorPolicy {
    SupervisorPolicy {
        kill_timeout_ms: 30_000,
        ..SupervisorPolicy::default()
    }
}

fn write_sources(root: &Path) -> PathBuf {
    std::fs::write(root.join("vars.css"), ".vars { display: flex }\n").unwrap();
    let entry = root.join("main.css");
    std::fs::write(&entry, "@import \"./vars.css\";\n.main { display: block }\n").unwrap();
    entry
}

#[test_log::test(tokio::test)]
async fn test_process_worker_bundles_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_sources(dir.path());
    let job = BundleJob::new(entry.to_string_lossy(), options(dir.path()));

    let output = supervise(&ProcessIsolate::new(WORKER), &job, &patient())
        .await
        .unwrap();

    assert!(output.code.contains(".vars{display:flex}"), "{}", output.code);
    assert!(output.code.contains(".main{display:block}"), "{}", output.code);
    assert_eq!(output.watch_files.len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_process_worker_reports_failures_without_retrying() {
    let dir = tempfile::tempdir().unwrap();
    let job = BundleJob::new(
        dir.path().join("missing.css").to_string_lossy(),
        options(dir.path()),
    );

    let err = supervise(&ProcessIsolate::new(WORKER), &job, &patient())
        .await
        .unwrap_err();
    let Error::Worker(message) = &err else {
        panic!("expected a reported worker failure, got {err}");
    };
    assert!(message.contains("missing.css"), "{message}");
}

#[test_log::test(tokio::test)]
async fn test_missing_worker_binary_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let job = BundleJob::new("main.css", options(dir.path()));
    let isolate = ProcessIsolate::new(dir.path().join("no-such-worker"));

    let err = supervise(&isolate, &job, &patient()).await.unwrap_err();
    assert!(matches!(err, Error::Worker(_)), "{err}");
}

#[test_log::test(tokio::test)]
async fn test_build_with_each_isolation_mode() {
    let modes = [
        Isolation::Task { policy: patient() },
        Isolation::Process {
            worker: Some(PathBuf::from(WORKER)),
            policy: patient(),
        },
    ];

    for isolation in modes {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_sources(dir.path());
        let reports = bundle(
            &[entry.to_string_lossy().into_owned()],
            &options(dir.path()),
            &isolation,
        )
        .await
        .unwrap();

        let css = std::fs::read_to_string(&reports[0].output).unwrap();
        assert!(css.contains(".main{display:block}"), "{isolation:?}: {css}");
    }
}

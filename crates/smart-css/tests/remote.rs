//! End-to-end bundling against a mock CDN.

use smart_css::{BundleOptions, Error, Isolation, LogLevel, Logger, bundle, bundle_one};
use std::path::{Path, PathBuf};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot really an image";

fn options(root: &Path) -> BundleOptions {
    BundleOptions {
        bundle_dir: root.join("dist"),
        cache_dir: root.join("cache"),
        asset_dir: root.join("dist/assets"),
        asset_public_path: "/assets/".to_string(),
        logger: Logger::new(LogLevel::Debug),
        ..BundleOptions::default()
    }
}

fn css(body: &str, etag: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/css; charset=utf-8")
        .insert_header("etag", etag)
        .set_body_string(body)
}

fn png(etag: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "image/png")
        .insert_header("etag", etag)
        .set_body_bytes(PNG)
}

/// `base.css` imports `./theme.css` and references `./img/bg.png`, all relative to its URL.
async fn mount_cdn(server: &MockServer, fetches: u64) {
    Mock::given(method("GET"))
        .and(path("/lib/base.css"))
        .respond_with(css(
            "@import \"./theme.css\";\n.base { background: url(./img/bg.png) }\n",
            "\"base-v1\"",
        ))
        .expect(fetches)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lib/theme.css"))
        .respond_with(css(".theme { display: grid }\n", "\"theme-v1\""))
        .expect(fetches)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lib/img/bg.png"))
        .respond_with(png("\"bg-v1\""))
        .expect(fetches)
        .mount(server)
        .await;
}

fn host_dir(root: &Path, server: &MockServer) -> PathBuf {
    root.join("cache")
        .join("http")
        .join(format!("127.0.0.1:{}", server.address().port()))
}

#[test_log::test(tokio::test)]
async fn test_remote_entry_is_cached_and_relative_references_resolve() {
    let server = MockServer::start().await;
    mount_cdn(&server, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let options = options(dir.path());

    let entry = format!("{}/lib/base.css", server.uri());
    let output = bundle_one(&entry, &options).await.unwrap();

    let host = host_dir(dir.path(), &server);
    assert!(host.join("lib/base.css").is_file());
    assert!(host.join("lib/theme.css").is_file());
    assert_eq!(std::fs::read(dir.path().join("dist/assets/bg.png")).unwrap(), PNG);

    assert!(output.code.contains(".theme{display:grid}"), "{}", output.code);
    assert!(output.code.contains("/assets/bg.png"), "{}", output.code);
    assert!(!output.code.contains("http://"), "{}", output.code);
    assert!(!output.code.contains("@import"), "{}", output.code);

    // Remote files are never watched.
    assert!(output.watch_files.is_empty());
    assert_eq!(output.cached.len(), 3);
    assert!(output.cached.iter().all(|record| record.written));
}

#[test_log::test(tokio::test)]
async fn test_shared_references_are_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shared.css"))
        .respond_with(css(".shared { display: block }\n", "\"s1\""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(png("\"l1\""))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    let uri = server.uri();
    std::fs::write(
        src.join("main.css"),
        format!(
            "@import \"./a.css\";\n@import \"./b.css\";\n.main {{ background: url({uri}/logo.png) }}\n"
        ),
    )
    .unwrap();
    for name in ["a", "b"] {
        std::fs::write(
            src.join(format!("{name}.css")),
            format!(
                "@import \"{uri}/shared.css\";\n.{name} {{ background: url({uri}/logo.png?v=2) }}\n"
            ),
        )
        .unwrap();
    }

    let options = options(dir.path());
    let entry = src.join("main.css");
    let output = bundle_one(entry.to_str().unwrap(), &options).await.unwrap();

    assert_eq!(output.code.matches(".shared{").count(), 1, "{}", output.code);
    let logo_writes = output
        .cached
        .iter()
        .filter(|record| record.path.ends_with("logo.png"))
        .count();
    assert_eq!(logo_writes, 1);
    assert_eq!(output.watch_files.len(), 3);
}

#[test_log::test(tokio::test)]
async fn test_redirected_stylesheet_is_cached_under_its_final_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pkg/style.css"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/pkg@1.2.3/dist/style.css"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pkg@1.2.3/dist/style.css"))
        .respond_with(css(".pkg { background: url(./bg.png) }\n", "\"pkg-v1\""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pkg@1.2.3/dist/bg.png"))
        .respond_with(png("\"bg-v1\""))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("main.css");
    std::fs::write(&src, format!("@import url({}/pkg/style.css);\n", server.uri())).unwrap();
    let options = options(dir.path());

    let output = bundle_one(src.to_str().unwrap(), &options).await.unwrap();

    let host = host_dir(dir.path(), &server);
    assert!(host.join("pkg@1.2.3/dist/style.css").is_file());
    assert!(!host.join("pkg/style.css").exists());
    assert_eq!(std::fs::read(dir.path().join("dist/assets/bg.png")).unwrap(), PNG);
    assert!(output.code.contains("/assets/bg.png"), "{}", output.code);
    assert!(
        output.cached.iter().all(|record| record.url.contains("/pkg@1.2.3/dist/")),
        "{:?}",
        output.cached
    );
}

#[test_log::test(tokio::test)]
async fn test_import_and_url_of_one_file_share_a_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x.css"))
        .respond_with(css(".x { display: block }\n", "\"x1\""))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("main.css");
    let uri = server.uri();
    std::fs::write(
        &src,
        format!("@import url({uri}/x.css);\n.a {{ background: url({uri}/x.css) }}\n"),
    )
    .unwrap();
    let options = options(dir.path());

    let output = bundle_one(src.to_str().unwrap(), &options).await.unwrap();

    assert!(output.code.contains(".x{display:block}"), "{}", output.code);
    assert!(output.code.contains("/assets/x.css"), "{}", output.code);
    let mut placed: Vec<_> = output.cached.iter().map(|record| record.path.clone()).collect();
    placed.sort();
    assert_eq!(
        placed,
        vec![
            host_dir(dir.path(), &server).join("x.css"),
            dir.path().join("dist/assets/x.css"),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_unchanged_remote_files_are_not_rewritten() {
    let server = MockServer::start().await;
    mount_cdn(&server, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let options = options(dir.path());
    let entry = format!("{}/lib/base.css", server.uri());

    let first = bundle_one(&entry, &options).await.unwrap();
    let cached_base = host_dir(dir.path(), &server).join("lib/base.css");
    let mtime = std::fs::metadata(&cached_base).unwrap().modified().unwrap();

    let second = bundle_one(&entry, &options).await.unwrap();

    assert_eq!(first.code, second.code);
    assert_eq!(second.cached.len(), 3);
    assert!(second.cached.iter().all(|record| !record.written), "{:?}", second.cached);
    assert_eq!(std::fs::metadata(&cached_base).unwrap().modified().unwrap(), mtime);
}

#[test_log::test(tokio::test)]
async fn test_missing_remote_fails_the_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.css"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("main.css");
    std::fs::write(&src, format!("@import \"{}/gone.css\";\n.a {{ color: red }}\n", server.uri())).unwrap();
    let options = options(dir.path());

    let err = bundle_one(src.to_str().unwrap(), &options).await.unwrap_err();
    assert!(matches!(err, Error::RemoteFetchFailed { ref url, .. } if url.ends_with("/gone.css")), "{err}");
    assert!(err.is_retryable());
}

#[test_log::test(tokio::test)]
async fn test_build_wraps_the_first_failing_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.css");
    let bad = dir.path().join("bad.css");
    std::fs::write(&good, ".good { display: block }\n").unwrap();
    std::fs::write(&bad, format!("@import \"{}/x.css\";\n", server.uri())).unwrap();
    let options = options(dir.path());

    let entries = vec![
        good.to_string_lossy().into_owned(),
        bad.to_string_lossy().into_owned(),
    ];
    let err = bundle(&entries, &options, &Isolation::InProcess)
        .await
        .unwrap_err();

    let Error::Bundle { entry, output, source } = &err else {
        panic!("expected a wrapped bundle error, got {err}");
    };
    assert_eq!(entry, &entries[1]);
    assert_eq!(output, &dir.path().join("dist/bad.css"));
    assert!(matches!(**source, Error::RemoteFetchFailed { .. }));

    // The healthy entry still produced its bundle.
    assert!(dir.path().join("dist/good.css").is_file());
}

#[test_log::test(tokio::test)]
async fn test_build_writes_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.css");
    let b = dir.path().join("b.css");
    std::fs::write(&a, ".a { display: block }\n").unwrap();
    std::fs::write(&b, ".b { display: none }\n").unwrap();
    let options = BundleOptions {
        dev: true,
        ..options(dir.path())
    };

    let entries = vec![a.to_string_lossy().into_owned(), b.to_string_lossy().into_owned()];
    let reports = bundle(&entries, &options, &Isolation::InProcess).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].output, dir.path().join("dist/a.css"));
    assert_eq!(reports[1].source_map, Some(dir.path().join("dist/b.map.css")));
    let css = std::fs::read_to_string(&reports[1].output).unwrap();
    assert!(css.starts_with(".b{display:none}"), "{css}");
    assert!(css.ends_with("/*# sourceMappingURL=b.map.css */"));
}

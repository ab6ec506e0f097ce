//! Source platform tests against mocked GitHub and Gitee contents APIs

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use imagescan::config::{CommunityConfig, Location, PlatformKind};
use imagescan::platform::{create_platform, PlatformError, COMMIT_MESSAGE};
use imagescan::task::Output;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SCAN_CONFIG: &str = r#"
scanner:
  global:
    default_arches: [linux/amd64, linux/arm64]
    default_interval: 1d
    output:
      repo: scan-reports
      path: reports
images:
  - image: openeuler
    tags:
      - tag: docker.io/openeuler/openeuler:24.03
"#;

fn community(platform: PlatformKind, server: &MockServer) -> CommunityConfig {
    CommunityConfig {
        name: "openeuler".to_string(),
        platform,
        token: "secret-token".to_string(),
        scan_config_location: Location {
            repo: "infrastructure".to_string(),
            path: "scan/config.yaml".to_string(),
            git_ref: "main".to_string(),
        },
        api_url: Some(server.uri()),
    }
}

/// Base64 wrapped at 60 columns, as the contents APIs return it
fn wrapped_base64(content: &str) -> String {
    let encoded = STANDARD.encode(content);
    encoded
        .as_bytes()
        .chunks(60)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

fn output() -> Output {
    Output {
        repo: "scan-reports".to_string(),
        path: "reports".to_string(),
    }
}

async fn body_of(server: &MockServer, http_method: &str) -> Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests
        .iter()
        .find(|r| r.method.as_str() == http_method)
        .expect("request sent");
    serde_json::from_slice(&request.body).unwrap()
}

// ============================================================================
// GitHub
// ============================================================================

#[tokio::test]
async fn test_github_fetch_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/openeuler/infrastructure/contents/scan/config.yaml"))
        .and(query_param("ref", "main"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "3d21ec53a331a6f037a91c368710b99387d012c1",
            "content": wrapped_base64(SCAN_CONFIG),
            "encoding": "base64"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Github, &server), Duration::from_secs(5)).unwrap();
    let snapshot = platform.fetch_snapshot().await.unwrap();

    assert_eq!(snapshot.fingerprint, "3d21ec53a331a6f037a91c368710b99387d012c1");
    assert_eq!(snapshot.config.images.len(), 1);
    assert_eq!(snapshot.config.scanner.global.default_arches.len(), 2);
    assert_eq!(snapshot.config.scanner.global.output, output());
}

#[tokio::test]
async fn test_github_server_error_is_recoverable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Github, &server), Duration::from_secs(5)).unwrap();
    let err = platform.fetch_snapshot().await.unwrap_err();

    assert!(matches!(err, PlatformError::Status { status: 502, .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_github_publish_creates_new_report() {
    let server = MockServer::start().await;
    let report = "/repos/openeuler/scan-reports/contents/reports/docker.io/library/nginx/1.25.md";

    Mock::given(method("GET"))
        .and(path(report))
        .and(query_param("ref", "main"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(report))
        .and(body_partial_json(json!({"message": COMMIT_MESSAGE, "branch": "main"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Github, &server), Duration::from_secs(5)).unwrap();
    platform
        .publish(&output(), "# Scan time: now\n", "docker.io/library/nginx/1.25.md")
        .await
        .unwrap();

    let body = body_of(&server, "PUT").await;
    assert!(body.get("sha").is_none());
    let content = STANDARD.decode(body["content"].as_str().unwrap()).unwrap();
    assert_eq!(content, b"# Scan time: now\n");
}

#[tokio::test]
async fn test_github_publish_updates_existing_report() {
    let server = MockServer::start().await;
    let report = "/repos/openeuler/scan-reports/contents/reports/docker.io/library/nginx/1.25.md";

    Mock::given(method("GET"))
        .and(path(report))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "previous-sha",
            "content": ""
        })))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(report))
        .and(body_partial_json(json!({"sha": "previous-sha"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Github, &server), Duration::from_secs(5)).unwrap();
    platform
        .publish(&output(), "report", "docker.io/library/nginx/1.25.md")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_without_output_repo_fails() {
    let server = MockServer::start().await;
    let platform = create_platform(&community(PlatformKind::Github, &server), Duration::from_secs(5)).unwrap();

    let err = platform
        .publish(&Output::default(), "report", "a.md")
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::MissingOutput));
}

// ============================================================================
// Gitee
// ============================================================================

#[tokio::test]
async fn test_gitee_fetch_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v5/repos/openeuler/infrastructure/contents/scan/config.yaml"))
        .and(query_param("ref", "main"))
        .and(query_param("access_token", "secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "file",
            "sha": "gitee-sha",
            "content": wrapped_base64(SCAN_CONFIG)
        })))
        .expect(1)
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Gitee, &server), Duration::from_secs(5)).unwrap();
    let snapshot = platform.fetch_snapshot().await.unwrap();

    assert_eq!(snapshot.fingerprint, "gitee-sha");
    assert_eq!(snapshot.config.images[0].tags.len(), 1);
}

#[tokio::test]
async fn test_gitee_missing_scan_config() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Gitee, &server), Duration::from_secs(5)).unwrap();
    let err = platform.fetch_snapshot().await.unwrap_err();

    assert!(matches!(err, PlatformError::UnexpectedResponse { .. }));
}

#[tokio::test]
async fn test_gitee_publish_creates_with_post() {
    let server = MockServer::start().await;
    let report = "/v5/repos/openeuler/scan-reports/contents/reports/quay.io/openeuler/openeuler/24.03.md";

    Mock::given(method("GET"))
        .and(path(report))
        .and(query_param("ref", "master"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(report))
        .and(body_partial_json(json!({
            "access_token": "secret-token",
            "message": COMMIT_MESSAGE,
            "branch": "master"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Gitee, &server), Duration::from_secs(5)).unwrap();
    platform
        .publish(&output(), "report", "quay.io/openeuler/openeuler/24.03.md")
        .await
        .unwrap();

    let body = body_of(&server, "POST").await;
    assert!(body.get("sha").is_none());
}

#[tokio::test]
async fn test_gitee_publish_updates_with_put() {
    let server = MockServer::start().await;
    let report = "/v5/repos/openeuler/scan-reports/contents/reports/quay.io/openeuler/openeuler/24.03.md";

    Mock::given(method("GET"))
        .and(path(report))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "old-blob",
            "content": ""
        })))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(report))
        .and(body_partial_json(json!({"sha": "old-blob", "branch": "master"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let platform = create_platform(&community(PlatformKind::Gitee, &server), Duration::from_secs(5)).unwrap();
    platform
        .publish(&output(), "report", "quay.io/openeuler/openeuler/24.03.md")
        .await
        .unwrap();
}

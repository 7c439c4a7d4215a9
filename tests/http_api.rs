mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{context, fingerprint, tiny_limits};
use dedup_uploader::{
    DiskBackend, MemoryBackend, UrlSigner, handlers::AppState, routes::routes,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

async fn memory_app() -> Router {
    let ctx = context(Arc::new(MemoryBackend::new()), tiny_limits()).await;
    routes(1 << 20).with_state(AppState::new(ctx, None))
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn upload_request(name: &str, content: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/files")
        .header("x-filename", name)
        .header("x-file-extra", "{\"tag\":\"test\"}")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(content.to_vec()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = memory_app().await;
    let response = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["memory"]["ok"], true);
}

#[tokio::test]
async fn upload_then_read_back_record_and_content() {
    let app = memory_app().await;
    let content = b"0123456789abcdef";
    let fp = fingerprint(content);

    let response = app.clone().oneshot(upload_request("digits.txt", content)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["fingerprint"], fp.as_str());
    assert_eq!(record["extra"], "{\"tag\":\"test\"}");

    let response = app.clone().oneshot(upload_request("other.txt", content)).await.unwrap();
    let again = body_json(response).await;
    assert_eq!(again, record);

    let response = app.clone().oneshot(get(&format!("/files/{}", fp))).await.unwrap();
    assert_eq!(body_json(response).await["filename"], "digits.txt");

    let response = app
        .clone()
        .oneshot(get(&format!("/files/{}/content", fp)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(body_bytes(response).await, content);

    let request = Request::builder()
        .uri(format!("/files/{}/content", fp))
        .header(header::RANGE, "bytes=2-5")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/16");
    assert_eq!(body_bytes(response).await, b"2345");

    for (range, content_range, body) in [
        ("bytes=12-", "bytes 12-15/16", &content[12..]),
        ("bytes=-3", "bytes 13-15/16", &content[13..]),
    ] {
        let request = Request::builder()
            .uri(format!("/files/{}/content", fp))
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], content_range);
        assert_eq!(body_bytes(response).await, body);
    }
}

#[tokio::test]
async fn unknown_and_malformed_fingerprints() {
    let app = memory_app().await;
    let response = app
        .clone()
        .oneshot(get("/files/ffffffffffffffffffffffffffffffff"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/files/not-a-hash/content")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let missing_name = Request::builder()
        .method("POST")
        .uri("/files")
        .body(Body::from("x"))
        .unwrap();
    let response = app.oneshot(missing_name).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chunked_upload_over_http() {
    let app = memory_app().await;
    let content = (0..20u8).collect::<Vec<_>>();
    let fp = fingerprint(&content);
    let base = format!(
        "/chunks?origin_fingerprint={}&origin_filename=parts.bin&origin_size=20&chunk_count=2",
        fp
    );

    let request = Request::builder()
        .method("PUT")
        .uri(format!("{}&chunk_number=1", base))
        .body(Body::from(content[..16].to_vec()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let upload_id = response.headers()["x-upload-id"].to_str().unwrap().to_string();
    let pending = body_json(response).await;
    assert_eq!(pending["status"], "pending");
    assert_eq!(pending["upload_id"], upload_id.as_str());
    assert_eq!(pending["part"]["size"], 16);

    // too small and not last: rejected, but the session id is still reported
    let request = Request::builder()
        .method("PUT")
        .uri(format!("{}&chunk_number=2&upload_id={}", base, upload_id))
        .body(Body::from(content[16..19].to_vec()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-upload-id"], upload_id.as_str());

    let request = Request::builder()
        .method("PUT")
        .uri(format!(
            "{}&chunk_number=2&upload_id={}&is_last_chunk=true",
            base, upload_id
        ))
        .body(Body::from(content[16..].to_vec()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let done = body_json(response).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["file"]["size"], 20);

    let response = app
        .oneshot(get(&format!("/files/{}/content", fp)))
        .await
        .unwrap();
    assert_eq!(body_bytes(response).await, content);
}

#[tokio::test]
async fn presigned_links_from_disk_backend() {
    let dir = tempfile::tempdir().unwrap();
    let signer = UrlSigner::new("http://files.test", "secret").unwrap();
    let backend = DiskBackend::new(dir.path()).with_signer(signer.clone());
    let ctx = context(Arc::new(backend), tiny_limits()).await;
    let app = routes(1 << 20).with_state(AppState::new(ctx, Some(signer)));

    let content = b"signed content";
    let fp = fingerprint(content);
    let response = app.clone().oneshot(upload_request("s.txt", content)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get(&format!("/files/{}/url?expires_in=60&download=1", fp)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let url = url::Url::parse(body["url"].as_str().unwrap()).unwrap();
    assert_eq!(url.host_str(), Some("files.test"));
    assert!(url.query_pairs().any(|(k, v)| k == "download" && v == "1"));

    let target = format!("{}?{}", url.path(), url.query().unwrap());
    let response = app.clone().oneshot(get(&target)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, content);

    let tampered = target.replace("expires=", "expires=1");
    let response = app.clone().oneshot(get(&tampered)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let rewritten = target.replace("download=1", "download=0");
    let response = app.clone().oneshot(get(&rewritten)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let appended = format!("{}&inline=1", target);
    let response = app.clone().oneshot(get(&appended)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(get(&format!("/files/{}/url?expires_in=0", fp)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn memory_backend_refuses_to_presign() {
    let app = memory_app().await;
    let content = b"no links";
    let fp = fingerprint(content);
    app.clone().oneshot(upload_request("n.txt", content)).await.unwrap();

    let response = app
        .oneshot(get(&format!("/files/{}/url", fp)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

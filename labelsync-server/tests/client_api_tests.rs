//! Integration tests for the client API (`/api/v1`)
//!
//! Covers access code rejection, version and mapping, label file delivery
//! (HEAD, conditional GET, ranges) and daily bundles.

mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use chrono::NaiveDate;
use common::{body_bytes, body_json, header, request, zip_entry_names, TestApp, CODE};
use labelsync_common::time;
use sha2::{Digest, Sha256};

const LABEL: &[u8] = b"%PDF-1.4 label body for 1Z999";

fn with_code(path: &str) -> String {
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{}{}code={}", path, sep, CODE)
}

// =============================================================================
// Access code
// =============================================================================

#[tokio::test]
async fn test_rejections_share_one_body() {
    let app = TestApp::with_client().await;

    let missing = app.get("/api/v1/version").await;
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);
    let missing = body_bytes(missing).await;

    let malformed = app.get("/api/v1/version?code=12ab56").await;
    assert_eq!(malformed.status(), StatusCode::FORBIDDEN);
    let malformed = body_bytes(malformed).await;

    let wrong = app.get("/api/v1/version?code=000000").await;
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
    let wrong = body_bytes(wrong).await;

    // A repeated parameter fails query parsing; it must not leak a 400
    let repeated = app
        .get(&format!("/api/v1/version?code={}&code={}", CODE, CODE))
        .await;
    assert_eq!(repeated.status(), StatusCode::FORBIDDEN);
    let repeated = body_bytes(repeated).await;

    assert_eq!(missing, malformed);
    assert_eq!(malformed, wrong);
    assert_eq!(wrong, repeated);

    let body: serde_json::Value = serde_json::from_slice(&wrong).unwrap();
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_health_needs_no_code() {
    let app = TestApp::new().await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "labelsync-server");
    assert!(body["version"].is_string());
}

// =============================================================================
// Version and mapping
// =============================================================================

#[tokio::test]
async fn test_version_is_stable_until_a_change() {
    let app = TestApp::with_client().await;

    let first = body_json(app.get(&with_code("/api/v1/version")).await).await;
    let version = first["version"].as_str().unwrap().to_string();
    assert_eq!(first["list_version"], first["version"]);
    assert!(first["server_version"].is_string());

    let again = body_json(app.get(&with_code("/api/v1/version")).await).await;
    assert_eq!(again["version"], version.as_str());

    app.state.store.upsert("A-100", "1Z 999").await.unwrap();

    let after = body_json(app.get(&with_code("/api/v1/version")).await).await;
    assert!(after["version"].as_str().unwrap() > version.as_str());
}

#[tokio::test]
async fn test_mapping_lists_orders_and_file_only_rows() {
    let app = TestApp::with_client().await;
    app.state.store.upsert("A-100", "1Z 999").await.unwrap();
    app.put_label("LX-55", LABEL).await;

    let response = app.get(&with_code("/api/v1/mapping")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let version = body_json(app.get(&with_code("/api/v1/version")).await).await;
    assert_eq!(body["version"], version["version"]);

    let rows = body["mappings"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["order_id"], "A-100");
    assert_eq!(rows[0]["tracking_no"], "1Z_999");
    assert_eq!(rows[1]["order_id"], "");
    assert_eq!(rows[1]["tracking_no"], "LX-55");
}

#[tokio::test]
async fn test_lookup_by_order_id() {
    let app = TestApp::with_client().await;
    app.state.store.upsert("ORD-7", "1z 77").await.unwrap();

    let response = app.get(&with_code("/api/v1/lookup?order_id=ORD-7")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["order_id"], "ORD-7");
    assert_eq!(body["tracking_no"], "1z_77");
    assert_eq!(body["pdf_url"], "/api/v1/file/1z_77");

    let unknown = app.get(&with_code("/api/v1/lookup?order_id=ORD-8")).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let anonymous = app.get("/api/v1/lookup?order_id=ORD-7").await;
    assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);
}

// =============================================================================
// Label files
// =============================================================================

#[tokio::test]
async fn test_file_full_download_carries_validators() {
    let app = TestApp::with_client().await;
    app.put_label("1Z999", LABEL).await;

    let response = app.get(&with_code("/api/v1/file/1Z999")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "application/pdf");
    assert_eq!(header(&response, "accept-ranges"), "bytes");
    assert_eq!(header(&response, "content-length"), LABEL.len().to_string());
    assert!(header(&response, "etag").starts_with("W/\""));
    assert_eq!(
        header(&response, "x-checksum-sha256"),
        format!("{:x}", Sha256::digest(LABEL))
    );
    assert_eq!(body_bytes(response).await, LABEL);
}

#[tokio::test]
async fn test_file_lookup_tolerates_case_and_shape() {
    let app = TestApp::with_client().await;
    app.put_label("1Z 999", LABEL).await;

    // Canonical key of the request matches
    let spaced = app.get(&with_code("/api/v1/file/1Z%20999")).await;
    assert_eq!(spaced.status(), StatusCode::OK);

    // Case-insensitive directory scan
    let lower = app.get(&with_code("/api/v1/file/1z_999")).await;
    assert_eq!(lower.status(), StatusCode::OK);

    let missing = app.get(&with_code("/api/v1/file/NOPE")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_head_and_conditional_get() {
    let app = TestApp::with_client().await;
    app.put_label("1Z999", LABEL).await;

    let head = app.send(request("HEAD", &with_code("/api/v1/file/1Z999"))).await;
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(header(&head, "content-length"), LABEL.len().to_string());
    let etag = header(&head, "etag").to_string();
    assert!(body_bytes(head).await.is_empty());

    let conditional = Request::builder()
        .uri(with_code("/api/v1/file/1Z999"))
        .header("if-none-match", &etag)
        .body(Body::empty())
        .unwrap();
    let response = app.send(conditional).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&response, "etag"), etag);
    assert!(body_bytes(response).await.is_empty());

    let stale = Request::builder()
        .uri(with_code("/api/v1/file/1Z999"))
        .header("if-none-match", "W/\"1-1\"")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(stale).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_file_range_and_if_range() {
    let app = TestApp::with_client().await;
    app.put_label("1Z999", LABEL).await;
    let etag = header(&app.get(&with_code("/api/v1/file/1Z999")).await, "etag").to_string();

    let ranged = Request::builder()
        .uri(with_code("/api/v1/file/1Z999"))
        .header("range", "bytes=0-3")
        .header("if-range", &etag)
        .body(Body::empty())
        .unwrap();
    let response = app.send(ranged).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header(&response, "content-range"),
        format!("bytes 0-3/{}", LABEL.len())
    );
    assert_eq!(header(&response, "content-length"), "4");
    assert_eq!(body_bytes(response).await, b"%PDF");

    let tail = Request::builder()
        .uri(with_code("/api/v1/file/1Z999"))
        .header("range", "bytes=-5")
        .body(Body::empty())
        .unwrap();
    let response = app.send(tail).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(response).await, &LABEL[LABEL.len() - 5..]);

    // Validator mismatch: whole file
    let mismatched = Request::builder()
        .uri(with_code("/api/v1/file/1Z999"))
        .header("range", "bytes=0-3")
        .header("if-range", "W/\"1-1\"")
        .body(Body::empty())
        .unwrap();
    let response = app.send(mismatched).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, LABEL);

    // Unsatisfiable: whole file
    let beyond = Request::builder()
        .uri(with_code("/api/v1/file/1Z999"))
        .header("range", "bytes=9999-")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(beyond).await.status(), StatusCode::OK);
}

// =============================================================================
// Daily bundles
// =============================================================================

#[tokio::test]
async fn test_daily_bundle_built_on_demand() {
    let app = TestApp::with_client().await;
    app.put_label("1Z999", LABEL).await;
    app.put_label("LX-55", b"%PDF-1.4 second").await;

    let today = time::dashed_day(time::today());
    let response = app
        .get(&with_code(&format!("/api/v1/pdf-zips/daily?date={}", today)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "application/zip");
    let etag = header(&response, "etag").to_string();

    let bytes = body_bytes(response).await;
    assert_eq!(zip_entry_names(&bytes), vec!["1Z999.pdf", "LX-55.pdf"]);
    assert!(app.state.archives.archive_path(time::today()).is_file());

    // Served from disk the second time; defaults to today
    let again = app.get(&with_code("/api/v1/pdf-zips/daily")).await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(header(&again, "etag"), etag);

    let legacy = app
        .get(&with_code(&format!(
            "/api/v1/packs/pdf/day?d={}",
            time::compact_day(time::today())
        )))
        .await;
    assert_eq!(legacy.status(), StatusCode::OK);
    assert_eq!(body_bytes(legacy).await, bytes);
}

#[tokio::test]
async fn test_daily_bundle_empty_day_and_bad_date() {
    let app = TestApp::with_client().await;

    let empty = app.get(&with_code("/api/v1/pdf-zips/daily?date=2001-02-03")).await;
    assert_eq!(empty.status(), StatusCode::NOT_FOUND);
    assert!(!app
        .state
        .archives
        .archive_path(NaiveDate::from_ymd_opt(2001, 2, 3).unwrap())
        .exists());

    let bad = app.get(&with_code("/api/v1/pdf-zips/daily?date=03/02/2001")).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    let body = body_json(bad).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_dates_lists_today_after_upload() {
    let app = TestApp::with_client().await;
    app.put_label("1Z999", LABEL).await;

    let response = app.get(&with_code("/api/v1/pdf-zips/dates")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let dates = body["dates"].as_array().unwrap();
    assert_eq!(dates.len(), 1);
    assert_eq!(dates[0]["date"], time::dashed_day(time::today()));
    assert_eq!(dates[0]["name"], format!("pdfs-{}.zip", time::compact_day(time::today())));
    assert_eq!(dates[0]["built"], true);
    assert!(dates[0]["size"].as_u64().unwrap() > 0);

    let legacy = body_json(app.get(&with_code("/api/v1/packs/pdf/dates")).await).await;
    assert_eq!(legacy["dates"], body["dates"]);
}

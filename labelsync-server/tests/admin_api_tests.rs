//! Integration tests for the admin API and progress endpoints

mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use common::{body_bytes, body_json, header, json_request, request, zip_bytes, TestApp, CODE};
use labelsync_common::config::TomlConfig;
use labelsync_common::time;
use labelsync_server::db::mappings;
use labelsync_server::services::ProgressUpdate;
use serde_json::json;
use std::time::Duration;

// =============================================================================
// Admin token
// =============================================================================

#[tokio::test]
async fn test_admin_token_enforced_when_configured() {
    let app = TestApp::with_config(TomlConfig {
        admin_token: Some("s3cret".to_string()),
        ..TomlConfig::default()
    })
    .await;

    let anonymous = app.get("/admin/stats").await;
    assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);

    let wrong = Request::builder()
        .uri("/admin/stats")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(wrong).await.status(), StatusCode::FORBIDDEN);

    let right = Request::builder()
        .uri("/admin/stats")
        .header("authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(right).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_progress_routes_require_admin_token() {
    let app = TestApp::with_config(TomlConfig {
        admin_token: Some("s3cret".to_string()),
        ..TomlConfig::default()
    })
    .await;
    let id = app.state.progress.create("rebuild_zip");

    for uri in [
        "/admin/progress/new".to_string(),
        format!("/admin/progress/get?id={}", id),
        format!("/admin/progress/stream?id={}", id),
    ] {
        assert_eq!(app.get(&uri).await.status(), StatusCode::FORBIDDEN, "{}", uri);
    }

    let authorized = Request::builder()
        .uri(format!("/admin/progress/get?id={}", id))
        .header("authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let response = app.send(authorized).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["tag"], "rebuild_zip");
}

#[tokio::test]
async fn test_admin_open_without_token() {
    let app = TestApp::new().await;
    let response = app.get("/admin/stats").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["orders"], 0);
    assert_eq!(body["files"], 0);
    assert_eq!(body["clients"], 0);
    assert!(body["version"].is_string());
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn test_client_credential_lifecycle() {
    let app = TestApp::new().await;

    let created = app
        .send(json_request(
            "POST",
            "/admin/clients",
            json!({ "code": "654321", "description": "front desk" }),
        ))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["description"], "front desk");
    assert_eq!(created["active"], true);
    assert!(created.get("code_hash").is_none());
    assert!(created.get("code_plain").is_none());

    assert_eq!(
        app.get("/api/v1/version?code=654321").await.status(),
        StatusCode::OK
    );

    let toggled = body_json(
        app.send(request("POST", &format!("/admin/clients/{}/toggle", id)))
            .await,
    )
    .await;
    assert_eq!(toggled["active"], false);
    assert_eq!(
        app.get("/api/v1/version?code=654321").await.status(),
        StatusCode::FORBIDDEN
    );

    let listed = body_json(app.get("/admin/clients").await).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let deleted = app
        .send(request("DELETE", &format!("/admin/clients/{}", id)))
        .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let again = app
        .send(request("DELETE", &format!("/admin/clients/{}", id)))
        .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_client_code_must_be_six_digits() {
    let app = TestApp::new().await;
    let response = app
        .send(json_request("POST", "/admin/clients", json!({ "code": "12ab" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Orders
// =============================================================================

#[tokio::test]
async fn test_order_import_runs_in_background() {
    let app = TestApp::new().await;

    let response = app
        .send(json_request(
            "POST",
            "/admin/orders/import",
            json!({
                "rows": [
                    { "order_id": "A1", "tracking_no": "TN 1" },
                    { "order_id": "A2", "tracking_no": "TN2" },
                    { "order_id": "  ", "tracking_no": "TN3" },
                ]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let record = app.wait_done(&id).await;
    assert!(record.ok);
    assert_eq!(record.stage, "done");
    assert_eq!(record.tag, "import_orders");
    assert_eq!(record.note, "2 rows written, 1 skipped");

    let stats = body_json(app.get("/admin/stats").await).await;
    assert_eq!(stats["orders"], 2);
}

#[tokio::test]
async fn test_order_import_reuses_supplied_progress_id() {
    let app = TestApp::new().await;
    let id = app.state.progress.create("import_orders");

    let response = app
        .send(json_request(
            "POST",
            "/admin/orders/import",
            json!({ "rows": [], "progress_id": id }),
        ))
        .await;
    let body = body_json(response).await;
    assert_eq!(body["id"], id.as_str());
    assert!(app.wait_done(&id).await.ok);
}

#[tokio::test]
async fn test_purge_orders_by_substring() {
    let app = TestApp::new().await;
    for (order, tracking) in [("SHOP-A1", "TN1"), ("SHOP-A2", "TN2"), ("MKT-B1", "TN3")] {
        app.state.store.upsert(order, tracking).await.unwrap();
    }

    let response = app
        .send(json_request("POST", "/admin/orders/purge", json!({ "q": "SHOP" })))
        .await;
    assert_eq!(body_json(response).await["deleted"], 2);

    let snapshot = app.state.store.snapshot().await.unwrap();
    assert_eq!(snapshot.mappings.len(), 1);
    assert_eq!(snapshot.mappings[0].order_id, "MKT-B1");
}

#[tokio::test]
async fn test_order_listing_filters_and_pages() {
    let app = TestApp::new().await;
    {
        let mut conn = app.state.db.acquire().await.unwrap();
        let now = time::now();
        for i in 0..5 {
            let stamp = time::to_db_timestamp(now - chrono::Duration::minutes(i));
            mappings::upsert_mapping(&mut conn, &format!("SHOP-{}", i), &format!("TN{}", i), &stamp)
                .await
                .unwrap();
        }
        mappings::upsert_mapping(&mut conn, "MKT-1", "LX9", &time::to_db_timestamp(now))
            .await
            .unwrap();
    }

    let body = body_json(app.get("/admin/orders?q=SHOP&size=2&page=2").await).await;
    assert_eq!(body["total"], 5);
    assert_eq!(body["pages"], 3);
    assert_eq!(body["page"], 2);
    let ids: Vec<&str> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["order_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["SHOP-2", "SHOP-3"]);

    // The filter also matches tracking numbers
    let body = body_json(app.get("/admin/orders?q=LX9").await).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["rows"][0]["order_id"], "MKT-1");

    let body = body_json(app.get("/admin/orders").await).await;
    assert_eq!(body["total"], 6);
    assert_eq!(body["size"], 100);
    assert_eq!(body["pages"], 1);
}

#[tokio::test]
async fn test_file_listing_and_alignment() {
    let app = TestApp::new().await;
    app.state.store.upsert("O1", "TN1").await.unwrap();
    app.state.store.upsert("O2", "TN2").await.unwrap();
    app.put_label("TN1", b"%PDF one").await;
    app.put_label("ORPHAN", b"%PDF two").await;
    std::fs::write(app.state.layout.labels_dir().join("notes.txt"), b"x").unwrap();

    let body = body_json(app.get("/admin/files?q=TN&size=1").await).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["rows"][0]["tracking_no"], "TN1");
    assert!(body["rows"][0]["file_path"].as_str().unwrap().ends_with("TN1.pdf"));

    let body = body_json(app.get("/admin/files?page=0&size=1").await).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["pages"], 2);

    let report = body_json(app.get("/admin/align").await).await;
    assert_eq!(report["mapping_total"], 2);
    assert_eq!(report["file_total"], 2);
    assert_eq!(report["missing_file"], json!(["TN2"]));
    assert_eq!(report["orphan_file"], json!(["ORPHAN"]));
}

// =============================================================================
// Labels
// =============================================================================

#[tokio::test]
async fn test_label_upload_extracts_records_and_repackages() {
    let app = TestApp::new().await;
    let upload = zip_bytes(&[
        ("batch/1Z 999.pdf", b"%PDF-1.4 one"),
        ("batch/LX55.PDF", b"%PDF-1.4 two"),
        ("batch/readme.txt", b"not a label"),
    ]);

    let post = Request::builder()
        .method("POST")
        .uri("/admin/labels/upload")
        .header("content-length", upload.len())
        .body(Body::from(upload))
        .unwrap();
    let response = app.send(post).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let record = app.wait_done(&id).await;
    assert!(record.ok, "upload failed: {}", record.note);
    assert_eq!(record.tag, "upload_pdfs");
    assert_eq!(record.note, "2 imported, 0 skipped");

    let labels = app.state.layout.labels_dir();
    assert_eq!(std::fs::read(labels.join("1Z_999.pdf")).unwrap(), b"%PDF-1.4 one");
    assert!(labels.join("LX55.pdf").is_file());

    let bundle = std::fs::read(app.state.archives.archive_path(time::today())).unwrap();
    assert_eq!(common::zip_entry_names(&bundle), vec!["1Z_999.pdf", "LX55.pdf"]);

    // Staging file is gone once the job ends
    let staged = std::fs::read_dir(app.state.layout.uploads_dir()).unwrap().count();
    assert_eq!(staged, 0);
}

#[tokio::test]
async fn test_label_upload_rejects_non_zip() {
    let app = TestApp::new().await;
    let post = Request::builder()
        .method("POST")
        .uri("/admin/labels/upload")
        .body(Body::from("definitely not a zip"))
        .unwrap();
    let response = app.send(post).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let record = app.wait_done(&id).await;
    assert!(!record.ok);
    assert_eq!(record.stage, "error");
}

#[tokio::test]
async fn test_put_single_label() {
    let app = TestApp::with_client().await;

    let put = Request::builder()
        .method("PUT")
        .uri("/admin/labels/XY%20123")
        .body(Body::from("%PDF-1.4 single"))
        .unwrap();
    let response = app.send(put).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tracking_no"], "XY_123");

    // The follow-up rebuild ends in a terminal progress record
    let id = body["progress_id"].as_str().unwrap();
    let record = app.wait_done(id).await;
    assert!(record.ok, "rebuild failed: {}", record.note);
    assert_eq!(record.tag, "rebuild_zip");
    let bundle = std::fs::read(app.state.archives.archive_path(time::today())).unwrap();
    assert_eq!(common::zip_entry_names(&bundle), vec!["XY_123.pdf"]);

    let fetched = app.get(&format!("/api/v1/file/XY_123?code={}", CODE)).await;
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(body_bytes(fetched).await, b"%PDF-1.4 single");

    let empty = Request::builder()
        .method("PUT")
        .uri("/admin/labels/XY123")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(empty).await.status(), StatusCode::BAD_REQUEST);

    let nameless = Request::builder()
        .method("PUT")
        .uri("/admin/labels/%23%23%23")
        .body(Body::from("%PDF"))
        .unwrap();
    assert_eq!(app.send(nameless).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_purge_files_removes_label_from_disk() {
    let app = TestApp::new().await;
    app.put_label("KEEP1", b"%PDF keep").await;
    app.put_label("DROP1", b"%PDF drop").await;

    let response = app
        .send(json_request("POST", "/admin/files/purge", json!({ "q": "DROP" })))
        .await;
    assert_eq!(body_json(response).await["deleted"], 1);

    let labels = app.state.layout.labels_dir();
    assert!(labels.join("KEEP1.pdf").is_file());
    assert!(!labels.join("DROP1.pdf").exists());
}

// =============================================================================
// Bundles
// =============================================================================

#[tokio::test]
async fn test_rebuild_and_list_bundles() {
    let app = TestApp::new().await;
    app.put_label("1Z999", b"%PDF one").await;

    let response = app
        .send(json_request(
            "POST",
            "/admin/zips/rebuild",
            json!({ "date": time::compact_day(time::today()) }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    let record = app.wait_done(body["id"].as_str().unwrap()).await;
    assert!(record.ok);
    assert_eq!(record.note, "1 entries, 0 skipped");

    let listed = body_json(app.get("/admin/zips").await).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["built"], true);
    assert!(listed[0]["etag"].as_str().unwrap().starts_with("W/\""));
}

#[tokio::test]
async fn test_rebuild_empty_day_and_bad_date() {
    let app = TestApp::new().await;

    let response = app
        .send(json_request("POST", "/admin/zips/rebuild", json!({ "date": "2001-02-03" })))
        .await;
    let id = body_json(response).await["id"].as_str().unwrap().to_string();
    let record = app.wait_done(&id).await;
    assert!(record.ok);
    assert_eq!(record.note, "no uploads for this day");

    let bad = app
        .send(json_request("POST", "/admin/zips/rebuild", json!({ "date": "yesterday" })))
        .await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retention_sweep_disabled_by_default() {
    let app = TestApp::new().await;
    app.state.store.upsert("A1", "TN1").await.unwrap();

    let body = body_json(app.send(request("POST", "/admin/retention/sweep")).await).await;
    assert_eq!(body["orders_deleted"], 0);
    assert_eq!(body["files_deleted"], 0);
    assert_eq!(body["orders_days"], 0);
}

// =============================================================================
// Progress
// =============================================================================

#[tokio::test]
async fn test_progress_new_and_get() {
    let app = TestApp::new().await;

    let created = body_json(app.get("/admin/progress/new?tag=upload_pdfs").await).await;
    let id = created["id"].as_str().unwrap();
    assert_eq!(id.len(), 32);

    let record = body_json(app.get(&format!("/admin/progress/get?id={}", id)).await).await;
    assert_eq!(record["stage"], "init");
    assert_eq!(record["pct"], 0);
    assert_eq!(record["tag"], "upload_pdfs");
    assert_eq!(record["ok"], true);
    assert_eq!(record["done"], false);

    let missing = body_json(app.get("/admin/progress/get?id=unknown").await).await;
    assert_eq!(missing["missing"], true);
}

#[tokio::test]
async fn test_progress_stream_ends_with_done() {
    let app = TestApp::new().await;
    let id = app.state.progress.create("rebuild_zip");

    let progress = app.state.progress.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        progress.mutate(&task_id, ProgressUpdate::stage("repackaging").percent(50));
        tokio::time::sleep(Duration::from_millis(60)).await;
        progress.mutate(&task_id, ProgressUpdate::stage("done").finished());
    });

    let response = app.get(&format!("/admin/progress/stream?id={}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "content-type").starts_with("text/event-stream"));
    assert_eq!(header(&response, "x-accel-buffering"), "no");

    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("event: progress"));
    assert!(text.trim_end().ends_with('}'));
    let last_event = text.rsplit("event: ").next().unwrap();
    assert!(last_event.starts_with("done"));
    assert!(last_event.contains("\"pct\":100"));
}

#[tokio::test]
async fn test_progress_stream_unknown_id_is_gone() {
    let app = TestApp::new().await;

    let response = app.get("/admin/progress/stream?id=nope").await;
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("event: gone"));
    assert!(!text.contains("event: progress"));
}

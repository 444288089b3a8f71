#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::io::Cursor;

    use crate::tests::common::*;
    use crate::types::FileMetadataRecord;

    #[tokio::test]
    async fn upload_then_view_and_download() {
        let app = TestApp::new().await;
        let upload = app.upload("hello.txt", "text/plain", b"hello world").await;

        assert_eq!(upload["success"], true);
        assert_eq!(upload["file_name"], "hello.txt");
        assert_eq!(upload["file_size"], 11);
        assert_eq!(upload["content_type"], "text/plain");
        assert!(upload["expires_at"].is_null());
        let name = stored_name(&upload);
        assert!(name.ends_with(".txt"));
        assert_eq!(upload["file_url"], format!("http://files.test/file/view/{name}"));
        assert_eq!(upload["download_url"], format!("http://files.test/file/download/{name}"));

        let resp = app.send(get(&format!("/file/view/{name}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers().clone();
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline; filename=\"hello.txt\"");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(body_bytes(resp).await, b"hello world");

        let resp = app.send(get(&format!("/file/download/{name}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_DISPOSITION], "attachment; filename=\"hello.txt\"");
    }

    #[tokio::test]
    async fn upload_requires_master_key() {
        let app = TestApp::new().await;
        let body = || multipart(&[("file", "a.txt", "text/plain", b"a")], &[]);

        let resp = app.send(upload_request("/api/upload", body(), None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["error"]["code"], "UNAUTHORIZED");

        let resp = app.send(upload_request("/api/upload", body(), Some("wrong"))).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // The bare key works as well as the Bearer form.
        let req = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .header(header::AUTHORIZATION, MASTER_KEY)
            .body(Body::from(body()))
            .unwrap();
        assert_eq!(app.send(req).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_with_expiry_and_guessed_type() {
        let app = TestApp::new().await;
        let body = multipart(
            &[("file", "report.pdf", "application/octet-stream", b"%PDF-1.4")],
            &[("expiry_days", "3"), ("description", "quarterly")],
        );
        let resp = app.send(upload_request("/api/upload", body, Some(MASTER_KEY))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let upload = json_body(resp).await;

        assert_eq!(upload["content_type"], "application/pdf");
        let expires: chrono::DateTime<chrono::Utc> = serde_json::from_value(upload["expires_at"].clone()).unwrap();
        let days = (expires - chrono::Utc::now()).num_hours();
        assert!((71..=72).contains(&days), "expires in {days}h");
    }

    #[tokio::test]
    async fn invalid_expiry_is_rejected_without_leftovers() {
        let app = TestApp::new().await;
        let body = multipart(&[("file", "a.txt", "text/plain", b"abc")], &[("expiry_days", "soon")]);
        let resp = app.send(upload_request("/api/upload", body, Some(MASTER_KEY))).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(app.state.blobs.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_413_and_leaves_nothing() {
        let app = TestApp::with_config(|cfg| cfg.storage.max_upload_bytes = 4).await;
        let body = multipart(&[("file", "big.bin", "application/octet-stream", b"0123456789")], &[]);
        let resp = app.send(upload_request("/api/upload", body, Some(MASTER_KEY))).await;

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(resp).await["error"]["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(std::fs::read_dir(app.state.blobs.root()).unwrap().count(), 0);
        assert!(app.state.store.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_field_is_400() {
        let app = TestApp::new().await;
        let body = multipart(&[], &[("expiry_days", "1")]);
        let resp = app.send(upload_request("/api/upload", body, Some(MASTER_KEY))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn multiple_upload_reports_each_file() {
        let app = TestApp::with_config(|cfg| cfg.storage.max_upload_bytes = 8).await;
        let body = multipart(
            &[
                ("files", "small.txt", "text/plain", &b"tiny"[..]),
                ("files", "large.txt", "text/plain", &b"far too large for the cap"[..]),
                ("files", "other.md", "application/octet-stream", &b"# hi"[..]),
            ],
            &[],
        );
        let resp = app.send(upload_request("/api/upload/multiple", body, Some(MASTER_KEY))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let report = json_body(resp).await;

        assert_eq!(report["success"], true);
        assert_eq!(report["uploaded_count"], 2);
        assert_eq!(report["failed_count"], 1);
        let files = report["files"].as_array().unwrap();
        assert_eq!(files[0]["file_name"], "small.txt");
        assert_eq!(files[1]["file_name"], "large.txt");
        assert!(files[1]["error"].as_str().unwrap().contains("8 bytes"));
        assert_eq!(files[2]["content_type"], "text/markdown");
        assert_eq!(std::fs::read_dir(app.state.blobs.root()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn unknown_file_is_404() {
        let app = TestApp::new().await;
        let resp = app.send(get("/file/view/does-not-exist.jpg")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["error"]["code"], "NOT_FOUND");

        let resp = app.send(get("/file/view/..%2F..%2Fetc%2Fpasswd")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_record_and_bytes() {
        let app = TestApp::new().await;
        let name = stored_name(&app.upload("a.txt", "text/plain", b"abc").await);
        assert!(app.blob_path(&name).exists());

        let resp = app.send(authed("DELETE", &format!("/api/delete/{name}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["success"], true);
        assert!(!app.blob_path(&name).exists());

        assert_eq!(app.send(get(&format!("/file/view/{name}"))).await.status(), StatusCode::NOT_FOUND);
        let resp = app.send(authed("DELETE", &format!("/api/delete/{name}"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_requires_master_key() {
        let app = TestApp::new().await;
        let name = stored_name(&app.upload("a.txt", "text/plain", b"abc").await);

        let req = Request::builder().method("DELETE").uri(format!("/api/delete/{name}")).body(Body::empty()).unwrap();
        assert_eq!(app.send(req).await.status(), StatusCode::UNAUTHORIZED);
        assert!(app.blob_path(&name).exists());
    }

    #[tokio::test]
    async fn expired_file_is_gone_and_its_bytes_reaped() {
        let app = TestApp::new().await;
        let mut record = FileMetadataRecord::new("old.txt", "old.txt", "text/plain", 3, None);
        record.created_at -= chrono::Duration::days(2);
        record.expires_at = Some(record.created_at + chrono::Duration::days(1));
        app.state.store.create(&record).await.unwrap();
        std::fs::write(app.blob_path("old.txt"), b"old").unwrap();

        let resp = app.send(get("/file/view/old.txt")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        for _ in 0..100 {
            if !app.blob_path("old.txt").exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!app.blob_path("old.txt").exists());
    }

    #[tokio::test]
    async fn sweeper_purges_expired_records_and_bytes() {
        let app = TestApp::new().await;
        let keep = stored_name(&app.upload("keep.txt", "text/plain", b"keep").await);
        let mut record = FileMetadataRecord::new("stale.txt", "stale.txt", "text/plain", 5, None);
        record.created_at -= chrono::Duration::hours(2);
        record.expires_at = Some(record.created_at + chrono::Duration::hours(1));
        app.state.store.create(&record).await.unwrap();
        std::fs::write(app.blob_path("stale.txt"), b"stale").unwrap();

        assert_eq!(crate::tasks::sweep_expired_once(&app.state).await, 1);
        assert_eq!(crate::tasks::sweep_expired_once(&app.state).await, 0);

        for _ in 0..100 {
            if !app.blob_path("stale.txt").exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!app.blob_path("stale.txt").exists());
        assert!(app.blob_path(&keep).exists());

        let metrics = json_body(app.send(get("/metrics")).await).await;
        assert_eq!(metrics["expired_purged"], 1);
    }

    #[tokio::test]
    async fn views_are_counted() {
        let app = TestApp::new().await;
        let name = stored_name(&app.upload("a.txt", "text/plain", b"abc").await);
        for _ in 0..3 {
            assert_eq!(app.send(get(&format!("/file/view/{name}"))).await.status(), StatusCode::OK);
        }

        let mut count = 0;
        for _ in 0..100 {
            count = app.state.store.get_by_path(&name).await.unwrap().access_count;
            if count == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(count, 3);
    }

    /// Noisy enough that PNG stores it poorly.
    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut seed: u32 = 0x2545_f491;
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let n = (seed % 24) as u8;
            image::Rgba([(x as u8).wrapping_add(n), (y as u8).wrapping_add(n), 200 - n, 255])
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img).write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn compress_rewrites_bytes_and_metadata() {
        let app = TestApp::new().await;
        let name = stored_name(&app.upload("photo.png", "image/png", &png(256, 128)).await);

        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/compress/{name}"))
            .header(header::AUTHORIZATION, format!("Bearer {MASTER_KEY}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "max_width": 128, "to_webp": true, "quality": 60 }).to_string()))
            .unwrap();
        let resp = app.send(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let out: Value = json_body(resp).await;
        assert_eq!(out["content_type"], "image/webp");
        assert_eq!((out["width"].as_u64(), out["height"].as_u64()), (Some(128), Some(64)));

        let record = app.state.store.get_by_path(&name).await.unwrap();
        let on_disk = std::fs::read(app.blob_path(&name)).unwrap();
        assert_eq!(record.content_type, "image/webp");
        assert_eq!(record.size_bytes, on_disk.len() as i64);
        assert_eq!(image::guess_format(&on_disk).unwrap(), image::ImageFormat::WebP);
    }

    #[tokio::test]
    async fn compress_rejects_non_images_and_bad_options() {
        let app = TestApp::new().await;
        let name = stored_name(&app.upload("notes.txt", "text/plain", b"not an image").await);

        let resp = app.send(authed("POST", &format!("/api/compress/{name}"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read(app.blob_path(&name)).unwrap(), b"not an image");

        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/compress/{name}"))
            .header(header::AUTHORIZATION, format!("Bearer {MASTER_KEY}"))
            .body(Body::from("{not json"))
            .unwrap();
        assert_eq!(app.send(req).await.status(), StatusCode::BAD_REQUEST);

        assert_eq!(app.send(authed("POST", "/api/compress/missing.png")).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn compress_refuses_non_images_without_reading_them() {
        let app = TestApp::new().await;
        // No bytes on disk: a read would turn this into a 404.
        let record = FileMetadataRecord::new("archive.zip", "archive.zip", "application/zip", 1 << 30, None);
        app.state.store.create(&record).await.unwrap();

        let resp = app.send(authed("POST", "/api/compress/archive.zip")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn deleting_an_expired_file_is_404_and_reaps_it() {
        let app = TestApp::new().await;
        let mut record = FileMetadataRecord::new("gone.txt", "gone.txt", "text/plain", 4, None);
        record.created_at -= chrono::Duration::days(2);
        record.expires_at = Some(record.created_at + chrono::Duration::days(1));
        app.state.store.create(&record).await.unwrap();
        std::fs::write(app.blob_path("gone.txt"), b"gone").unwrap();

        let resp = app.send(authed("DELETE", "/api/delete/gone.txt")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        for _ in 0..100 {
            if !app.blob_path("gone.txt").exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!app.blob_path("gone.txt").exists());
        assert!(app.state.store.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_and_stats() {
        let app = TestApp::new().await;
        app.upload("a.txt", "text/plain", b"a").await;
        app.upload("b.txt", "text/plain", b"b").await;
        app.upload("c.pdf", "application/pdf", b"c").await;

        let resp = app.send(authed("GET", "/api/files?limit=2")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let listing = json_body(resp).await;
        assert_eq!(listing["files"].as_array().unwrap().len(), 2);
        assert_eq!(listing["limit"], 2);

        let stats = json_body(app.send(authed("GET", "/api/stats")).await).await;
        assert_eq!(stats["total_files"], 3);
        assert_eq!(stats["by_content_type"][0], json!({ "content_type": "text/plain", "count": 2 }));
    }

    #[tokio::test]
    async fn unknown_api_route_is_json_404() {
        let app = TestApp::new().await;
        let resp = app.send(authed("GET", "/api/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["status"], 404);
    }
}

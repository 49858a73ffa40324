mod common;

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode as AxumStatus, routing::post, Json, Router};
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{sample_report, upload_form, Hits};

/// Processor stand-in that counts hits and answers 202 with a fixed body
async fn fake_processor(plain_text: bool) -> Result<(String, Hits)> {
    async fn accept(State(hits): State<Hits>) -> (AxumStatus, Json<Value>) {
        hits.0.fetch_add(1, Ordering::SeqCst);
        (AxumStatus::ACCEPTED, Json(json!({"success": true, "processed": 12})))
    }
    async fn broken(State(hits): State<Hits>) -> (AxumStatus, &'static str) {
        hits.0.fetch_add(1, Ordering::SeqCst);
        (AxumStatus::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }

    let hits = Hits::default();
    let route = if plain_text { post(broken) } else { post(accept) };
    let router = Router::new().route("/process-attendance", route).with_state(hits.clone());
    Ok((common::serve_fake(router).await?, hits))
}

#[tokio::test]
async fn missing_field_is_rejected_before_forwarding() -> Result<()> {
    let (processor, hits) = fake_processor(false).await?;
    let server = common::start_server(|_| vec![("ATTENDANCE_PROCESSOR_URL", processor)]).await?;
    let client = reqwest::Client::new();

    for field in ["cohort_type", "cohort_number", "subject", "class_date", "teacher_name"] {
        let form = upload_form(sample_report(), "2025-03-14", Some(field))?;
        let res = client.post(server.url("/api/attendance/upload")).multipart(form).send().await?;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "without {}", field);
        let body = res.json::<Value>().await?;
        assert_eq!(body["required"], json!([field]), "{}", body);
    }

    let form = upload_form(sample_report(), "2025-13-40", None)?;
    let res = client.post(server.url("/api/attendance/upload")).multipart(form).send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.json::<Value>().await?["error"].is_string());

    assert_eq!(hits.count(), 0, "invalid uploads must not reach the processor");
    Ok(())
}

#[tokio::test]
async fn valid_upload_relays_processor_response() -> Result<()> {
    let (processor, hits) = fake_processor(false).await?;
    let server = common::start_server(|_| vec![("ATTENDANCE_PROCESSOR_URL", processor)]).await?;

    let form = upload_form(sample_report(), "2025-03-14", None)?;
    let res = reqwest::Client::new()
        .post(server.url("/api/attendance/upload"))
        .multipart(form)
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(res.json::<Value>().await?, json!({"success": true, "processed": 12}));
    assert_eq!(hits.count(), 1);
    Ok(())
}

#[tokio::test]
async fn non_json_processor_reply_is_bad_gateway() -> Result<()> {
    let (processor, hits) = fake_processor(true).await?;
    let server = common::start_server(|_| vec![("ATTENDANCE_PROCESSOR_URL", processor)]).await?;

    let form = upload_form(sample_report(), "2025-03-14", None)?;
    let res = reqwest::Client::new()
        .post(server.url("/api/attendance/upload"))
        .multipart(form)
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body = res.json::<Value>().await?;
    assert_eq!(body["error"], "Failed to reach attendance processor");
    assert!(body["details"].is_string(), "{}", body);
    assert_eq!(hits.count(), 1);
    Ok(())
}

#[tokio::test]
async fn unreachable_processor_is_bad_gateway() -> Result<()> {
    let closed = portpicker::pick_unused_port().context("failed to pick free port")?;
    let server = common::start_server(move |_| {
        vec![("ATTENDANCE_PROCESSOR_URL", format!("http://127.0.0.1:{}", closed))]
    })
    .await?;

    let form = upload_form(sample_report(), "2025-03-14", None)?;
    let res = reqwest::Client::new()
        .post(server.url("/api/attendance/upload"))
        .multipart(form)
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body = res.json::<Value>().await?;
    assert_eq!(body["error"], "Failed to reach attendance processor");
    Ok(())
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() -> Result<()> {
    let (processor, hits) = fake_processor(false).await?;
    let server = common::start_server(|_| {
        vec![
            ("ATTENDANCE_PROCESSOR_URL", processor),
            ("SERVER_MAX_UPLOAD_BYTES", "2048".to_string()),
        ]
    })
    .await?;

    let padding = common::report_row("Filler", "1m", "").repeat(200);
    let form = upload_form(format!("{}\n{}", sample_report(), padding), "2025-03-14", None)?;
    let res = reqwest::Client::new()
        .post(server.url("/api/attendance/upload"))
        .multipart(form)
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(res.json::<Value>().await?["error"], "File too large");
    assert_eq!(hits.count(), 0);
    Ok(())
}

#[tokio::test]
async fn upload_through_builtin_processor_updates_totals() -> Result<()> {
    // The server is its own processor
    let server = common::start_server(|base| vec![("ATTENDANCE_PROCESSOR_URL", base.to_string())]).await?;
    let client = reqwest::Client::new();

    for (id, name) in [("25MBY3001", "Asha Rao"), ("25MBY3002", "Ravi")] {
        client
            .post(server.url("/api/data/onboarding"))
            .json(&json!({"EnrollmentID": id, "Full Name": name, "Cohort Type": "Basic", "Cohort Number": "3"}))
            .send()
            .await?
            .error_for_status()?;
    }

    let form = upload_form(sample_report(), "2025-03-14", None)?;
    let res = client.post(server.url("/api/attendance/upload")).multipart(form).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let report = res.json::<Value>().await?;
    assert_eq!(report["success"], true, "{}", report);
    assert_eq!(report["batch"], "Basic 3");
    assert_eq!(report["processed"], 2);
    assert_eq!(report["present"], 1);
    assert_eq!(report["absent"], 1);
    assert_eq!(report["stu_updated"], 2);

    let logs = client.get(server.url("/api/data/attendance_logs")).send().await?.json::<Value>().await?;
    assert_eq!(logs["data"].as_array().map(Vec::len), Some(2), "{}", logs);

    let asha = client.get(server.url("/api/data/stu/25MBY3001")).send().await?.json::<Value>().await?;
    assert_eq!(asha["data"]["present_classes"], 1);
    assert_eq!(asha["data"]["overall_attendance"], 100.0);

    let ravi = client.get(server.url("/api/data/stu/25MBY3002")).send().await?.json::<Value>().await?;
    assert_eq!(ravi["data"]["total_classes"], 1);
    assert_eq!(ravi["data"]["present_classes"], 0);

    Ok(())
}

use serde_json::{Value, json};

use crate::routes::test_support::spawn_app;
use crate::state::test_helpers;

const SAMPLE: &str = "building_id,floor_id,room_id,status\n1,6,4,0\n1,6,5,1\n";

async fn seeded() -> (tempfile::TempDir, std::path::PathBuf, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = test_helpers::test_app_state(dir.path());
    let csv = state.availability_csv.clone();
    tokio::fs::write(&csv, SAMPLE).await.expect("seed csv");
    let addr = spawn_app(state).await;
    (dir, csv, format!("http://{addr}"))
}

async fn post_update(base: &str, body: Value) -> (reqwest::StatusCode, Value) {
    let res = reqwest::Client::new()
        .post(format!("{base}/api/update-availability"))
        .json(&body)
        .send()
        .await
        .expect("request");
    let status = res.status();
    let json = res.json::<Value>().await.expect("json body");
    (status, json)
}

#[tokio::test]
async fn update_rewrites_matching_row() {
    let (_dir, csv, base) = seeded().await;

    let (status, body) =
        post_update(&base, json!({"building_id": 1, "floor_id": 6, "room_id": 5, "status": 2})).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["status"], json!(2));
    let content = tokio::fs::read_to_string(&csv).await.expect("read");
    assert!(content.contains("1,6,5,2"));
    assert!(!content.contains("1,6,5,1"));
}

#[tokio::test]
async fn unknown_room_is_404_and_file_unchanged() {
    let (_dir, csv, base) = seeded().await;

    let (status, body) =
        post_update(&base, json!({"building_id": 1, "floor_id": 6, "room_id": 99, "status": 2})).await;

    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(tokio::fs::read_to_string(&csv).await.expect("read"), SAMPLE);
}

#[tokio::test]
async fn missing_field_is_400() {
    let (_dir, _csv, base) = seeded().await;

    let (status, body) = post_update(&base, json!({"building_id": 1, "floor_id": 6, "status": 2})).await;

    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn out_of_range_status_is_400() {
    let (_dir, _csv, base) = seeded().await;

    let (status, _) =
        post_update(&base, json!({"building_id": 1, "floor_id": 6, "room_id": 5, "status": 7})).await;

    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_method_is_405_json() {
    let (_dir, _csv, base) = seeded().await;

    let res = reqwest::get(format!("{base}/api/update-availability")).await.expect("request");

    assert_eq!(res.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    let body = res.json::<Value>().await.expect("json");
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn missing_csv_is_500() {
    let (_dir, csv, base) = seeded().await;
    tokio::fs::remove_file(&csv).await.expect("remove");

    let (status, body) =
        post_update(&base, json!({"building_id": 1, "floor_id": 6, "room_id": 5, "status": 2})).await;

    assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn availability_csv_is_served_as_text() {
    let (_dir, _csv, base) = seeded().await;

    let res = reqwest::get(format!("{base}/api/availability")).await.expect("request");

    assert_eq!(res.status(), reqwest::StatusCode::OK);
    assert_eq!(res.text().await.expect("text"), SAMPLE);
}

#[tokio::test]
async fn health_reports_ok() {
    let (_dir, _csv, base) = seeded().await;

    let body = reqwest::get(format!("{base}/api/health"))
        .await
        .expect("request")
        .json::<Value>()
        .await
        .expect("json");

    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn public_dir_is_served_as_fallback() {
    let (dir, _csv, base) = seeded().await;
    tokio::fs::write(dir.path().join("flpx.csv"), "floor,image\n").await.expect("seed layout");

    let res = reqwest::get(format!("{base}/flpx.csv")).await.expect("request");

    assert_eq!(res.status(), reqwest::StatusCode::OK);
    assert_eq!(res.text().await.expect("text"), "floor,image\n");
}

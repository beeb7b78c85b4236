use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use sr_common::store::sheets::{SheetsConfig, SheetsReferralStore, StaticToken};
use sr_common::store::{Column, ReferralStore, StoreError};
use sr_common::submission::{submit_referral, SubmitReferralRequest};
use sr_common::workflow::{TransitionFields, WorkflowEngine};
use sr_common::{ReferralId, ReferralStatus};

const TOKEN: &str = "test-token";
const SHEET_ID: &str = "sheet-1";

/// Minimal stand-in for the Sheets v4 values API over a single tab.
#[derive(Default)]
struct FakeSheet {
    rows: Mutex<Vec<Vec<String>>>,
    updated_ranges: Mutex<Vec<String>>,
}

fn decode_path(path: &str) -> String {
    path.replace("%27", "'").replace("%20", " ").replace("%21", "!")
}

fn cell_strings(values: &Value) -> Vec<Vec<String>> {
    values
        .as_array()
        .into_iter()
        .flatten()
        .map(|row| {
            row.as_array()
                .into_iter()
                .flatten()
                .map(|cell| cell.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .collect()
}

/// `'Referrals'!P2` -> (column index, row number).
fn parse_cell(range: &str) -> (usize, usize) {
    let (_, a1) = range.rsplit_once('!').unwrap();
    let column = (a1.as_bytes()[0] - b'A') as usize;
    let row = a1[1..].parse().unwrap();
    (column, row)
}

async fn handle(
    State(sheet): State<Arc<FakeSheet>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let expected = format!("Bearer {TOKEN}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }

    let path = decode_path(uri.path());
    let base = format!("/v4/spreadsheets/{SHEET_ID}");

    if method == Method::GET && path == base {
        return Json(json!({ "spreadsheetId": SHEET_ID })).into_response();
    }

    if method == Method::GET && path.starts_with(&format!("{base}/values/")) {
        let rows = sheet.rows.lock().unwrap().clone();
        let mut payload = json!({ "range": "Referrals!A1:X1000", "majorDimension": "ROWS" });
        if !rows.is_empty() {
            payload["values"] = json!(rows);
        }
        return Json(payload).into_response();
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    if method == Method::POST && path.ends_with(":append") {
        let mut rows = sheet.rows.lock().unwrap();
        rows.extend(cell_strings(&body["values"]));
        return Json(json!({ "spreadsheetId": SHEET_ID })).into_response();
    }

    if method == Method::POST && path == format!("{base}/values:batchUpdate") {
        let mut rows = sheet.rows.lock().unwrap();
        for entry in body["data"].as_array().into_iter().flatten() {
            let range = entry["range"].as_str().unwrap_or_default().to_string();
            let (column, row_number) = parse_cell(&range);
            let value = cell_strings(&entry["values"])[0][0].clone();

            let row = &mut rows[row_number - 1];
            if row.len() <= column {
                row.resize(column + 1, String::new());
            }
            row[column] = value;
            sheet.updated_ranges.lock().unwrap().push(range);
        }
        return Json(json!({ "totalUpdatedCells": 1 })).into_response();
    }

    (StatusCode::NOT_FOUND, "unknown endpoint").into_response()
}

async fn spawn_fake_sheet() -> (Arc<FakeSheet>, String) {
    let sheet = Arc::new(FakeSheet::default());
    let app = Router::new().fallback(handle).with_state(sheet.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (sheet, format!("http://{addr}"))
}

fn store(api_base: &str, token: &str) -> SheetsReferralStore {
    SheetsReferralStore::with_token_source(
        SheetsConfig {
            spreadsheet_id: SHEET_ID.into(),
            tab: "Referrals".into(),
            service_account_key: "unused.json".into(),
            api_base: api_base.into(),
        },
        Arc::new(StaticToken(token.into())),
    )
    .unwrap()
}

fn submitted_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
}

fn lead_teacher_request() -> SubmitReferralRequest {
    SubmitReferralRequest {
        referrer_name: "Dana Reyes".into(),
        referrer_email: "dana.reyes@school.org".into(),
        referrer_school: "Arthur Ashe".into(),
        candidate_name: "Sam Ortiz".into(),
        candidate_email: "sam@example.com".into(),
        position: "3rd Grade ELA".into(),
        position_type: "Lead Teacher".into(),
        relationship: "Former colleague".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn first_submission_writes_header_then_row() {
    let (sheet, base) = spawn_fake_sheet().await;
    let store = store(&base, TOKEN);

    let referral = submit_referral(&store, lead_teacher_request(), submitted_at())
        .await
        .unwrap();

    let rows = sheet.rows.lock().unwrap().clone();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "referral_id");
    assert_eq!(rows[0].len(), Column::ALL.len());
    assert_eq!(rows[1][0], referral.referral_id.as_str());
    assert_eq!(rows[1][Column::BonusAmount.index()], "500");

    let listed = store.list_all().await.unwrap();
    assert_eq!(listed, vec![referral]);
}

#[tokio::test]
async fn transitions_write_only_changed_cells() {
    let (sheet, base) = spawn_fake_sheet().await;
    let store = Arc::new(store(&base, TOKEN));
    let referral = submit_referral(store.as_ref(), lead_teacher_request(), submitted_at())
        .await
        .unwrap();

    let engine = WorkflowEngine::new(store.clone());
    let at = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
    engine
        .transition_by_id(
            &referral.referral_id,
            ReferralStatus::UnderReview,
            "talent@school.org",
            at,
            &TransitionFields::default(),
        )
        .await
        .unwrap();

    let ranges = sheet.updated_ranges.lock().unwrap().clone();
    assert_eq!(
        ranges,
        ["'Referrals'!P2", "'Referrals'!Q2", "'Referrals'!R2"]
    );

    let stored = store.find_by_id(&referral.referral_id).await.unwrap();
    assert_eq!(stored.status, ReferralStatus::UnderReview);
    assert_eq!(stored.status_updated_by, "talent@school.org");
    assert_eq!(stored.status_updated_at, at);
    assert_eq!(stored.candidate_name, "Sam Ortiz");
}

#[tokio::test]
async fn hired_transition_stores_derived_dates() {
    let (_sheet, base) = spawn_fake_sheet().await;
    let store = Arc::new(store(&base, TOKEN));
    let referral = submit_referral(store.as_ref(), lead_teacher_request(), submitted_at())
        .await
        .unwrap();
    let engine = WorkflowEngine::new(store.clone());
    let at = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();

    for status in [
        ReferralStatus::UnderReview,
        ReferralStatus::CandidateApplied,
        ReferralStatus::Interviewing,
    ] {
        engine
            .transition_by_id(
                &referral.referral_id,
                status,
                "talent@school.org",
                at,
                &TransitionFields::default(),
            )
            .await
            .unwrap();
    }

    engine
        .transition_by_id(
            &referral.referral_id,
            ReferralStatus::Hired,
            "talent@school.org",
            at,
            &TransitionFields {
                hire_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stored = store.find_by_id(&referral.referral_id).await.unwrap();
    assert_eq!(stored.sixty_day_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    assert_eq!(stored.payout_month.unwrap().to_string(), "April 2024");
}

#[tokio::test]
async fn missing_rows_and_duplicates_are_reported() {
    let (_sheet, base) = spawn_fake_sheet().await;
    let store = store(&base, TOKEN);
    let referral = submit_referral(&store, lead_teacher_request(), submitted_at())
        .await
        .unwrap();

    let missing = ReferralId::parse("00000000").unwrap();
    assert!(matches!(
        store.find_by_id(&missing).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.append(&referral).await,
        Err(StoreError::DuplicateId(_))
    ));
}

#[tokio::test]
async fn rejected_credentials_surface_as_read_errors() {
    let (_sheet, base) = spawn_fake_sheet().await;
    let store = store(&base, "wrong-token");

    let err = store.list_all().await.unwrap_err();
    match err {
        StoreError::Read(message) => assert!(message.contains("401"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.ping().await.is_err());
}

#[tokio::test]
async fn undecodable_rows_name_their_location() {
    let (sheet, base) = spawn_fake_sheet().await;
    let store = store(&base, TOKEN);
    submit_referral(&store, lead_teacher_request(), submitted_at())
        .await
        .unwrap();
    sheet.rows.lock().unwrap()[1][Column::Status.index()] = "Withdrawn".into();

    match store.list_all().await.unwrap_err() {
        StoreError::Decode { location, .. } => assert_eq!(location, "Referrals row 2"),
        other => panic!("unexpected error: {other:?}"),
    }
    store.ping().await.unwrap();
}

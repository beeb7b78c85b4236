use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use chrono::{Days, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sr_api::auth::issue_session;
use sr_common::identity::VerifiedIdentity;
use sr_common::store::{FieldUpdates, MemoryReferralStore, ReferralStore, StoreError};
use sr_common::{Referral, ReferralId};
use tower::ServiceExt;

struct Client {
    app: Router,
    admin_cookie: String,
}

impl Client {
    fn new(store: Arc<dyn ReferralStore>) -> Self {
        let state = sr_api::test_state_with_store(store);
        let token = issue_session(
            &state.config.session,
            &VerifiedIdentity {
                email: sr_api::TEST_ADMIN_EMAIL.into(),
                name: Some("Talent Team".into()),
            },
        )
        .unwrap();

        Self {
            app: sr_api::create_router(state),
            admin_cookie: format!("sr_session={token}"),
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn admin_get(&self, uri: &str) -> Response {
        self.send(
            Request::builder()
                .uri(uri)
                .header(header::COOKIE, &self.admin_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn json(&self, method: Method, uri: &str, body: Value, admin: bool) -> Response {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if admin {
            request = request.header(header::COOKIE, &self.admin_cookie);
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn form(&self, uri: &str, body: &str, admin: bool) -> Response {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if admin {
            request = request.header(header::COOKIE, &self.admin_cookie);
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn patch(&self, id: &str, body: Value) -> Response {
        self.json(
            Method::PATCH,
            &format!("/api/admin/referrals/{id}"),
            body,
            true,
        )
        .await
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn referral_body(position_type: &str) -> Value {
    json!({
        "referrer_name": "Dana Reyes",
        "referrer_email": "Dana.Reyes@school.org",
        "referrer_school": "Arthur Ashe",
        "candidate_name": "Sam Ortiz",
        "candidate_email": "sam@example.com",
        "position": "3rd Grade ELA",
        "position_type": position_type,
        "relationship": "Former colleague",
    })
}

async fn submit(client: &Client, position_type: &str) -> String {
    let response = client
        .json(
            Method::POST,
            "/api/referrals",
            referral_body(position_type),
            false,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    body["referral_id"].as_str().unwrap().to_string()
}

async fn advance_to_interviewing(client: &Client, id: &str) {
    for status in ["Under Review", "Candidate Applied", "Interviewing"] {
        let response = client.patch(id, json!({ "status": status })).await;
        assert_eq!(response.status(), StatusCode::OK, "{status}");
    }
}

#[tokio::test]
async fn lead_teacher_referral_runs_to_payout() {
    let client = Client::new(Arc::new(MemoryReferralStore::new()));

    let response = client
        .json(
            Method::POST,
            "/api/referrals",
            referral_body("Lead Teacher"),
            false,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["bonus_amount"], 500);
    let id = created["referral_id"].as_str().unwrap().to_string();

    let public = body_json(client.get(&format!("/api/referrals/{id}")).await).await;
    assert_eq!(public["status"], "Submitted");

    advance_to_interviewing(&client, &id).await;

    let missing_hire_date = client.patch(&id, json!({ "status": "Hired" })).await;
    assert_eq!(missing_hire_date.status(), StatusCode::BAD_REQUEST);

    let hired = client
        .patch(&id, json!({ "status": "Hired", "hire_date": "2024-01-01" }))
        .await;
    assert_eq!(hired.status(), StatusCode::OK);
    let hired = body_json(hired).await;
    assert_eq!(hired["sixty_day_date"], "2024-03-01");
    assert_eq!(hired["payout_month"], "April 2024");
    assert_eq!(hired["status_updated_by"], sr_api::TEST_ADMIN_EMAIL);

    let eligible = client.patch(&id, json!({ "status": "Eligible" })).await;
    assert_eq!(eligible.status(), StatusCode::OK);

    let unpaid = client.patch(&id, json!({ "status": "Paid" })).await;
    assert_eq!(unpaid.status(), StatusCode::BAD_REQUEST);

    let paid = client
        .patch(&id, json!({ "status": "Paid", "paid_date": "2024-04-15" }))
        .await;
    assert_eq!(paid.status(), StatusCode::OK);
    let paid = body_json(paid).await;
    assert_eq!(paid["paid_date"], "2024-04-15");

    let stored = body_json(client.admin_get(&format!("/api/admin/referrals/{id}")).await).await;
    assert_eq!(stored["status_updated_at"], paid["status_updated_at"]);

    let reopened = client.patch(&id, json!({ "status": "Interviewing" })).await;
    assert_eq!(reopened.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(reopened).await["code"], "conflict");

    let overridden = client
        .patch(
            &id,
            json!({ "status": "Submitted", "override_workflow": true }),
        )
        .await;
    assert_eq!(overridden.status(), StatusCode::CONFLICT);
    let still_paid = body_json(client.admin_get(&format!("/api/admin/referrals/{id}")).await).await;
    assert_eq!(still_paid["status"], "Paid");
    assert_eq!(still_paid["paid_date"], "2024-04-15");

    let lookup =
        body_json(client.get("/api/referrals/lookup?email=dana.reyes%40school.org").await).await;
    assert_eq!(lookup["total_paid"], 500);
    assert_eq!(lookup["total_pending"], 0);
    assert_eq!(lookup["referrals"][0]["referral_id"], id.as_str());
}

#[tokio::test]
async fn eligibility_waits_for_sixty_days() {
    let client = Client::new(Arc::new(MemoryReferralStore::new()));
    let id = submit(&client, "Other").await;
    advance_to_interviewing(&client, &id).await;

    let hire_date = Utc::now().date_naive();
    let hired = client
        .patch(
            &id,
            json!({ "status": "Hired", "hire_date": hire_date.to_string() }),
        )
        .await;
    assert_eq!(hired.status(), StatusCode::OK);

    let early = client.patch(&id, json!({ "status": "Eligible" })).await;
    assert_eq!(early.status(), StatusCode::CONFLICT);
    let message = body_json(early).await["message"]
        .as_str()
        .unwrap()
        .to_string();
    let eligible_on = hire_date.checked_add_days(Days::new(60)).unwrap();
    assert!(message.contains(&eligible_on.to_string()), "{message}");

    let overridden = client
        .patch(
            &id,
            json!({ "status": "Eligible", "override_workflow": true }),
        )
        .await;
    assert_eq!(overridden.status(), StatusCode::CONFLICT);

    let closed = client.patch(&id, json!({ "status": "Candidate Left" })).await;
    assert_eq!(closed.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_notes_never_reach_public_lookups() {
    let client = Client::new(Arc::new(MemoryReferralStore::new()));
    let id = submit(&client, "Other").await;

    let noted = client
        .patch(&id, json!({ "admin_notes": "  salary expectations too high  " }))
        .await;
    assert_eq!(noted.status(), StatusCode::OK);
    assert_eq!(
        body_json(noted).await["admin_notes"],
        "salary expectations too high"
    );

    let lookup = body_text(client.get("/api/referrals/lookup?email=dana.reyes%40school.org").await).await;
    assert!(!lookup.contains("salary expectations"));
    assert!(!lookup.contains("admin_notes"));

    let by_id = body_text(client.get(&format!("/api/referrals/{id}")).await).await;
    assert!(!by_id.contains("salary expectations"));

    let page = body_text(client.get(&format!("/lookup?q={id}")).await).await;
    assert!(page.contains(&id));
    assert!(!page.contains("salary expectations"));

    let admin_view = body_json(client.admin_get(&format!("/api/admin/referrals/{id}")).await).await;
    assert_eq!(admin_view["admin_notes"], "salary expectations too high");
}

#[tokio::test]
async fn archived_referrals_leave_the_default_list_and_stats() {
    let client = Client::new(Arc::new(MemoryReferralStore::new()));
    let kept = submit(&client, "Lead Teacher").await;
    let archived = submit(&client, "Other").await;

    let response = client
        .json(
            Method::PATCH,
            &format!("/api/admin/referrals/{archived}/archive"),
            json!({}),
            true,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["is_archived"], true);

    let list = body_json(client.admin_get("/api/admin/referrals").await).await;
    let ids: Vec<&str> = list["referrals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["referral_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, [kept.as_str()]);

    let only = body_json(client.admin_get("/api/admin/referrals?archived=only").await).await;
    assert_eq!(only["referrals"][0]["referral_id"], archived.as_str());

    let stats = body_json(client.admin_get("/api/admin/stats").await).await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["pending_review"], 1);

    let rollup = body_json(client.admin_get("/api/admin/rollup").await).await;
    assert_eq!(rollup["total"], 1);
    assert_eq!(rollup["new_this_week"].as_array().unwrap().len(), 1);

    let staff = body_json(client.get("/api/staff/lookup?email=DANA.REYES%40school.org").await).await;
    assert_eq!(staff["found"], true);
    assert_eq!(staff["school"], "Arthur Ashe");
}

#[tokio::test]
async fn patch_validation() {
    let client = Client::new(Arc::new(MemoryReferralStore::new()));
    let id = submit(&client, "Other").await;

    assert_eq!(
        client.patch(&id, json!({})).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        client
            .patch(&id, json!({ "hire_date": "2024-01-01" }))
            .await
            .status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        client.patch("ZZZZ9999", json!({ "status": "Under Review" })).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        client
            .json(
                Method::PATCH,
                &format!("/api/admin/referrals/{id}"),
                json!({ "status": "Under Review" }),
                false,
            )
            .await
            .status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn invalid_submission_is_rejected() {
    let client = Client::new(Arc::new(MemoryReferralStore::new()));

    let mut body = referral_body("Other");
    body["candidate_email"] = json!("not-an-email");
    let response = client.json(Method::POST, "/api/referrals", body, false).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["code"], "bad_request");
    assert_eq!(error["message"], "candidate_email: must be an email address");
}

#[tokio::test]
async fn html_form_submission_and_admin_status_form() {
    let client = Client::new(Arc::new(MemoryReferralStore::new()));

    let form = "referrer_name=Dana+Reyes&referrer_email=dana%40school.org&referrer_school=Ashe\
&candidate_name=Sam+Ortiz&candidate_email=sam%40example.com&position=ELA\
&position_type=Lead+Teacher&relationship=Colleague";
    let response = client.form("/referrals", form, false).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let page = body_text(response).await;
    assert!(page.contains("$500"));

    let incomplete = client
        .form("/referrals", "referrer_name=Dana+%3CReyes%3E", false)
        .await;
    assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);
    let page = body_text(incomplete).await;
    assert!(page.contains("referrer_email: is required"));
    assert!(page.contains("Dana &lt;Reyes&gt;"));

    let list = body_json(client.admin_get("/api/admin/referrals").await).await;
    let id = list["referrals"][0]["referral_id"]
        .as_str()
        .unwrap()
        .to_string();

    let moved = client
        .form(
            &format!("/admin/referrals/{id}/status"),
            "status=Under+Review&hire_date=&paid_date=",
            true,
        )
        .await;
    assert_eq!(moved.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        moved.headers()[header::LOCATION],
        format!("/admin/referrals/{id}").as_str()
    );

    let skipped = client
        .form(
            &format!("/admin/referrals/{id}/status"),
            "status=Paid&paid_date=2024-04-01",
            true,
        )
        .await;
    assert_eq!(skipped.status(), StatusCode::CONFLICT);
    assert!(body_text(skipped).await.contains("cannot move a referral"));

    let overridden = client
        .form(
            &format!("/admin/referrals/{id}/status"),
            "status=Paid&paid_date=2024-04-01&override_workflow=true",
            true,
        )
        .await;
    assert_eq!(overridden.status(), StatusCode::SEE_OTHER);

    let detail = body_text(client.admin_get(&format!("/admin/referrals/{id}")).await).await;
    assert!(detail.contains("2024-04-01"));
    assert!(detail.contains("Paid is final"));

    let reopened = client
        .form(
            &format!("/admin/referrals/{id}/status"),
            "status=Submitted&override_workflow=on",
            true,
        )
        .await;
    assert_eq!(reopened.status(), StatusCode::CONFLICT);

    let unauthenticated = client
        .form(&format!("/admin/referrals/{id}/archive"), "", false)
        .await;
    assert_eq!(unauthenticated.status(), StatusCode::SEE_OTHER);
    assert_eq!(unauthenticated.headers()[header::LOCATION], "/login");
}

/// Serves reads from memory but refuses every write.
struct ReadOnlyStore {
    inner: MemoryReferralStore,
}

#[async_trait]
impl ReferralStore for ReadOnlyStore {
    fn backend(&self) -> &'static str {
        "read-only"
    }

    async fn list_all(&self) -> Result<Vec<Referral>, StoreError> {
        self.inner.list_all().await
    }

    async fn append(&self, _referral: &Referral) -> Result<(), StoreError> {
        Err(StoreError::Write("quota exceeded".into()))
    }

    async fn find_by_id(&self, id: &ReferralId) -> Result<Referral, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn update_fields(
        &self,
        _id: &ReferralId,
        _fields: &FieldUpdates,
    ) -> Result<(), StoreError> {
        Err(StoreError::Write("quota exceeded".into()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn store_write_failures_surface_as_bad_gateway() {
    let seeded = MemoryReferralStore::new();
    let request: sr_common::submission::SubmitReferralRequest =
        serde_json::from_value(referral_body("Other")).unwrap();
    let referral = sr_common::submission::submit_referral(&seeded, request, Utc::now())
        .await
        .unwrap();
    let id = referral.referral_id.to_string();

    let client = Client::new(Arc::new(ReadOnlyStore { inner: seeded }));

    let transition = client.patch(&id, json!({ "status": "Under Review" })).await;
    assert_eq!(transition.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(transition).await;
    assert_eq!(body["code"], "persistence_failure");
    assert!(!body["message"].as_str().unwrap().contains("quota"));

    let with_notes = client
        .patch(
            &id,
            json!({ "status": "Under Review", "admin_notes": "left a voicemail" }),
        )
        .await;
    assert_eq!(with_notes.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(with_notes).await["code"], "persistence_failure");

    let submission = client
        .json(
            Method::POST,
            "/api/referrals",
            referral_body("Other"),
            false,
        )
        .await;
    assert_eq!(submission.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(submission).await["code"], "store_unavailable");

    let unchanged = body_json(client.admin_get(&format!("/api/admin/referrals/{id}")).await).await;
    assert_eq!(unchanged["status"], "Submitted");
    assert_eq!(unchanged["admin_notes"], "");
}

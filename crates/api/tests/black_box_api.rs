use chrono::{Duration as ChronoDuration, Utc};
use bookwell_api::config::Settings;
use bookwell_auth::{JwtClaims, Role};
use bookwell_core::UserId;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    bootstrap_operator: UserId,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let bootstrap_operator = UserId::new();
        let mut settings = Settings::new(JWT_SECRET);
        settings.bootstrap_operator_id = Some(bootstrap_operator);

        let app = bookwell_api::app::build_app(settings).await.expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            bootstrap_operator,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(sub: UserId, role: Role) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub,
        role,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn booking(provider: UserId, scheduled_at: &str, duration_minutes: u32) -> Value {
    json!({
        "provider_id": provider,
        "scheduled_at": scheduled_at,
        "duration_minutes": duration_minutes,
        "kind": "remote",
    })
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn identity_is_derived_from_token() {
    let srv = TestServer::spawn().await;

    let user = UserId::new();
    let client = reqwest::Client::new();
    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(mint_jwt(user, Role::Provider))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), user.to_string());
    assert_eq!(body["role"], "provider");
    assert!(body["capabilities"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_booking_is_rejected_and_cancellation_frees_it() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let provider = UserId::new();
    let first_patient = mint_jwt(UserId::new(), Role::Requester);
    let second_patient = mint_jwt(UserId::new(), Role::Requester);

    let res = client
        .post(srv.url("/appointments"))
        .bearer_auth(&first_patient)
        .json(&booking(provider, "2030-06-04T10:00:00Z", 60))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    let id = created["appointment_id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "pending");

    let res = client
        .post(srv.url("/slots/check"))
        .bearer_auth(&second_patient)
        .json(&booking(provider, "2030-06-04T10:30:00Z", 45))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(srv.url("/appointments"))
        .bearer_auth(&second_patient)
        .json(&booking(provider, "2030-06-04T10:30:00Z", 45))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "slot_conflict");
    assert_eq!(body["conflicting_appointment_id"].as_str().unwrap(), id);

    let res = client
        .post(srv.url(&format!("/appointments/{id}/transition")))
        .bearer_auth(&first_patient)
        .json(&json!({ "to": "cancelled" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.url("/appointments"))
        .bearer_auth(&second_patient)
        .json(&booking(provider, "2030-06-04T10:30:00Z", 45))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn provider_lifecycle_and_mismatch() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let provider = UserId::new();
    let provider_token = mint_jwt(provider, Role::Provider);
    let patient_token = mint_jwt(UserId::new(), Role::Requester);

    let res = client
        .post(srv.url("/appointments"))
        .bearer_auth(&patient_token)
        .json(&booking(provider, "2030-06-05T09:00:00Z", 30))
        .send()
        .await
        .unwrap();
    let created: Value = res.json().await.unwrap();
    let id = created["appointment_id"].as_str().unwrap().to_string();

    // Some other provider.
    let res = client
        .post(srv.url(&format!("/appointments/{id}/transition")))
        .bearer_auth(mint_jwt(UserId::new(), Role::Provider))
        .json(&json!({ "to": "confirmed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Requesters cannot confirm.
    let res = client
        .post(srv.url(&format!("/appointments/{id}/transition")))
        .bearer_auth(&patient_token)
        .json(&json!({ "to": "confirmed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    for expected_changed in [true, false] {
        let res = client
            .post(srv.url(&format!("/appointments/{id}/transition")))
            .bearer_auth(&provider_token)
            .json(&json!({ "to": "confirmed" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["changed"], expected_changed);
        assert_eq!(body["appointment"]["status"], "confirmed");
    }

    let res = client
        .get(srv.url(&format!("/appointments/{id}/capabilities")))
        .bearer_auth(&provider_token)
        .send()
        .await
        .unwrap();
    let caps: Value = res.json().await.unwrap();
    assert_eq!(caps, json!({ "can_confirm": false, "can_cancel": true, "can_complete": true }));

    // Outsiders cannot tell the appointment exists.
    let res = client
        .get(srv.url(&format!("/appointments/{id}")))
        .bearer_auth(mint_jwt(UserId::new(), Role::Requester))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn grants_drive_the_operator_menu() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(srv.bootstrap_operator, Role::Operator);
    let staff = UserId::new();
    let staff_token = mint_jwt(staff, Role::Operator);

    let res = client
        .put(srv.url(&format!("/admin/operators/{staff}/grants")))
        .bearer_auth(&admin_token)
        .json(&json!({ "capabilities": ["view-metrics"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url("/admin/menu"))
        .bearer_auth(&staff_token)
        .send()
        .await
        .unwrap();
    let menu: Value = res.json().await.unwrap();
    let groups = menu["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    let labels: Vec<_> = groups[0]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["Home", "Overview", "Finance"]);

    // Without manage-team the staff member cannot hand out grants.
    let res = client
        .put(srv.url(&format!("/admin/operators/{}/grants", UserId::new())))
        .bearer_auth(&staff_token)
        .json(&json!({ "capabilities": ["view-metrics"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .put(srv.url(&format!("/admin/operators/{staff}/grants")))
        .bearer_auth(&admin_token)
        .json(&json!({ "capabilities": ["manage-moon"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unknown_capability");

    let res = client
        .get(srv.url("/admin/explain?capability=manage-team"))
        .bearer_auth(&staff_token)
        .send()
        .await
        .unwrap();
    let explanation: Value = res.json().await.unwrap();
    assert_eq!(explanation["granted"], false);
    assert_eq!(explanation["denial_reason"]["kind"], "missing_capability");

    let res = client
        .get(srv.url(&format!("/admin/audit?user_id={staff}")))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    let audit: Value = res.json().await.unwrap();
    assert_eq!(audit["items"].as_array().unwrap().len(), 1);
    assert_eq!(audit["items"][0]["new_value"], "view-metrics");

    let res = client
        .get(srv.url("/admin/audit"))
        .bearer_auth(&staff_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn operators_purge_and_requesters_cannot() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let patient_token = mint_jwt(UserId::new(), Role::Requester);
    let admin_token = mint_jwt(srv.bootstrap_operator, Role::Operator);

    let res = client
        .post(srv.url("/appointments"))
        .bearer_auth(&patient_token)
        .json(&booking(UserId::new(), "2030-06-06T13:00:00Z", 90))
        .send()
        .await
        .unwrap();
    let created: Value = res.json().await.unwrap();
    let id = created["appointment_id"].as_str().unwrap().to_string();

    let res = client
        .delete(srv.url(&format!("/appointments/{id}")))
        .bearer_auth(&patient_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .delete(srv.url(&format!("/appointments/{id}?reason=duplicate")))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url(&format!("/appointments/{id}")))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

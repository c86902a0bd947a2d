use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use db::{
    DBService,
    models::{
        ab_testing::AbVariant,
        audit_log::{AuditAction, AuditLog},
    },
};
use serde_json::{Value, json};
use server::{DeploymentImpl, config::Config, routes};
use tower::ServiceExt;
use uuid::Uuid;

const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; Mobile)";

struct TestApp {
    router: Router,
    db: DBService,
}

impl TestApp {
    async fn new() -> Self {
        let db = DBService::new_in_memory().await.unwrap();
        let deployment = DeploymentImpl::from_parts(db.clone(), Config::default());
        Self {
            router: routes::router(deployment),
            db,
        }
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, &[]).await
    }

    async fn send(&self, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(method, uri, Some(body), &[]).await
    }

    async fn create_invoice(&self) -> Value {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/invoices",
                json!({
                    "customer_id": 42,
                    "issue_date": "2025-01-15",
                    "items": [
                        {"item_text": "Webentwicklung", "qty": "2", "unit": "Std", "unit_price": "50.00"}
                    ],
                    "created_by": "admin"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"].clone()
    }

    async fn audit_entries(&self, invoice_id: &str) -> Vec<AuditLog> {
        let id = Uuid::parse_str(invoice_id).unwrap();
        AuditLog::find_by_ref(&self.db.pool, "lopez_invoices", id)
            .await
            .unwrap()
    }

    async fn start_experiment(&self, split_a: i64) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/ab/experiments",
                json!({
                    "name": "Hero-Section",
                    "goal": "Mehr Kontaktanfragen",
                    "split_a": split_a,
                    "variants": [
                        {"title": "Ihr IT-Partner", "button_text": "Kontakt"},
                        {"title": "Digitalisierung ohne Umwege", "button_text": "Jetzt starten"}
                    ]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = self
            .send(
                Method::PUT,
                &format!("/api/ab/experiments/{id}/status"),
                json!({"status": "running"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = self
            .send(Method::PUT, "/api/ab/config", json!({"ab_active": true}))
            .await;
        assert_eq!(status, StatusCode::OK);
        id
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "data": "ok"}));
}

#[tokio::test]
async fn create_get_and_verify_invoice() {
    let app = TestApp::new().await;
    let invoice = app.create_invoice().await;
    let id = invoice["id"].as_str().unwrap();

    assert_eq!(invoice["invoice_number"], "2025-0001");
    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["gross_amount"], "119.00");
    assert_eq!(
        invoice["hash_sha256"],
        "47b729813a75c7db12524817d511c74d690759a373f5fcfafb9c47618ffcd362"
    );

    let (status, body) = app.get(&format!("/api/invoices/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["items"][0]["net_line"], "100.00");

    let (status, body) = app.get(&format!("/api/invoices/{id}/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
}

#[tokio::test]
async fn change_status_rehashes_and_audits() {
    let app = TestApp::new().await;
    let invoice = app.create_invoice().await;
    let id = invoice["id"].as_str().unwrap();

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/invoices/status",
            json!({"invoice_id": id, "status": "sent"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["data"],
        json!({"invoice_id": id, "old_status": "draft", "new_status": "sent"})
    );

    let (_, body) = app.get(&format!("/api/invoices/{id}")).await;
    assert_eq!(body["data"]["status"], "sent");
    assert_eq!(
        body["data"]["hash_sha256"],
        "b332c7306465a88c34b5683b11d3f0e9044dd838b894bd15167c1aff70007282"
    );

    let audit = app.audit_entries(id).await;
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[1].action, AuditAction::InvoiceStatusChange);
    assert_eq!(
        audit[1].notes.as_deref(),
        Some("Status geändert: draft → sent (Rechnung: 2025-0001)")
    );
}

#[tokio::test]
async fn invalid_status_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let invoice = app.create_invoice().await;
    let id = invoice["id"].as_str().unwrap();

    for payload in [
        json!({"invoice_id": id, "status": "archived"}),
        json!({"invoice_id": id}),
        json!({"invoice_id": id, "status": ""}),
    ] {
        let (status, body) = app.send(Method::PUT, "/api/invoices/status", payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().is_some());
    }

    let (_, body) = app.get(&format!("/api/invoices/{id}")).await;
    assert_eq!(body["data"]["status"], "draft");
    assert_eq!(body["data"]["hash_sha256"], invoice["hash_sha256"]);
    assert_eq!(app.audit_entries(id).await.len(), 1);
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let app = TestApp::new().await;
    let missing = Uuid::new_v4();

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/invoices/status",
            json!({"invoice_id": missing, "status": "paid"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Rechnung nicht gefunden");

    let (status, _) = app.get(&format!("/api/invoices/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn issued_invoice_cannot_be_edited_but_can_be_cancelled() {
    let app = TestApp::new().await;
    let invoice = app.create_invoice().await;
    let id = invoice["id"].as_str().unwrap();

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/invoices/{id}"),
            json!({"issue_date": "2025-01-20", "items": []}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["gross_amount"], "0.00");

    app.send(
        Method::PUT,
        "/api/invoices/status",
        json!({"invoice_id": id, "status": "sent"}),
    )
    .await;

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/invoices/{id}"),
            json!({"issue_date": "2025-01-21", "items": []}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(Method::DELETE, &format!("/api/invoices/{id}"), None, &[])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["new_status"], "cancelled");

    let (status, body) = app.get(&format!("/api/invoices/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");

    let (_, body) = app.get(&format!("/api/invoices/{id}/verify")).await;
    assert_eq!(body["data"]["valid"], true);
}

#[tokio::test]
async fn list_invoices_paginates_and_filters() {
    let app = TestApp::new().await;
    for _ in 0..3 {
        app.create_invoice().await;
    }

    let (status, body) = app.get("/api/invoices?page=2&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["invoices"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["data"]["pagination"],
        json!({"page": 2, "limit": 2, "total": 3, "pages": 2})
    );

    let (_, body) = app.get("/api/invoices?status=paid").await;
    assert_eq!(body["data"]["pagination"]["total"], 0);

    let (status, _) = app.get("/api/invoices?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn out_of_range_page_is_a_bad_request() {
    let app = TestApp::new().await;
    app.create_invoice().await;

    let (status, body) = app
        .get("/api/invoices?page=9223372036854775807&limit=200")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn oversized_amounts_are_rejected() {
    let app = TestApp::new().await;
    let huge_item = json!([{"item_text": "Riesig", "qty": "79228162514264337593543950335", "unit_price": "2"}]);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/invoices",
            json!({"customer_id": 42, "issue_date": "2025-01-15", "items": huge_item.clone()}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let invoice = app.create_invoice().await;
    let id = invoice["id"].as_str().unwrap();
    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/invoices/{id}"),
            json!({"issue_date": "2025-01-15", "items": huge_item}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get(&format!("/api/invoices/{id}")).await;
    assert_eq!(body["data"]["gross_amount"], "119.00");
    assert_eq!(app.audit_entries(id).await.len(), 1);
}

#[tokio::test]
async fn variant_is_inactive_until_switched_on() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/api/ab/variant").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
    assert!(body.get("variant").is_none());
    assert!(body.get("success").is_none());
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn variant_assignment_is_sticky_and_counts_impressions() {
    let app = TestApp::new().await;
    let experiment_id = app.start_experiment(50).await;
    let headers = [
        ("user-agent", IPHONE_UA),
        ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
    ];

    let mut keys = Vec::new();
    for _ in 0..3 {
        let (status, body) = app
            .request(Method::GET, "/api/ab/variant", None, &headers)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], true);
        assert_eq!(body["experiment_id"], experiment_id.as_str());
        assert_eq!(body["device_type"], "mobile");
        keys.push(body["variant"]["key"].as_str().unwrap().to_string());
    }
    assert!(keys.iter().all(|key| key == "A"));

    let id = Uuid::parse_str(&experiment_id).unwrap();
    let variants = AbVariant::find_by_experiment_id(&app.db.pool, id)
        .await
        .unwrap();
    assert_eq!(variants[0].impressions, 3);
    assert_eq!(variants[1].impressions, 0);
}

#[tokio::test]
async fn lower_split_sends_visitor_to_variant_b() {
    let app = TestApp::new().await;
    app.start_experiment(20).await;

    let (_, body) = app
        .request(
            Method::GET,
            "/api/ab/variant",
            None,
            &[("user-agent", IPHONE_UA), ("x-real-ip", "203.0.113.7")],
        )
        .await;
    assert_eq!(body["variant"]["key"], "B");
    assert_eq!(
        body["variant"]["title"],
        "Digitalisierung ohne Umwege"
    );
}

#[tokio::test]
async fn events_track_clicks_and_reject_views() {
    let app = TestApp::new().await;
    let experiment_id = app.start_experiment(50).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/ab/event",
            json!({"experiment_id": experiment_id, "variant_key": "A", "event_type": "click"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["event_type"], "click");

    let (status, _) = app
        .send(
            Method::POST,
            "/api/ab/event",
            json!({"experiment_id": experiment_id, "variant_key": "A", "event_type": "view"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/ab/event",
            json!({"experiment_id": experiment_id, "variant_key": "Q", "event_type": "conversion"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/ab/experiments?status=running").await;
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["experiments"][0]["variants"][0]["clicks"], 1);
}

#[tokio::test]
async fn experiment_creation_is_validated() {
    let app = TestApp::new().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/ab/experiments",
            json!({"name": "Einzelvariante", "variants": [{"title": "Nur A"}]}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/ab/experiments/{}/status", Uuid::new_v4()),
            json!({"status": "running"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/api/ab/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["default_split"], 50);
}

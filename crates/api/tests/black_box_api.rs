use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use shopledger_auth::{JwtClaims, Role};
use shopledger_core::{OrganizationId, UserId};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = shopledger_api::app::build_app(SECRET.to_string()).expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    async fn send(&self, method: reqwest::Method, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// POST and return the `id` of the created/changed resource, asserting the status.
    async fn command(&self, token: &str, path: &str, body: Value, expected: StatusCode) -> String {
        let res = self.post(token, path, body).await;
        let status = res.status();
        let body: Value = res.json().await.unwrap();
        assert_eq!(status, expected, "POST {path} -> {body}");
        body["id"].as_str().unwrap_or_default().to_string()
    }

    /// Poll a read endpoint until `ready` accepts the body.
    ///
    /// Read models are eventually consistent with the command path.
    async fn eventually(&self, token: &str, path: &str, ready: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..50 {
            let res = self.get(token, path).await;
            if res.status() == StatusCode::OK {
                let body: Value = res.json().await.unwrap();
                if ready(&body) {
                    return body;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("GET {path} did not reach the expected state within timeout");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(organization_id: OrganizationId, user_id: UserId, roles: &[&'static str]) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user_id,
        organization_id,
        roles: roles.iter().map(|r| Role::new(*r)).collect(),
        issued_at: now - ChronoDuration::seconds(1),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

/// Organization with one location, created by an owner.
async fn bootstrap(srv: &TestServer) -> (OrganizationId, String, String) {
    let organization_id = OrganizationId::new();
    let owner = mint_jwt(organization_id, UserId::new(), &["owner"]);

    srv.command(
        &owner,
        "/organization",
        json!({ "name": "Corner Shop", "owner_name": "Ama" }),
        StatusCode::CREATED,
    )
    .await;
    let location_id = srv
        .command(&owner, "/organization/locations", json!({ "name": "Main" }), StatusCode::CREATED)
        .await;

    (organization_id, owner, location_id)
}

/// Add a new member with `role`; returns their id and a token.
async fn join(srv: &TestServer, owner: &str, organization_id: OrganizationId, role: &'static str) -> (UserId, String) {
    let user_id = UserId::new();
    srv.command(
        owner,
        "/organization/members",
        json!({ "user_id": user_id, "display_name": format!("{role} user"), "role": role }),
        StatusCode::CREATED,
    )
    .await;
    (user_id, mint_jwt(organization_id, user_id, &[role]))
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(format!("{}/whoami", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn organization_context_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let (organization_id, owner, _) = bootstrap(&srv).await;
    let (user_id, token) = join(&srv, &owner, organization_id, "manager").await;

    let res = srv.get(&token, "/whoami").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["organization_id"].as_str().unwrap(), organization_id.to_string());
    assert_eq!(body["user_id"].as_str().unwrap(), user_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "manager"));
}

#[tokio::test]
async fn membership_decides_what_a_token_may_do() {
    let srv = TestServer::spawn().await;
    let (organization_id, owner, _) = bootstrap(&srv).await;

    // A valid token for someone who never joined carries no authority.
    let stranger = mint_jwt(organization_id, UserId::new(), &["admin"]);
    let res = srv
        .post(&stranger, "/organization/categories", json!({ "kind": "product", "name": "Soap" }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_a_member");

    // Nor does one for an organization that does not exist yet.
    let elsewhere = mint_jwt(OrganizationId::new(), UserId::new(), &["owner"]);
    assert_eq!(srv.get(&elsewhere, "/products").await.status(), StatusCode::FORBIDDEN);

    let (user_id, token) = join(&srv, &owner, organization_id, "staff").await;
    let product = json!({ "sku": "TEA-1", "name": "Green tea", "unit_price": 450 });
    assert_eq!(srv.post(&token, "/products", product.clone()).await.status(), StatusCode::FORBIDDEN);

    // A role change applies to the token already in hand.
    let res = srv
        .send(
            reqwest::Method::PUT,
            &owner,
            &format!("/organization/members/{user_id}/role"),
            json!({ "role": "manager" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(srv.post(&token, "/products", product).await.status(), StatusCode::CREATED);

    let res = srv
        .send(reqwest::Method::DELETE, &owner, &format!("/organization/members/{user_id}"), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(srv.get(&token, "/whoami").await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn duplicate_category_names_conflict() {
    let srv = TestServer::spawn().await;
    let (_, owner, _) = bootstrap(&srv).await;

    srv.command(
        &owner,
        "/organization/categories",
        json!({ "kind": "expense", "name": "Rent" }),
        StatusCode::CREATED,
    )
    .await;

    let res = srv
        .post(&owner, "/organization/categories", json!({ "kind": "expense", "name": " rent " }))
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "duplicate");
}

#[tokio::test]
async fn purchase_then_sale_moves_stock_and_warns_managers() {
    let srv = TestServer::spawn().await;
    let (organization_id, owner, location_id) = bootstrap(&srv).await;

    let product_id = srv
        .command(
            &owner,
            "/products",
            json!({ "sku": "SOAP-1", "name": "Bar soap", "unit_price": 1200, "reorder_level": 5 }),
            StatusCode::CREATED,
        )
        .await;
    srv.command(&owner, &format!("/products/{product_id}/activate"), json!({}), StatusCode::OK)
        .await;
    // The stock reactor reads valuation and reorder level from the catalog read model.
    srv.eventually(&owner, &format!("/products/{product_id}"), |p| p["status"] == "active")
        .await;

    let res = srv
        .post(&owner, "/products", json!({ "sku": "soap-1", "name": "Other soap", "unit_price": 900 }))
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Purchase order: 10 units received into the location.
    let order_id = srv
        .command(
            &owner,
            "/purchases",
            json!({ "supplier_name": "Acme Wholesale", "location_id": location_id }),
            StatusCode::CREATED,
        )
        .await;
    srv.command(
        &owner,
        &format!("/purchases/{order_id}/lines"),
        json!({ "product_id": product_id, "quantity": 10, "unit_cost": 500 }),
        StatusCode::OK,
    )
    .await;
    srv.command(&owner, &format!("/purchases/{order_id}/approve"), json!({}), StatusCode::OK)
        .await;
    srv.command(&owner, &format!("/purchases/{order_id}/receive"), json!({}), StatusCode::OK)
        .await;

    srv.eventually(&owner, "/inventory/stock", |body| {
        body["items"]
            .as_array()
            .is_some_and(|items| items.iter().any(|i| i["on_hand"] == 10))
    })
    .await;

    // Sell 6, leaving 4 which is under the reorder level of 5.
    let (_, cashier) = join(&srv, &owner, organization_id, "cashier").await;
    let sale_id = srv
        .command(&cashier, "/sales", json!({ "location_id": location_id }), StatusCode::CREATED)
        .await;
    srv.command(
        &cashier,
        &format!("/sales/{sale_id}/items"),
        json!({ "product_id": product_id, "quantity": 6 }),
        StatusCode::OK,
    )
    .await;
    srv.command(
        &cashier,
        &format!("/sales/{sale_id}/payments"),
        json!({ "method": "cash", "amount": 7200 }),
        StatusCode::OK,
    )
    .await;
    srv.command(&cashier, &format!("/sales/{sale_id}/complete"), json!({}), StatusCode::OK)
        .await;

    let low = srv
        .eventually(&owner, "/inventory/stock/low", |body| {
            body["items"].as_array().is_some_and(|items| items.len() == 1)
        })
        .await;
    assert_eq!(low["items"][0]["on_hand"], 4);

    let (_, manager) = join(&srv, &owner, organization_id, "manager").await;
    let notes = srv
        .eventually(&manager, "/notifications?unread=true", |body| {
            body["items"].as_array().is_some_and(|items| !items.is_empty())
        })
        .await;
    assert_eq!(notes["items"][0]["kind"], "low_stock");

    // A sale that stock cannot cover is refused before completion.
    let sale_id = srv
        .command(&cashier, "/sales", json!({ "location_id": location_id }), StatusCode::CREATED)
        .await;
    srv.command(
        &cashier,
        &format!("/sales/{sale_id}/items"),
        json!({ "product_id": product_id, "quantity": 5 }),
        StatusCode::OK,
    )
    .await;
    srv.command(
        &cashier,
        &format!("/sales/{sale_id}/payments"),
        json!({ "method": "card", "amount": 6000 }),
        StatusCode::OK,
    )
    .await;
    let res = srv.post(&cashier, &format!("/sales/{sale_id}/complete"), json!({})).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Two tills race for the remaining 4 units; only one sale of 3 can complete.
    let mut racing = Vec::new();
    for _ in 0..2 {
        let sale_id = srv
            .command(&cashier, "/sales", json!({ "location_id": location_id }), StatusCode::CREATED)
            .await;
        srv.command(
            &cashier,
            &format!("/sales/{sale_id}/items"),
            json!({ "product_id": product_id, "quantity": 3 }),
            StatusCode::OK,
        )
        .await;
        srv.command(
            &cashier,
            &format!("/sales/{sale_id}/payments"),
            json!({ "method": "cash", "amount": 3600 }),
            StatusCode::OK,
        )
        .await;
        racing.push(sale_id);
    }
    let first_path = format!("/sales/{}/complete", racing[0]);
    let second_path = format!("/sales/{}/complete", racing[1]);
    let (first, second) = tokio::join!(
        srv.post(&cashier, &first_path, json!({})),
        srv.post(&cashier, &second_path, json!({})),
    );
    let mut statuses = [first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNPROCESSABLE_ENTITY]);

    srv.eventually(&owner, "/inventory/stock", |body| {
        body["items"]
            .as_array()
            .is_some_and(|items| items.iter().any(|i| i["on_hand"] == 1))
    })
    .await;
}

#[tokio::test]
async fn expense_waits_for_workflow_approval_and_notifies_creator() {
    let srv = TestServer::spawn().await;
    let (organization_id, owner, location_id) = bootstrap(&srv).await;

    let category_id = srv
        .command(
            &owner,
            "/organization/categories",
            json!({ "kind": "expense", "name": "Supplies" }),
            StatusCode::CREATED,
        )
        .await;

    let (_, accountant) = join(&srv, &owner, organization_id, "accountant").await;
    let workflow_id = srv
        .command(
            &accountant,
            "/workflows",
            json!({ "name": "Large spend", "priority": 10 }),
            StatusCode::CREATED,
        )
        .await;
    srv.command(
        &accountant,
        &format!("/workflows/{workflow_id}/steps"),
        json!({
            "name": "Manager sign-off",
            "conditions": [{ "type": "amount_range", "min": 10000, "max": null }],
            "actions": [{ "type": "require_role", "role": "manager" }],
        }),
        StatusCode::CREATED,
    )
    .await;
    srv.command(&accountant, &format!("/workflows/{workflow_id}/activate"), json!({}), StatusCode::OK)
        .await;
    srv.eventually(&accountant, &format!("/workflows/{workflow_id}"), |w| w["active"] == true)
        .await;

    let res = srv
        .post(&accountant, "/workflows", json!({ "name": "large SPEND" }))
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let preview: Value = srv
        .post(
            &accountant,
            "/workflows/preview",
            json!({ "amount": 500, "category_id": category_id, "location_id": location_id }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(preview["auto_approved"], true);

    let (_, staff) = join(&srv, &owner, organization_id, "staff").await;
    let expense_id = srv
        .command(
            &staff,
            "/expenses",
            json!({
                "title": "Shelving",
                "amount": 25000,
                "category_id": category_id,
                "location_id": location_id,
                "spent_on": "2026-10-01",
            }),
            StatusCode::CREATED,
        )
        .await;
    let (_, other_staff) = join(&srv, &owner, organization_id, "staff").await;
    let res = srv
        .post(&other_staff, &format!("/expenses/{expense_id}/submit"), json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    srv.command(&staff, &format!("/expenses/{expense_id}/submit"), json!({}), StatusCode::OK)
        .await;

    // Staff cannot approve, even their own expense.
    let res = srv.post(&staff, &format!("/expenses/{expense_id}/approve"), json!({})).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (_, manager) = join(&srv, &owner, organization_id, "manager").await;
    srv.eventually(&manager, "/expenses/awaiting", |body| {
        body["items"].as_array().is_some_and(|items| items.len() == 1)
    })
    .await;
    srv.command(
        &manager,
        &format!("/expenses/{expense_id}/approve"),
        json!({ "comment": "ok" }),
        StatusCode::OK,
    )
    .await;

    let expense = srv
        .eventually(&staff, &format!("/expenses/{expense_id}"), |e| e["status"] == "approved")
        .await;
    assert_eq!(expense["approvals"].as_array().unwrap().len(), 1);

    let notes = srv
        .eventually(&staff, "/notifications", |body| {
            body["items"]
                .as_array()
                .is_some_and(|items| items.iter().any(|n| n["kind"] == "expense_approved"))
        })
        .await;
    let note_id = notes["items"][0]["notification_id"].as_str().unwrap().to_string();
    let res = srv.post(&staff, &format!("/notifications/{note_id}/read"), json!({})).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    srv.command(
        &accountant,
        &format!("/expenses/{expense_id}/pay"),
        json!({ "reference": "TRX-1" }),
        StatusCode::OK,
    )
    .await;
}

#[tokio::test]
async fn cashier_cannot_void_sales() {
    let srv = TestServer::spawn().await;
    let (organization_id, owner, location_id) = bootstrap(&srv).await;

    let (_, cashier) = join(&srv, &owner, organization_id, "cashier").await;
    let sale_id = srv
        .command(&cashier, "/sales", json!({ "location_id": location_id }), StatusCode::CREATED)
        .await;

    let res = srv
        .post(&cashier, &format!("/sales/{sale_id}/void"), json!({ "reason": "mistake" }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn unknown_resources_are_not_found() {
    let srv = TestServer::spawn().await;
    let (_, owner, _) = bootstrap(&srv).await;

    let res = srv.get(&owner, &format!("/products/{}", uuid::Uuid::now_v7())).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv.get(&owner, "/products/not-a-uuid").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .post(&owner, "/sales", json!({ "location_id": uuid::Uuid::now_v7() }))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_reference");
}

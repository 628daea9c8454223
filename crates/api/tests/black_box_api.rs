use chrono::{Duration as ChronoDuration, Utc};
use kontor_api::app::{build_app, services::AppServices};
use kontor_auth::{JwtClaims, Role};
use kontor_core::{TenantId, UserId};
use kontor_infra::config::AppConfig;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

const JWT_SECRET: &str = "test-secret";
const IBAN: &str = "DE02120300000000202051";

const STATEMENT: &str = "\
:20:STMT1
:25:DE02120300000000202051
:28C:00001/001
:60F:C240101EUR1000,00
:61:2401020102C250,00NTRFNONREF
:86:166?00GUTSCHRIFT?20Rechnung RE-2024-0001?32Acme GmbH
:62F:C240102EUR1250,00
-
";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory stores, ephemeral port.
        let storage_dir = std::env::temp_dir()
            .join(format!("kontor-api-test-{}", uuid::Uuid::now_v7()))
            .to_string_lossy()
            .into_owned();
        let config = AppConfig::from_lookup(|key| match key {
            "JWT_SECRET" => Some(JWT_SECRET.to_string()),
            "STORAGE_DIR" => Some(storage_dir.clone()),
            _ => None,
        })
        .expect("test config");
        let services = AppServices::build(config, None).expect("failed to build services");
        let app = build_app(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    async fn graphql(&self, token: Option<&str>, query: &str, variables: Value) -> Value {
        let mut req = reqwest::Client::new()
            .post(format!("{}/graphql", self.base_url))
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }

    /// Sign up a fresh tenant and return the owner's token.
    async fn signup(&self, slug: &str) -> String {
        let body = self
            .graphql(
                None,
                "mutation($input: SignupInput!) { signup(input: $input) { token tenant { slug } user { email roles } } }",
                json!({
                    "input": {
                        "tenantName": "Muster GmbH",
                        "slug": slug,
                        "email": "owner@muster.example",
                        "displayName": "Olga Owner",
                        "password": "correct horse",
                    }
                }),
            )
            .await;
        assert!(body.get("errors").is_none(), "signup failed: {body}");
        let payload = &body["data"]["signup"];
        assert_eq!(payload["tenant"]["slug"], slug);
        assert!(payload["user"]["roles"].as_array().unwrap().iter().any(|r| r == "admin"));
        payload["token"].as_str().unwrap().to_string()
    }

    async fn open_account(&self, token: &str) -> String {
        let body = self
            .graphql(
                Some(token),
                "mutation($input: BankAccountInput!) { openBankAccount(input: $input) { id iban } }",
                json!({ "input": { "name": "Girokonto", "iban": IBAN } }),
            )
            .await;
        assert!(body.get("errors").is_none(), "openBankAccount failed: {body}");
        body["data"]["openBankAccount"]["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(tenant_id: TenantId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        tenant_id,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn error_code(body: &Value) -> Option<&str> {
    body["errors"][0]["extensions"]["code"].as_str()
}

fn file_form(filename: &str, bytes: &[u8]) -> Form {
    Form::new().part("file", Part::bytes(bytes.to_vec()).file_name(filename.to_string()))
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tenant_context_is_derived_from_token() {
    let srv = TestServer::spawn().await;

    let tenant_id = TenantId::new();
    let token = mint_jwt(tenant_id, vec![Role::new("accountant")]);

    let res = reqwest::Client::new()
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tenant_id"].as_str().unwrap(), tenant_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "accountant"));
}

#[tokio::test]
async fn signup_then_login_and_me() {
    let srv = TestServer::spawn().await;
    let token = srv.signup("muster").await;

    let me = srv
        .graphql(
            Some(&token),
            "{ me { __typename ... on Viewer { tenant { slug } user { email } } } }",
            json!({}),
        )
        .await;
    assert_eq!(me["data"]["me"]["__typename"], "Viewer");
    assert_eq!(me["data"]["me"]["user"]["email"], "owner@muster.example");

    let login = "mutation($slug: String!, $email: String!, $password: String!) {
        login(tenantSlug: $slug, email: $email, password: $password) {
            __typename
            ... on AuthPayload { token }
            ... on AuthError { code message }
        }
    }";

    let ok = srv
        .graphql(
            None,
            login,
            json!({ "slug": "muster", "email": "OWNER@muster.example", "password": "correct horse" }),
        )
        .await;
    assert_eq!(ok["data"]["login"]["__typename"], "AuthPayload");
    assert!(ok["data"]["login"]["token"].as_str().is_some_and(|t| !t.is_empty()));

    let wrong = srv
        .graphql(
            None,
            login,
            json!({ "slug": "muster", "email": "owner@muster.example", "password": "battery staple" }),
        )
        .await;
    assert!(wrong.get("errors").is_none());
    assert_eq!(wrong["data"]["login"]["__typename"], "AuthError");

    // Anonymous `me` is an AuthError member, not a GraphQL error.
    let anon = srv
        .graphql(None, "{ me { __typename } }", json!({}))
        .await;
    assert_eq!(anon["data"]["me"]["__typename"], "AuthError");
}

#[tokio::test]
async fn duplicate_slug_is_a_conflict() {
    let srv = TestServer::spawn().await;
    srv.signup("acme").await;

    let body = srv
        .graphql(
            None,
            "mutation($input: SignupInput!) { signup(input: $input) { token } }",
            json!({
                "input": {
                    "tenantName": "Acme Again",
                    "slug": "ACME",
                    "email": "someone@acme.example",
                    "displayName": "Someone",
                    "password": "long enough",
                }
            }),
        )
        .await;
    assert_eq!(error_code(&body), Some("CONFLICT"));
}

#[tokio::test]
async fn customer_lifecycle_create_query_archive() {
    let srv = TestServer::spawn().await;
    let token = srv.signup("customers").await;

    let created = srv
        .graphql(
            Some(&token),
            "mutation($input: CustomerInput!) { createCustomer(input: $input) { id name iban status } }",
            json!({ "input": { "name": "Acme GmbH", "iban": "  ", "vatId": "DE123456789" } }),
        )
        .await;
    assert!(created.get("errors").is_none(), "createCustomer failed: {created}");
    let customer = &created["data"]["createCustomer"];
    assert_eq!(customer["status"], "ACTIVE");
    assert!(customer["iban"].is_null());
    let id = customer["id"].as_str().unwrap().to_string();

    let listed = srv
        .graphql(Some(&token), "{ customers { id name } }", json!({}))
        .await;
    let customers = listed["data"]["customers"].as_array().unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0]["id"], id.as_str());

    let archived = srv
        .graphql(
            Some(&token),
            "mutation($id: ID!) { archiveCustomer(id: $id) { status } }",
            json!({ "id": id }),
        )
        .await;
    assert_eq!(archived["data"]["archiveCustomer"]["status"], "ARCHIVED");

    let active = srv
        .graphql(Some(&token), "{ customers { id } }", json!({}))
        .await;
    assert!(active["data"]["customers"].as_array().unwrap().is_empty());

    let all = srv
        .graphql(Some(&token), "{ customers(includeArchived: true) { id } }", json!({}))
        .await;
    assert_eq!(all["data"]["customers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn tenants_do_not_see_each_others_data() {
    let srv = TestServer::spawn().await;
    let first = srv.signup("first").await;
    let second = srv.signup("second").await;

    srv.graphql(
        Some(&first),
        "mutation($input: CustomerInput!) { createCustomer(input: $input) { id } }",
        json!({ "input": { "name": "Only Mine" } }),
    )
    .await;

    let other = srv
        .graphql(Some(&second), "{ customers(includeArchived: true) { id } }", json!({}))
        .await;
    assert!(other["data"]["customers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn viewer_cannot_write() {
    let srv = TestServer::spawn().await;
    let admin = srv.signup("roles").await;

    let created = srv
        .graphql(
            Some(&admin),
            "mutation($input: UserInput!) { createUser(input: $input) { id roles } }",
            json!({
                "input": {
                    "email": "viewer@roles.example",
                    "displayName": "Vera Viewer",
                    "password": "read only please",
                    "roles": ["viewer"],
                }
            }),
        )
        .await;
    assert!(created.get("errors").is_none(), "createUser failed: {created}");

    let login = srv
        .graphql(
            None,
            "mutation { login(tenantSlug: \"roles\", email: \"viewer@roles.example\", password: \"read only please\") {
                ... on AuthPayload { token }
            } }",
            json!({}),
        )
        .await;
    let viewer = login["data"]["login"]["token"].as_str().unwrap().to_string();

    let read = srv
        .graphql(Some(&viewer), "{ customers { id } }", json!({}))
        .await;
    assert!(read.get("errors").is_none());

    let write = srv
        .graphql(
            Some(&viewer),
            "mutation($input: CustomerInput!) { createCustomer(input: $input) { id } }",
            json!({ "input": { "name": "Not Allowed" } }),
        )
        .await;
    assert_eq!(error_code(&write), Some("FORBIDDEN"));

    let audit = srv
        .graphql(Some(&viewer), "{ auditLog { id } }", json!({}))
        .await;
    assert_eq!(error_code(&audit), Some("FORBIDDEN"));
}

#[tokio::test]
async fn protected_queries_require_a_session() {
    let srv = TestServer::spawn().await;

    let body = srv
        .graphql(None, "{ customers { id } }", json!({}))
        .await;
    assert_eq!(error_code(&body), Some("UNAUTHENTICATED"));
}

#[tokio::test]
async fn upload_stores_file_and_rejects_duplicates() {
    let srv = TestServer::spawn().await;
    let token = srv.signup("uploads").await;
    let client = reqwest::Client::new();
    let pdf = b"%PDF-1.7\n1 0 obj << /Type /Catalog >> endobj\n%%EOF";

    let res = client
        .post(format!("{}/api/imported-invoices", srv.base_url))
        .bearer_auth(&token)
        .multipart(file_form("eingang.pdf", pdf))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["filename"], "eingang.pdf");
    assert_eq!(created["size_bytes"], pdf.len());
    let id = created["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/api/imported-invoices", srv.base_url))
        .bearer_auth(&token)
        .multipart(file_form("copy.pdf", pdf))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    let res = client
        .get(format!("{}/api/imported-invoices/{}/file", srv.base_url, id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/pdf");
    assert_eq!(res.bytes().await.unwrap().as_ref(), pdf);

    let res = client
        .get(format!("{}/api/imported-invoices/not-an-id/file", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_rejects_unsupported_files() {
    let srv = TestServer::spawn().await;
    let token = srv.signup("badfiles").await;

    let res = reqwest::Client::new()
        .post(format!("{}/api/imported-invoices", srv.base_url))
        .bearer_auth(&token)
        .multipart(file_form("notes.txt", b"just some text"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn statement_import_updates_balance_and_skips_duplicates() {
    let srv = TestServer::spawn().await;
    let token = srv.signup("banking").await;
    let account_id = srv.open_account(&token).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/bank-accounts/{}/statements", srv.base_url, account_id);

    let res = client
        .post(&url)
        .bearer_auth(&token)
        .multipart(file_form("umsaetze.sta", STATEMENT.as_bytes()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let first: Value = res.json().await.unwrap();
    assert_eq!(first["summary"]["imported"], 1);
    assert_eq!(first["summary"]["duplicates"], 0);
    assert_eq!(first["account"]["balance"]["cents"], 125_000);

    let res = client
        .post(&url)
        .bearer_auth(&token)
        .multipart(file_form("umsaetze.sta", STATEMENT.as_bytes()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let second: Value = res.json().await.unwrap();
    assert_eq!(second["summary"]["imported"], 0);
    assert_eq!(second["summary"]["duplicates"], 1);

    let listed = srv
        .graphql(
            Some(&token),
            "query($id: ID!) { bankTransactions(accountId: $id) { amount { cents } counterpartyName } }",
            json!({ "id": account_id }),
        )
        .await;
    let transactions = listed["data"]["bankTransactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["amount"]["cents"], 25_000);
}

#[tokio::test]
async fn malformed_statement_is_rejected() {
    let srv = TestServer::spawn().await;
    let token = srv.signup("garbage").await;
    let account_id = srv.open_account(&token).await;

    let res = reqwest::Client::new()
        .post(format!("{}/api/bank-accounts/{}/statements", srv.base_url, account_id))
        .bearer_auth(&token)
        .multipart(file_form("broken.sta", b"this is not mt940"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

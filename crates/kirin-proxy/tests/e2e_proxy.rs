//! End-to-end tests: a real echo backend behind the proxy handler, with the
//! in-memory payment backend standing in for a Lightning node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App, HttpRequest, HttpResponse, HttpServer};
use kirin::{
    Authenticator, CaveatTemplate, Challenger, ChallengerConfig, MemoryInvoiceBackend, Minter,
    PaymentHash, Preimage, RootKey, SettlementStatus, Token,
};
use kirin_proxy::config::ServiceConfig;
use kirin_proxy::routes::service::handle;
use kirin_proxy::{AppState, RouteTable};

async fn echo(req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let headers: serde_json::Map<String, serde_json::Value> = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                serde_json::json!(v.to_str().unwrap_or("")),
            )
        })
        .collect();
    HttpResponse::Ok()
        .insert_header(("x-backend", "echo"))
        .json(serde_json::json!({
            "path": req.path(),
            "query": req.query_string(),
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
}

/// Start an echo backend on an ephemeral port and return its base URL.
fn spawn_backend() -> String {
    let server = HttpServer::new(|| App::new().default_service(web::to(echo)))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    format!("http://{addr}")
}

fn service(name: &str, prefix: &str, backend: &str, price: u64) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        path_prefix: prefix.to_string(),
        backend: backend.to_string(),
        price,
        caveats: vec![CaveatTemplate::PathPrefix, CaveatTemplate::Service],
    }
}

struct Harness {
    payments: Arc<MemoryInvoiceBackend>,
    challenger: Arc<Challenger>,
    state: web::Data<AppState>,
}

fn harness(services: Vec<ServiceConfig>, static_root: Option<PathBuf>) -> Harness {
    let payments = Arc::new(MemoryInvoiceBackend::new());
    let challenger = Arc::new(Challenger::new(
        payments.clone(),
        ChallengerConfig {
            backend_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    ));
    challenger.spawn_settlement_listener();
    let minter = Minter::new(
        Arc::new(RootKey::new(vec![9u8; 32]).unwrap()),
        challenger.clone(),
    );
    let authenticator = Arc::new(Authenticator::new(challenger.clone(), minter));
    let state = AppState::new(
        RouteTable::new(services).unwrap(),
        authenticator,
        Duration::from_secs(2),
    )
    .unwrap()
    .with_static_root(static_root);
    Harness {
        payments,
        challenger,
        state: web::Data::new(state),
    }
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data($h.state.clone())
                .default_service(web::to(handle)),
        )
        .await
    };
}

struct Issued {
    token: String,
    payment_hash: PaymentHash,
}

/// Parse the 402 body and check it agrees with the challenge header.
fn issued(header: &str, body: &serde_json::Value) -> Issued {
    let token = body["macaroon"].as_str().unwrap().to_string();
    let invoice = body["invoice"].as_str().unwrap();
    assert!(!invoice.is_empty());
    assert_eq!(
        header,
        format!("L402 macaroon=\"{token}\", invoice=\"{invoice}\"")
    );
    let payment_hash: PaymentHash = body["payment_hash"].as_str().unwrap().parse().unwrap();
    Issued {
        token,
        payment_hash,
    }
}

fn credential(token: &str, preimage: &Preimage) -> (&'static str, String) {
    ("Authorization", format!("L402 {token}:{}", preimage.to_hex()))
}

#[actix_rt::test]
async fn scenario_1_unpaid_request_gets_challenge() {
    let backend = spawn_backend();
    let h = harness(vec![service("api", "/api", &backend, 100)], None);
    let app = app!(h);

    let req = test::TestRequest::get().uri("/api/items").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 402);
    let header = resp
        .headers()
        .get("www-authenticate")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);

    let token = Token::decode(&challenge.token).unwrap();
    assert_eq!(token.payment_hash(), challenge.payment_hash);
    assert_eq!(body["amount"], 100);
    assert_eq!(h.payments.invoices_created(), 1);
}

#[actix_rt::test]
async fn scenarios_2_and_3_settlement_unlocks_token() {
    let backend = spawn_backend();
    let h = harness(vec![service("api", "/api", &backend, 100)], None);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/items").to_request()).await;
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);
    let preimage = h.payments.preimage(&challenge.payment_hash).unwrap();

    // Correct secret, but the invoice is not paid yet.
    let req = test::TestRequest::get()
        .uri("/api/items")
        .insert_header(credential(&challenge.token, &preimage))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);

    h.payments.settle(&challenge.payment_hash).unwrap();

    let req = test::TestRequest::post()
        .uri("/api/items?sort=desc")
        .insert_header(credential(&challenge.token, &preimage))
        .insert_header(("X-Kirin-Token-Id", "spoofed"))
        .set_payload("hello")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("x-backend").unwrap(), "echo");

    let echoed: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(echoed["path"], "/api/items");
    assert_eq!(echoed["query"], "sort=desc");
    assert_eq!(echoed["body"], "hello");

    let headers = &echoed["headers"];
    let token = Token::decode(&challenge.token).unwrap();
    assert_eq!(headers["x-kirin-token-id"], token.token_id().to_hex());
    assert_eq!(headers["x-kirin-payment-hash"], challenge.payment_hash.to_hex());
    assert_eq!(headers["x-kirin-caveats"], "path_prefix=/api; service=api");
    assert!(headers.get("authorization").is_none());
}

#[actix_rt::test]
async fn scenario_3_notified_settlement_admits_without_lookup() {
    let backend = spawn_backend();
    let h = harness(vec![service("api", "/api", &backend, 100)], None);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/items").to_request()).await;
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);

    // Let the listener subscribe before the payment lands.
    actix_rt::time::sleep(Duration::from_millis(50)).await;
    let preimage = h.payments.settle(&challenge.payment_hash).unwrap();
    let status = h
        .challenger
        .wait_for_settlement(&challenge.payment_hash, Duration::from_secs(2))
        .await;
    assert_eq!(status, SettlementStatus::Settled(preimage));

    // Invoice lookups now fail; the notified settlement alone admits the token.
    h.payments.set_unavailable(true);
    let req = test::TestRequest::get()
        .uri("/api/items")
        .insert_header(credential(&challenge.token, &preimage))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let echoed: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(echoed["headers"]["x-kirin-payment-hash"], challenge.payment_hash.to_hex());
}

#[actix_rt::test]
async fn encoded_path_is_routed_as_decoded() {
    let backend = spawn_backend();
    let h = harness(
        vec![
            service("site", "/", &backend, 0),
            service("api", "/api", &backend, 100),
        ],
        None,
    );
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/%61pi/secret").to_request()).await;
    assert_eq!(resp.status(), 402);
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);
    let preimage = h.payments.settle(&challenge.payment_hash).unwrap();

    let req = test::TestRequest::get()
        .uri("/%61pi/secret")
        .insert_header(credential(&challenge.token, &preimage))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let echoed: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(echoed["path"], "/api/secret");
    assert_eq!(echoed["headers"]["x-kirin-caveats"], "path_prefix=/api; service=api");

    // Dot and empty segments resolve the same way.
    let resp = test::call_service(&app, test::TestRequest::get().uri("/./api/secret").to_request()).await;
    assert_eq!(resp.status(), 402);
}

#[actix_rt::test]
async fn scenario_4_static_fallback() {
    let backend = spawn_backend();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "static hello").unwrap();

    let h = harness(
        vec![service("api", "/api", &backend, 100)],
        Some(dir.path().to_path_buf()),
    );
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/hello.txt").to_request()).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(test::read_body(resp).await, "static hello");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/missing.txt").to_request()).await;
    assert_eq!(resp.status(), 404);

    let h = harness(vec![service("api", "/api", &backend, 100)], None);
    let app = app!(h);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/hello.txt").to_request()).await;
    assert_eq!(resp.status(), 404);
    assert_eq!(h.payments.invoices_created(), 0);
}

#[actix_rt::test]
async fn scenario_5_token_for_other_route_is_unauthorized() {
    let backend = spawn_backend();
    let h = harness(
        vec![
            service("alpha", "/alpha", &backend, 100),
            service("beta", "/beta", &backend, 100),
        ],
        None,
    );
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/alpha/x").to_request()).await;
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);
    let preimage = h.payments.settle(&challenge.payment_hash).unwrap();

    let req = test::TestRequest::get()
        .uri("/beta/x")
        .insert_header(credential(&challenge.token, &preimage))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");

    // Still good where it was minted.
    let req = test::TestRequest::get()
        .uri("/alpha/x")
        .insert_header(credential(&challenge.token, &preimage))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_rt::test]
async fn free_route_bypasses_payment() {
    let backend = spawn_backend();
    let h = harness(vec![service("public", "/public", &backend, 0)], None);
    let app = app!(h);

    let req = test::TestRequest::get()
        .uri("/public/info")
        .insert_header(("Authorization", "Bearer backend-credential"))
        .insert_header(("X-Kirin-Payment-Hash", "spoofed"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(h.payments.invoices_created(), 0);

    let echoed: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(echoed["headers"]["authorization"], "Bearer backend-credential");
    assert!(echoed["headers"].get("x-kirin-payment-hash").is_none());
}

#[actix_rt::test]
async fn forged_token_is_unauthorized() {
    let backend = spawn_backend();
    let h = harness(vec![service("api", "/api", &backend, 100)], None);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api").to_request()).await;
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);
    let preimage = h.payments.settle(&challenge.payment_hash).unwrap();

    let mut bytes = Token::decode(&challenge.token).unwrap().to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let forged = Token::from_bytes(&bytes).unwrap().encode();

    let req = test::TestRequest::get()
        .uri("/api")
        .insert_header(credential(&forged, &preimage))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_rt::test]
async fn capacity_caveat_limits_uses() {
    let backend = spawn_backend();
    let mut limited = service("api", "/api", &backend, 100);
    limited.caveats.push(CaveatTemplate::Capacity { uses: 2 });
    let h = harness(vec![limited], None);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api").to_request()).await;
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);
    let preimage = h.payments.settle(&challenge.payment_hash).unwrap();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let req = test::TestRequest::get()
            .uri("/api")
            .insert_header(credential(&challenge.token, &preimage))
            .to_request();
        statuses.push(test::call_service(&app, req).await.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 401]);
}

#[actix_rt::test]
async fn unreachable_backend_is_bad_gateway() {
    // Nothing listens on the discard port.
    let h = harness(vec![service("dead", "/dead", "http://127.0.0.1:9", 0)], None);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/dead").to_request()).await;
    assert_eq!(resp.status(), 502);
}

#[actix_rt::test]
async fn paid_token_for_unreachable_backend_is_bad_gateway() {
    let h = harness(vec![service("dead", "/dead", "http://127.0.0.1:9", 100)], None);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/dead/x").to_request()).await;
    assert_eq!(resp.status(), 402);
    let header = resp.headers().get("www-authenticate").unwrap().to_str().unwrap().to_string();
    let body: serde_json::Value = test::read_body_json(resp).await;
    let challenge = issued(&header, &body);
    let preimage = h.payments.settle(&challenge.payment_hash).unwrap();

    let req = test::TestRequest::get()
        .uri("/dead/x")
        .insert_header(credential(&challenge.token, &preimage))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 502);
    assert!(resp.headers().get("www-authenticate").is_none());
    assert_eq!(h.payments.invoices_created(), 1);
}

#[actix_rt::test]
async fn payment_backend_outage_is_service_unavailable() {
    let backend = spawn_backend();
    let h = harness(vec![service("api", "/api", &backend, 100)], None);
    h.payments.set_unavailable(true);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api").to_request()).await;
    assert_eq!(resp.status(), 503);
    assert!(resp.headers().get("www-authenticate").is_none());
}

#[actix_rt::test]
async fn traversal_is_rejected_before_routing() {
    let backend = spawn_backend();
    let h = harness(vec![service("api", "/api", &backend, 0)], None);
    let app = app!(h);

    let req = test::TestRequest::get().uri("/api/%2e%2e/admin").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

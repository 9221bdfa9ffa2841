//! End-to-end dispatch over real HTTP connections.

use axum::http::Method;
use dispatch_core::config::{RestrictionRule, ServerConfig};
use dispatch_core::controllers;
use dispatch_core::dispatch::{DispatchSettings, Dispatcher, Exchange, Outcome, Reply};
use dispatch_core::routing::RouteSpec;
use serde::{Deserialize, Serialize};

mod common;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Greeting {
    name: String,
    visits: u32,
}

fn worker_dispatcher(config: &ServerConfig, worker_id: Option<usize>) -> Dispatcher {
    let dispatcher = Dispatcher::from_config(config, worker_id);

    dispatcher.register(RouteSpec::new("^/hello$").unwrap(), |_ex: Exchange| async {
        Ok(Outcome::respond("Hello, world"))
    });

    dispatcher.register(
        RouteSpec::new("^/greeting/").unwrap().method(Method::GET),
        |ex: Exchange| async move {
            let name = ex.path().trim_start_matches("/greeting/").to_string();
            Ok(Outcome::Respond(Reply::json(&Greeting { name, visits: 1 })?))
        },
    );

    dispatcher.register(
        RouteSpec::new("^/echo$").unwrap().method(Method::POST),
        |ex: Exchange| async move {
            let mut greeting: Greeting = ex.read_body_json().await?;
            greeting.visits += 1;
            Ok(Outcome::Respond(Reply::json(&greeting)?))
        },
    );

    dispatcher.register(RouteSpec::new("^/$").unwrap().priority(100), |_ex: Exchange| async {
        Ok(Outcome::redirect("/hello"))
    });

    controllers::register_builtin(&dispatcher).unwrap();
    dispatcher
}

#[tokio::test]
async fn routes_respond_with_standard_headers() {
    let config = ServerConfig::default();
    let server = common::start_server(config.clone(), worker_dispatcher(&config, Some(3))).await;
    let client = common::client();

    let res = client.get(server.url("/hello")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert_eq!(res.headers()["cluster-id"], "3");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "Hello, world");

    server.stop().await;
}

#[tokio::test]
async fn request_ids_are_propagated() {
    let config = ServerConfig::default();
    let server = common::start_server(config.clone(), worker_dispatcher(&config, None)).await;

    let res = common::client()
        .get(server.url("/hello"))
        .header("x-request-id", "trace-me-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-me-123");
    assert!(!res.headers().contains_key("cluster-id"));

    server.stop().await;
}

#[tokio::test]
async fn json_and_bodies_round_trip() {
    let config = ServerConfig::default();
    let server = common::start_server(config.clone(), worker_dispatcher(&config, None)).await;
    let client = common::client();

    let res = client.get(server.url("/greeting/alice")).send().await.unwrap();
    assert_eq!(res.headers()["content-type"], "application/json");
    let text = res.text().await.unwrap();
    assert!(text.contains("\n    \"name\": \"alice\""), "{}", text);

    let res = client
        .post(server.url("/echo"))
        .json(&Greeting { name: "bob".into(), visits: 4 })
        .send()
        .await
        .unwrap();
    let greeting: Greeting = res.json().await.unwrap();
    assert_eq!(greeting, Greeting { name: "bob".into(), visits: 5 });

    server.stop().await;
}

#[tokio::test]
async fn unmatched_requests_get_marked_404() {
    let config = ServerConfig::default();
    let server = common::start_server(config.clone(), worker_dispatcher(&config, None)).await;
    let client = common::client();

    let res = client.get(server.url("/nowhere")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.headers()["internal-status-code"], "no-route");
    assert_eq!(res.text().await.unwrap(), "");

    // Verb constraint: /echo only takes POST.
    let res = client.get(server.url("/echo")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn internal_redirects_are_invisible_to_clients() {
    let config = ServerConfig::default();
    let server = common::start_server(config.clone(), worker_dispatcher(&config, None)).await;

    let res = common::client().get(server.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.url().path(), "/");
    assert_eq!(res.text().await.unwrap(), "Hello, world");

    server.stop().await;
}

#[tokio::test]
async fn rate_limit_and_restrictions_apply_before_routing() {
    let mut config = ServerConfig::default();
    config.rate_limit.enabled = true;
    config.rate_limit.threshold = 1;
    config.restrictions.rules.push(RestrictionRule {
        pattern: "^/greeting/".into(),
        enabled: false,
        message: "Greetings are paused".into(),
    });

    let server = common::start_server(config.clone(), worker_dispatcher(&config, None)).await;
    let client = common::client();

    let res = client.get(server.url("/greeting/carol")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["reason"], "Route Disabled");
    assert_eq!(body["message"], "Greetings are paused");

    let res = client.get(server.url("/hello")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    let res = client.get(server.url("/hello")).send().await.unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(res.text().await.unwrap(), "Too many requests");

    server.stop().await;
}

#[tokio::test]
async fn builtin_status_route() {
    let server = common::start_server(
        ServerConfig::default(),
        {
            let dispatcher = Dispatcher::new(DispatchSettings::default());
            controllers::register_builtin(&dispatcher).unwrap();
            dispatcher
        },
    )
    .await;

    let status: serde_json::Value = common::client()
        .get(server.url("/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "ok");
    assert_eq!(status["version"], env!("CARGO_PKG_VERSION"));

    server.stop().await;
}

#[tokio::test]
async fn static_site_sits_below_api_routes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>site</html>").unwrap();
    std::fs::write(dir.path().join("logo.svg"), "<svg/>").unwrap();

    let config = ServerConfig::default();
    let dispatcher = worker_dispatcher(&config, None);
    controllers::register_static_site(&dispatcher, dir.path()).unwrap();
    let server = common::start_server(config, dispatcher).await;
    let client = common::client();

    let res = client.get(server.url("/logo.svg")).send().await.unwrap();
    assert_eq!(res.headers()["content-type"], "image/svg+xml");
    assert_eq!(res.text().await.unwrap(), "<svg/>");

    let res = client.get(server.url("/account/settings")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "<html>site</html>");

    // Higher-priority routes still win, and unknown API paths stay 404.
    let res = client.get(server.url("/hello")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "Hello, world");
    let res = client.get(server.url("/api/nothing")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    server.stop().await;
}

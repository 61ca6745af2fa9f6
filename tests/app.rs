use futures::future::BoxFuture;
use hyper::{
    header::{HeaderValue, ALLOW},
    Body, Method, Request, StatusCode,
};
use muxtree::{reply::Reply, *};
use std::net::SocketAddr;

fn text(s: &'static str) -> impl Handler {
    handler_fn(move |_| async move { s })
}

/// Appends `tag` to the request's `x-order` header before calling the next handler.
fn tag(tag: &'static str) -> Middleware {
    mw::from_fn(move |mut req: Request<Body>, next: BoxHandler| {
        (req.headers_mut()).append("x-order", HeaderValue::from_static(tag));
        next.handle(req)
    })
}

/// Replies with the `x-order` tags the request picked up, comma separated.
fn order() -> impl Handler {
    handler_fn(|req: Request<Body>| async move {
        let tags: Vec<_> = (req.headers().get_all("x-order").iter())
            .filter_map(|v| v.to_str().ok())
            .collect();
        tags.join(",")
    })
}

#[tokio::test]
async fn test_param_dispatch() {
    async fn user(req: Request<Body>) -> String {
        let ps = params(&req).unwrap();
        format!("user {} in {}", &ps["id"], &ps["org"])
    }

    let mut app = App::new();
    app.get("/orgs/{org}/users/{id:[0-9]+}", handler_fn(user))
        .unwrap();
    let app = app.test_client();

    let r = app.get("/orgs/acme/users/42").dispatch().await;
    assert_eq!(StatusCode::OK, r.status());
    assert_eq!("user 42 in acme", r.body());

    let r = app.get("/orgs/acme/users/bob").dispatch().await;
    assert_eq!(StatusCode::NOT_FOUND, r.status());
    assert_eq!("404 page not found", r.body());
}

#[tokio::test]
async fn test_params_are_percent_decoded() {
    let mut app = App::new();
    app.get(
        "/files/{name}",
        handler_fn(|req: Request<Body>| async move {
            params(&req).and_then(|ps| ps.get("name")).unwrap_or_default().to_owned()
        }),
    )
    .unwrap();
    let app = app.test_client();

    assert_eq!("a b", app.get("/files/a%20b").dispatch().await.body());
    assert_eq!("caf\u{e9}", app.get("/files/caf%C3%A9").dispatch().await.body());
}

#[tokio::test]
async fn test_method_not_allowed() {
    let mut app = App::new();
    app.get("/thing", text("got"))
        .unwrap()
        .put("/thing", text("put"))
        .unwrap();
    let app = app.test_client();

    assert_eq!("got", app.get("/thing").dispatch().await.body());
    assert_eq!("put", app.put("/thing").dispatch().await.body());

    let r = app.post("/thing").dispatch().await;
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED, r.status());
    assert_eq!("405 method not allowed", r.body());

    let allow = r.headers()[ALLOW].to_str().unwrap();
    assert!(allow.contains("GET"));
    assert!(allow.contains("PUT"));
    assert!(!allow.contains("POST"));
}

#[tokio::test]
async fn test_custom_responders() {
    let mut app = App::new();
    app.get("/thing/{id}", text("got")).unwrap();
    app.not_found(text("nothing here"));
    app.method_not_allowed(handler_fn(|req: Request<Body>| async move {
        let route = current_route(&req).unwrap().pattern().to_owned();
        let allowed = allowed_methods(&req).unwrap().join("|");
        format!("{} only takes {}", route, allowed).with_status(StatusCode::METHOD_NOT_ALLOWED)
    }));
    let app = app.test_client();

    let r = app.get("/nope").dispatch().await;
    assert_eq!(StatusCode::OK, r.status());
    assert_eq!("nothing here", r.body());

    let r = app.delete("/thing/7").dispatch().await;
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED, r.status());
    assert_eq!("/thing/{id} only takes GET", r.body());
}

#[tokio::test]
async fn test_methods_filter_and_any() {
    let mut app = App::new();
    app.methods(["post", "PATCH"])
        .handle("/write", text("wrote"))
        .unwrap()
        .handle("/anything", text("any"))
        .unwrap()
        .any("/also-anything", text("also any"))
        .unwrap();
    let app = app.test_client();

    assert_eq!("wrote", app.post("/write").dispatch().await.body());
    assert_eq!("wrote", app.patch("/write").dispatch().await.body());
    assert_eq!(
        StatusCode::METHOD_NOT_ALLOWED,
        app.get("/write").dispatch().await.status()
    );

    for m in vec![Method::GET, Method::DELETE, Method::from_bytes(b"PURGE").unwrap()] {
        assert_eq!("any", app.call(m.clone(), "/anything").dispatch().await.body());
        assert_eq!("also any", app.call(m, "/also-anything").dispatch().await.body());
    }
}

#[tokio::test]
async fn test_current_route_is_normalized_pattern() {
    let mut app = App::new();
    app.get(
        "//docs/:section//{page:[a-z]+}/",
        handler_fn(|req: Request<Body>| async move {
            current_route(&req).unwrap().pattern().to_owned()
        }),
    )
    .unwrap();
    let app = app.test_client();

    let r = app.get("/docs/guide/intro/").dispatch().await;
    assert_eq!("/docs/{section}/{page:[a-z]+}", r.body());
}

#[tokio::test]
async fn test_middleware_order() {
    let mut app = App::new();
    app.with(tag("a")).with(tag("b"));
    app.get("/", order()).unwrap();
    let app = app.test_client();

    assert_eq!("a,b", app.get("/").dispatch().await.body());
}

#[tokio::test]
async fn test_group_middleware_is_a_snapshot() {
    let mut app = App::new();
    app.with(tag("root"));

    let mut api = app.group("/api");
    api.with(tag("api"));
    api.get("/ping", order()).unwrap();

    // added after the group was opened, so only later root routes see it
    app.with(tag("late"));
    app.get("/ping", order()).unwrap();

    let mut v2 = app.group("/api/v2");
    v2.get("/ping", order()).unwrap();

    let app = app.test_client();
    assert_eq!("root,api", app.get("/api/ping").dispatch().await.body());
    assert_eq!("root,late", app.get("/ping").dispatch().await.body());
    assert_eq!("root,late", app.get("/api/v2/ping").dispatch().await.body());
}

#[tokio::test]
async fn test_route_middleware_wraps_every_method() {
    let mut app = App::new();
    app.with(tag("scope"));
    app.register("GET", "/r", order(), vec![tag("route")]).unwrap();
    app.register("POST", "/r", order(), None).unwrap();
    app.get("/plain", order()).unwrap();
    let app = app.test_client();

    assert_eq!("route,scope", app.get("/r").dispatch().await.body());
    assert_eq!("route,scope", app.post("/r").dispatch().await.body());
    assert_eq!("scope", app.get("/plain").dispatch().await.body());
}

#[tokio::test]
async fn test_panics_become_internal_errors() {
    struct Explode;

    impl Handler for Explode {
        fn handle(&self, _: Request<Body>) -> BoxFuture<'static, Response> {
            panic!("exploded before polling")
        }
    }

    async fn explode(_: Request<Body>) -> &'static str {
        panic!("exploded while polling")
    }

    let mut app = App::new();
    app.get("/sync", Explode).unwrap();
    app.get("/async", handler_fn(explode)).unwrap();
    app.get("/fine", text("fine")).unwrap();
    let app = app.test_client();

    for path in &["/sync", "/async"] {
        let r = app.get(path).dispatch().await;
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, r.status());
        assert_eq!("500 internal server error", r.body());
    }

    assert_eq!("fine", app.get("/fine").dispatch().await.body());
}

#[tokio::test]
async fn test_custom_recover() {
    let mut app = App::new();
    app.get(
        "/boom",
        handler_fn(|_| async {
            let v: Vec<u8> = Vec::new();
            v[3].to_string()
        }),
    )
    .unwrap();
    app.internal_error(|fault: HandlerFault| {
        if fault.message.contains("index out of bounds") {
            "bad index".with_status(StatusCode::SERVICE_UNAVAILABLE)
        } else {
            fault.message.with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    });
    let app = app.test_client();

    let r = app.get("/boom").dispatch().await;
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE, r.status());
    assert_eq!("bad index", r.body());
}

#[tokio::test]
async fn test_recover_sees_request_head() {
    async fn fail(msg: &'static str) -> &'static str {
        panic!("{}", msg)
    }

    let mut app = App::new();
    app.post("/jobs/{id}", handler_fn(|_| fail("job failed")))
        .unwrap();
    app.not_found(handler_fn(|_| fail("no route")));
    app.internal_error(|fault: HandlerFault| {
        let route = fault.route.map(|r| r.pattern().to_owned());
        let target = fault.uri.path_and_query().map(|pq| pq.as_str().to_owned());
        format!(
            "{} {} {} {}",
            fault.method,
            target.as_deref().unwrap_or("-"),
            route.as_deref().unwrap_or("-"),
            fault.message,
        )
        .with_status(StatusCode::INTERNAL_SERVER_ERROR)
    });
    let app = app.test_client();

    let r = app.post("/jobs/7?retry=1").dispatch().await;
    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, r.status());
    assert_eq!("POST /jobs/7?retry=1 /jobs/{id} job failed", r.body());

    let r = app.get("/elsewhere").dispatch().await;
    assert_eq!("GET /elsewhere - no route", r.body());
}

#[tokio::test]
async fn test_remote_addr_is_available() {
    let mut app = App::new();
    app.get(
        "/whoami",
        handler_fn(|req: Request<Body>| async move {
            match req.extensions().get::<SocketAddr>() {
                Some(addr) => addr.to_string(),
                None => "unknown".to_owned(),
            }
        }),
    )
    .unwrap();
    let app = app.test_client();

    assert_eq!("127.0.0.1:4321", app.get("/whoami").dispatch().await.body());
}

#[tokio::test]
async fn test_json_round_trip() {
    #[derive(serde::Deserialize, serde::Serialize, Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    let mut app = App::new();
    app.post(
        "/flip",
        handler_fn(|req: Request<Body>| async move {
            let raw = hyper::body::to_bytes(req.into_body()).await.unwrap();
            let p: Point = serde_json::from_slice(&raw).unwrap();
            reply::json(&Point { x: p.y, y: p.x })
        }),
    )
    .unwrap();
    let app = app.test_client();

    let r = app
        .post("/flip")
        .body_json(&Point { x: 1, y: 2 })
        .dispatch_json::<Point>()
        .await;
    assert_eq!(&Point { x: 2, y: 1 }, r.body());
}

#[tokio::test]
async fn test_live_registration() {
    let mut app = App::new();
    app.get("/early", text("early")).unwrap();

    let live = std::sync::Arc::new(app.into_live());
    let client = live.test_client();

    assert_eq!("early", client.get("/early").dispatch().await.body());
    assert_eq!(
        StatusCode::NOT_FOUND,
        client.get("/late").dispatch().await.status()
    );

    live.register("GET", "/late", text("late"), None).unwrap();

    assert_eq!("late", client.get("/late").dispatch().await.body());
    assert_eq!("early", client.get("/early").dispatch().await.body());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch() {
    let mut app = App::new();
    app.get(
        "/n/{n:[0-9]+}",
        handler_fn(|req: Request<Body>| async move {
            let n: u64 = params(&req).unwrap()["n"].parse().unwrap();
            tokio::task::yield_now().await;
            (n * 2).to_string()
        }),
    )
    .unwrap();
    app.get("/n/*rest", text("rest")).unwrap();
    let client = app.test_client();

    let tasks: Vec<_> = (0..256u64)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    let r = client.get(&format!("/n/{}", i)).dispatch().await;
                    assert_eq!((i * 2).to_string(), *r.body());
                } else {
                    let r = client.get(&format!("/n/x{}/y", i)).dispatch().await;
                    // the constrained param rejects, and lookup never falls back
                    assert_eq!(StatusCode::NOT_FOUND, r.status());
                }
            })
        })
        .collect();

    for t in tasks {
        t.await.unwrap();
    }
}

#[test]
fn test_registration_errors_surface() {
    let mut app = App::new();
    app.get("/a/{id}", text("")).unwrap();

    assert!(matches!(
        app.get("/a/{name}", text("")),
        Err(RouteError::ConflictingParam { .. })
    ));
    assert!(matches!(
        app.get("/b/{id:(}", text("")),
        Err(RouteError::InvalidRegex { .. })
    ));
    assert!(matches!(app.get("", text("")), Err(RouteError::EmptyPattern)));
}

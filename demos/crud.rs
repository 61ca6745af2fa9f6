//! A simple json CRUD api.
use hyper::{body::to_bytes, server::Server, Body, Request, StatusCode};
use muxtree::{
    handler_fn, mw, params,
    reply::{self, Reply},
    App, Response,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct Db(Arc<Mutex<Store>>);

#[derive(Default)]
struct Store {
    id_gen: u64,
    entries: BTreeMap<u64, Widget>,
}

impl Store {
    fn gen_id(&mut self) -> u64 {
        self.id_gen += 1;
        self.id_gen
    }
}

#[derive(Serialize)]
struct Widget {
    id: u64,
    name: String,
    desc: String,
    count: u32,
}

#[derive(Deserialize)]
struct NewWidget {
    name: String,
    desc: String,
    count: u32,
}

#[derive(Deserialize)]
struct WidgetPatch {
    name: Option<String>,
    desc: Option<String>,
    count: Option<u32>,
}

fn missing_widget(id: u64) -> Response {
    reply::json(&json!({ "error": format!("could not find widget {}", id) }))
        .with_status(StatusCode::NOT_FOUND)
}

fn widget_id(req: &Request<Body>) -> u64 {
    // the route constrains the id to digits
    (params(req).and_then(|ps| ps.get("id")))
        .and_then(|id| id.parse().ok())
        .unwrap_or_default()
}

async fn body_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Response> {
    let raw = (to_bytes(req.into_body()).await)
        .map_err(|e| format!("failed to read body: {}", e).with_status(StatusCode::BAD_REQUEST))?;

    serde_json::from_slice(&raw)
        .map_err(|e| format!("failed to parse body: {}", e).with_status(StatusCode::BAD_REQUEST))
}

async fn new(db: Db, req: Request<Body>) -> Result<Response, Response> {
    let NewWidget { name, desc, count } = body_json(req).await?;
    let mut db = db.0.lock().await;

    let id = db.gen_id();

    let entry = db.entries.entry(id).or_insert(Widget {
        id,
        name,
        desc,
        count,
    });

    Ok(reply::json(entry).with_status(StatusCode::CREATED))
}

async fn list(db: Db) -> Response {
    let db = db.0.lock().await;

    let widgets: Vec<_> = db.entries.values().collect();

    reply::json(&json!({ "widgets": widgets }))
}

async fn get(db: Db, id: u64) -> Response {
    match db.0.lock().await.entries.get(&id) {
        Some(widget) => reply::json(widget),
        None => missing_widget(id),
    }
}

async fn update(db: Db, id: u64, req: Request<Body>) -> Result<Response, Response> {
    let patch: WidgetPatch = body_json(req).await?;

    match db.0.lock().await.entries.get_mut(&id) {
        Some(widget) => {
            if let Some(name) = patch.name {
                widget.name = name;
            }
            if let Some(desc) = patch.desc {
                widget.desc = desc;
            }
            if let Some(count) = patch.count {
                widget.count = count;
            }

            Ok(reply::json(widget))
        }

        None => Ok(missing_widget(id)),
    }
}

async fn delete(db: Db, id: u64) -> Response {
    match db.0.lock().await.entries.remove(&id) {
        Some(widget) => reply::json(&widget),
        None => missing_widget(id),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().init();

    let db = Db::default();
    let mut app = App::new();
    app.with(mw::trace());

    let mut widgets = app.group("/widgets");

    // POST /widgets/new {"name": "blabla", "desc": "a widget", "count": 4}
    let cx = db.clone();
    widgets.post(
        "/new",
        handler_fn(move |req| new(cx.clone(), req)),
    )?;

    // GET /widgets
    let cx = db.clone();
    widgets.get("/", handler_fn(move |_| list(cx.clone())))?;

    // GET /widgets/:id
    let cx = db.clone();
    widgets.get(
        "/{id:[0-9]+}",
        handler_fn(move |req| get(cx.clone(), widget_id(&req))),
    )?;

    // PATCH /widgets/:id {"name": "blabla", "desc": null, "count": 40}
    let cx = db.clone();
    widgets.patch(
        "/{id:[0-9]+}",
        handler_fn(move |req| update(cx.clone(), widget_id(&req), req)),
    )?;

    // DELETE /widgets/:id
    let cx = db;
    widgets.delete(
        "/{id:[0-9]+}",
        handler_fn(move |req| delete(cx.clone(), widget_id(&req))),
    )?;

    Server::bind(&([127, 0, 0, 1], 8080).into())
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

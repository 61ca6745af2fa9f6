//! A simple api that does some math.
use hyper::{server::Server, Body, Request, StatusCode};
use muxtree::{handler_fn, mw, params, reply::Reply, App, Response};

async fn calc(req: Request<Body>) -> Response {
    let ps = match params(&req) {
        Some(ps) => ps,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    let (a, b) = match (ps["a"].parse::<f64>(), ps["b"].parse::<f64>()) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return "operands must be numbers\n".with_status(StatusCode::BAD_REQUEST),
    };

    let out = match &ps["op"] {
        "add" => a + b,
        "sub" => a - b,
        "mul" => a * b,
        _ => a / b,
    };

    format!("{}\n", out).into_response()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().init();

    let mut app = App::new();
    app.with(mw::trace());
    // GET /add/1/2
    app.get("/{op:add|sub|mul|div}/{a}/{b}", handler_fn(calc))?;

    Server::bind(&([127, 0, 0, 1], 8080).into())
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

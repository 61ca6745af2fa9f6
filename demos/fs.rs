//! A static fileserver.
use hyper::server::Server;
use muxtree::{mw, reply, App};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut app = App::new();
    app.with(mw::trace());
    app.get("/static/*path", reply::filesystem("./demos").param("path"))?;
    app.not_found(reply::filesystem("."));

    Server::bind(&([127, 0, 0, 1], 8080).into())
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

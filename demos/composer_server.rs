//! Streaming composer demo
//!
//! Starts two tiny fragment upstreams and a composer in front of them, then
//! serves the assembled page.
//!
//! Run with: cargo run --example composer_server
//! Then open: http://localhost:3000

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use weave_axum_http::{Composer, ComposerConfig, StaticTemplates};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let header = Router::new().route(
        "/header",
        get(|| async { "<header><h1>Streaming storefront</h1></header>" }),
    );
    let products = Router::new().route(
        "/products",
        get(|| async {
            // A slow fragment: the shell and header still stream immediately.
            tokio::time::sleep(Duration::from_millis(800)).await;
            "<ul><li>Widget</li><li>Gadget</li></ul>"
        }),
    );

    let header_addr = serve_on("127.0.0.1:3001", header).await;
    let products_addr = serve_on("127.0.0.1:3002", products).await;

    let mut templates = StaticTemplates::new();
    templates.insert(
        "/",
        format!(
            "<html><head><title>demo</title></head><body>\
             <fragment src=\"http://{header_addr}/header\"></fragment>\
             <fragment async src=\"http://{products_addr}/products\"></fragment>\
             </body></html>"
        ),
    );

    let composer = Arc::new(Composer::new(ComposerConfig::default(), Arc::new(templates)));

    println!("Streaming Composer Demo");
    println!("=======================\n");
    println!("Fragments on http://{header_addr} and http://{products_addr}");
    println!("Composed page on http://localhost:3000");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
    axum::serve(listener, composer.router()).await.unwrap();
}

async fn serve_on(addr: &str, router: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

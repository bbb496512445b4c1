//! End-to-end composition scenarios against live upstreams.
//!
//! Each test spins real fragment endpoints on `127.0.0.1:0` and asserts on
//! the literal bytes the composer streams back.

use axum::body::Body;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::{header, HeaderMap, Request, StatusCode};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use weave_axum_http::{Composer, ComposerConfig, StaticTemplates};

async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn composer_for(template: String) -> Composer {
    composer_with(ComposerConfig::default(), template)
}

fn composer_with(config: ComposerConfig, template: String) -> Composer {
    let mut templates = StaticTemplates::new();
    templates.insert("/", template);
    Composer::new(config, Arc::new(templates))
}

async fn compose(composer: &Composer) -> (StatusCode, HeaderMap, String) {
    let request = Request::builder()
        .uri("/")
        .header("host", "composer.local")
        .body(Body::empty())
        .unwrap();
    let response = composer.serve_request(request).await;
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn two_sync_fragments_stream_in_document_order() {
    let app = Router::new()
        .route("/1", get(|| async { "hello" }))
        .route("/2", get(|| async { "world" }));
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!(
        "<fragment src=\"http://{addr}/1\"/><fragment src=\"http://{addr}/2\"/>"
    ));
    let (status, _, body) = compose(&composer).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "<html><head></head><body>\
         <script data-pipe>p.start(0)</script>hello<script data-pipe>p.end(0)</script>\
         <script data-pipe>p.start(1)</script>world<script data-pipe>p.end(1)</script>\
         </body></html>"
    );
}

#[tokio::test]
async fn async_fragment_drains_after_body() {
    let app = Router::new().route("/1", get(|| async { "hello" }));
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!("<fragment async src=\"http://{addr}/1\"/>"));
    let (status, _, body) = compose(&composer).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "<html><head></head><body>\
         <script data-pipe>p.placeholder(0)</script>\
         <script data-pipe>p.start(0)</script>hello<script data-pipe>p.end(0)</script>\
         </body></html>"
    );
}

#[tokio::test]
async fn first_primary_redirect_propagates_status_and_location() {
    let app = Router::new()
        .route("/first", get(|| async { "first" }))
        .route(
            "/redirect",
            get(|| async {
                (
                    StatusCode::MULTIPLE_CHOICES,
                    [(header::LOCATION, "https://redirect")],
                    "choose",
                )
            }),
        )
        .route(
            "/bad",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!(
        "<fragment src=\"http://{addr}/first\"/>\
         <fragment primary src=\"http://{addr}/redirect\"/>\
         <fragment primary src=\"http://{addr}/bad\"/>"
    ));
    let (status, headers, body) = compose(&composer).await;

    assert_eq!(status, StatusCode::MULTIPLE_CHOICES);
    assert_eq!(headers.get("location").unwrap(), "https://redirect");
    // The redirecting primary's body still streams.
    assert!(body.contains("<script data-pipe>p.start(1)</script>choose"));
    // The later failing primary is ignored for status and collapses.
    assert!(body.contains("<script data-pipe>p.start(2)</script><script data-pipe>p.end(2)</script>"));
}

#[tokio::test]
async fn primary_timeout_fails_the_request() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "late"
        }),
    );
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!(
        "<fragment primary timeout=\"100\" src=\"http://{addr}/slow\"/>"
    ));
    let (status, _, body) = compose(&composer).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error");
}

#[tokio::test]
async fn failed_fragment_uses_fallback() {
    let app = Router::new()
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/backup", get(|| async { "Fallback" }));
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!(
        "<fragment src=\"http://{addr}/broken\" fallback-src=\"http://{addr}/backup\"/>"
    ));
    let (status, _, body) = compose(&composer).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<script data-pipe>p.start(0)</script>Fallback<script data-pipe>p.end(0)</script>"));
}

#[tokio::test]
async fn non_primary_failure_collapses_region() {
    let app = Router::new()
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/ok", get(|| async { "fine" }));
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!(
        "<fragment src=\"http://{addr}/broken\"/><fragment src=\"http://{addr}/ok\"/>"
    ));
    let (status, _, body) = compose(&composer).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "<html><head></head><body>\
         <script data-pipe>p.start(0)</script><script data-pipe>p.end(0)</script>\
         <script data-pipe>p.start(1)</script>fine<script data-pipe>p.end(1)</script>\
         </body></html>"
    );
}

#[tokio::test]
async fn three_fragment_scripts_nest_hooks() {
    let app = Router::new().route(
        "/assets",
        get(|| async {
            (
                [(
                    header::LINK,
                    "<http://assets.local/1.js>; rel=\"fragment-script\", \
                     <http://assets.local/2.js>; rel=\"fragment-script\", \
                     <http://assets.local/3.js>; rel=\"fragment-script\"",
                )],
                "BODY",
            )
        }),
    );
    let addr = spawn_upstream(app).await;

    let config = ComposerConfig {
        max_asset_links: 3,
        ..Default::default()
    };
    let composer = composer_with(config, format!("<fragment src=\"http://{addr}/assets\"/>"));
    let (_, _, body) = compose(&composer).await;

    assert_eq!(
        body,
        "<html><head></head><body>\
         <script data-pipe>p.start(0, \"http://assets.local/1.js\", {\"id\":0,\"range\":[0,2]})</script>\
         <script data-pipe>p.start(1, \"http://assets.local/2.js\", {\"id\":0,\"range\":[0,2]})</script>\
         <script data-pipe>p.start(2, \"http://assets.local/3.js\", {\"id\":0,\"range\":[0,2]})</script>\
         BODY\
         <script data-pipe>p.end(2, \"http://assets.local/3.js\", {\"id\":0,\"range\":[0,2]})</script>\
         <script data-pipe>p.end(1, \"http://assets.local/2.js\", {\"id\":0,\"range\":[0,2]})</script>\
         <script data-pipe>p.end(0, \"http://assets.local/1.js\", {\"id\":0,\"range\":[0,2]})</script>\
         </body></html>"
    );
}

#[tokio::test]
async fn gzip_fragment_is_decoded_for_the_client() {
    let app = Router::new().route(
        "/zip",
        get(|| async {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(b"GZIPPED").unwrap();
            let compressed = encoder.finish().unwrap();
            ([(header::CONTENT_ENCODING, "gzip")], compressed).into_response()
        }),
    );
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!("<fragment src=\"http://{addr}/zip\"/>"));
    let (_, _, body) = compose(&composer).await;

    assert!(body.contains("<script data-pipe>p.start(0)</script>GZIPPED<script data-pipe>p.end(0)</script>"));
}

#[tokio::test]
async fn slot_content_lands_in_head() {
    let mut templates = StaticTemplates::new();
    templates.insert_with_child(
        "/",
        "<html><head><script type=\"slot\" name=\"head\"></script></head><body>content</body></html>",
        "<meta slot=\"head\" charset=\"utf-8\">",
    );
    let composer = Composer::new(ComposerConfig::default(), Arc::new(templates));
    let (status, _, body) = compose(&composer).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "<html><head><meta slot=\"head\" charset=\"utf-8\"></head><body>content</body></html>"
    );
}

#[tokio::test]
async fn async_fragment_stylesheet_loads_inline() {
    let app = Router::new().route(
        "/styled",
        get(|| async {
            (
                [(header::LINK, "<http://assets.local/f.css>; rel=\"stylesheet\"")],
                "styled",
            )
        }),
    );
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!("<fragment async src=\"http://{addr}/styled\"/>"));
    let (_, _, body) = compose(&composer).await;

    assert_eq!(
        body,
        "<html><head></head><body>\
         <script>p.loadCSS(\"http://assets.local/f.css\")</script>\
         <script data-pipe>p.placeholder(0)</script>\
         <script data-pipe>p.start(0)</script>styled<script data-pipe>p.end(0)</script>\
         </body></html>"
    );
}

#[tokio::test]
async fn cache_headers_are_fixed() {
    let app = Router::new().route("/1", get(|| async { "x" }));
    let addr = spawn_upstream(app).await;

    let composer = composer_for(format!("<fragment src=\"http://{addr}/1\"/>"));
    let (_, headers, _) = compose(&composer).await;

    assert_eq!(
        headers.get("cache-control").unwrap(),
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(headers.get("pragma").unwrap(), "no-cache");
    assert_eq!(headers.get("content-type").unwrap(), "text/html");
}

#[tokio::test]
async fn preload_link_header_only_with_external_loader() {
    let app = Router::new().route("/1", get(|| async { "x" }));
    let addr = spawn_upstream(app).await;
    let template = format!("<fragment src=\"http://{addr}/1\"/>");

    let external = ComposerConfig {
        amd_loader_url: Some("http://cdn.local/loader.js".to_string()),
        ..Default::default()
    };
    let composer = composer_with(external, template.clone());
    let (_, headers, body) = compose(&composer).await;
    assert_eq!(
        headers.get("link").unwrap(),
        "<http://cdn.local/loader.js>; rel=\"preload\"; as=\"script\"; nopush; crossorigin"
    );
    assert!(body.contains("<script src=\"http://cdn.local/loader.js\"></script>"));

    let inlined = ComposerConfig {
        amd_loader_url: Some("http://cdn.local/loader.js".to_string()),
        pipe_definition: Some("var p=window.pipe;".into()),
        ..Default::default()
    };
    let composer = composer_with(inlined, template);
    let (_, headers, body) = compose(&composer).await;
    assert!(headers.get("link").is_none());
    assert!(body.contains("<script>var p=window.pipe;</script>"));
}

#[tokio::test]
async fn composed_page_serves_over_http() {
    let app = Router::new().route("/1", get(|| async { "served" }));
    let addr = spawn_upstream(app).await;

    let composer = Arc::new(composer_for(format!("<fragment src=\"http://{addr}/1\"/>")));
    let composer_addr = spawn_upstream(composer.router()).await;

    let response = reqwest::get(format!("http://{composer_addr}/")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("<script data-pipe>p.start(0)</script>served"));
}

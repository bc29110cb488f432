use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use site_scraper::config::FetchConfig;
use site_scraper::pipeline::Pipeline;
use site_scraper::registry::RegistryHandle;
use site_scraper::server::{create_router, AppState};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

fn config_for(page: &Path) -> String {
    format!(
        r#"
[[profiles]]
name = "products"
description = "Product rows"
source = "{}"
record = "tr.product"

[[profiles.fields]]
name = "name"
selector = "td.name"

[[profiles.fields]]
name = "category"
selector = "td.category"

[[profiles.fields]]
name = "price"
selector = "td.price"

[[profiles.schema]]
name = "name"
required = true

[[profiles.schema]]
name = "category"

[[profiles.schema]]
name = "price"
type = "number"
required = true
"#,
        page.display()
    )
}

const PAGE: &str = r#"<table>
<tr class="product"><td class="name">Attieke</td><td class="category">food</td><td class="price">500</td></tr>
<tr class="product"><td class="name">Pagne</td><td class="category">textile</td><td class="price">4500</td></tr>
<tr class="product"><td class="name">Garba</td><td class="category">food</td><td class="price">1 000</td></tr>
</table>"#;

/// Router over a config file and product page in a fresh temp dir
fn app() -> Result<(Router, TempDir)> {
    let dir = tempdir()?;
    let page = dir.path().join("products.html");
    fs::write(&page, PAGE)?;
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, config_for(&page))?;

    let state = AppState {
        registry: Arc::new(RegistryHandle::load(&config_path)?),
        pipeline: Arc::new(Pipeline::from_config(&FetchConfig::default())?),
        metrics: None,
    };
    Ok((create_router(state), dir))
}

async fn body_json(response: axum::response::Response) -> Result<serde_json::Value> {
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn post_json(uri: &str, body: serde_json::Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}

#[tokio::test]
async fn test_health_and_profiles() -> Result<()> {
    let (app, _dir) = app()?;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["status"], "healthy");

    let response = app
        .oneshot(Request::builder().uri("/profiles").body(Body::empty())?)
        .await?;
    let profiles = body_json(response).await?;
    assert_eq!(profiles[0]["name"], "products");
    assert_eq!(
        profiles[0]["fields"],
        serde_json::json!(["name", "category", "price"])
    );
    Ok(())
}

#[tokio::test]
async fn test_harvest_returns_table_and_failures() -> Result<()> {
    let (app, _dir) = app()?;
    let request = post_json(
        "/harvest",
        serde_json::json!({
            "profile": "products",
            "group_by": ["category"],
            "summaries": {"price": "sum"}
        }),
    )?;

    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await?;
    assert_eq!(outcome["accepted"], 2);
    assert_eq!(outcome["rejected"], 1);
    assert_eq!(outcome["failures"][0]["errors"][0]["field"], "price");
    assert_eq!(outcome["failures"][0]["errors"][0]["kind"], "invalid_type");
    assert_eq!(outcome["table"]["groups"][0]["key"]["category"], "food");
    assert_eq!(outcome["table"]["groups"][0]["summaries"]["price_sum"], 500.0);
    assert_eq!(outcome["table"]["groups"][1]["key"]["category"], "textile");
    Ok(())
}

#[tokio::test]
async fn test_harvest_as_csv() -> Result<()> {
    let (app, _dir) = app()?;
    let request = post_json(
        "/harvest?format=csv",
        serde_json::json!({"profile": "products", "columns": ["name", "price"]}),
    )?;

    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/csv; charset=utf-8"
    );
    let body = hyper::body::to_bytes(response.into_body()).await?;
    assert_eq!(
        std::str::from_utf8(&body)?,
        "name,price\nAttieke,500\nPagne,4500\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_error_status_mapping() -> Result<()> {
    let (app, dir) = app()?;

    let cases = [
        (serde_json::json!({"profile": "nope"}), StatusCode::BAD_REQUEST, "unknown_profile"),
        (
            serde_json::json!({"profile": "products", "group_by": ["colour"]}),
            StatusCode::BAD_REQUEST,
            "invalid_aggregation",
        ),
        (
            serde_json::json!({"profile": "products", "source": "ftp://example.com/x"}),
            StatusCode::BAD_REQUEST,
            "invalid_source",
        ),
        (
            serde_json::json!({
                "profile": "products",
                "source": dir.path().join("absent.html").display().to_string()
            }),
            StatusCode::BAD_GATEWAY,
            "fetch_failed",
        ),
    ];

    for (body, status, kind) in cases {
        let response = app.clone().oneshot(post_json("/harvest", body)?).await?;
        assert_eq!(response.status(), status);
        assert_eq!(body_json(response).await?["error"], kind);
    }
    Ok(())
}

#[tokio::test]
async fn test_undecodable_page_is_unprocessable() -> Result<()> {
    let (app, dir) = app()?;
    let bad = dir.path().join("bad.html");
    fs::write(&bad, [0x3c, 0x70, 0x3e, 0xff, 0xfe, 0xfd])?;

    let response = app
        .oneshot(post_json(
            "/harvest",
            serde_json::json!({"profile": "products", "source": bad.display().to_string()}),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn test_metrics_without_recorder() -> Result<()> {
    let (app, _dir) = app()?;
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_admin_reload() -> Result<()> {
    let (app, dir) = app()?;
    let config_path = dir.path().join("config.toml");

    let response = app
        .clone()
        .oneshot(post_json("/admin/reload", serde_json::json!({}))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "reloaded");
    assert_eq!(body["profiles"], 1);

    fs::write(&config_path, "[[profiles]]\nname = \"broken\"\nrecord = \"div[\"\n")?;
    let response = app
        .clone()
        .oneshot(post_json("/admin/reload", serde_json::json!({}))?)
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await?["error"], "reload_failed");

    // the old profile keeps serving
    let response = app
        .oneshot(Request::builder().uri("/profiles").body(Body::empty())?)
        .await?;
    assert_eq!(body_json(response).await?[0]["name"], "products");
    Ok(())
}

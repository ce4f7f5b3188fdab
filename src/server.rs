//! HTTP read path: republish each merged feed as RSS.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::rss::render_rss;
use crate::storage::Database;

pub fn router(db: Database) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/rss/:name", get(serve_rss))
        .with_state(db)
}

/// Plain index of configured feeds linking to their RSS documents.
async fn index(State(db): State<Database>) -> Result<Html<String>, StatusCode> {
    let names = db.feed_names().await.map_err(|error| {
        tracing::error!(error = %error, "failed to list feeds");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut body = String::from("<!DOCTYPE html><html><body><h1>Feeds</h1><ul>");
    for name in names {
        body.push_str(&format!("<li><a href=\"/rss/{name}\">{name}</a></li>"));
    }
    body.push_str("</ul></body></html>");
    Ok(Html(body))
}

async fn serve_rss(State(db): State<Database>, Path(name): Path<String>) -> Response {
    let feed = match db.load_feed(&name).await {
        Ok(Some(feed)) => feed,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(error) => {
            tracing::error!(feed = %name, error = %error, "failed to load feed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // The configured image is already an absolute URL; it doubles as the
    // resolved channel image.
    match render_rss(&feed, &feed.image) {
        Ok(xml) => (
            [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            xml,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(feed = %name, error = %error, "failed to render feed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

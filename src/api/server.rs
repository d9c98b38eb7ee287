use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::handlers::{notification_page, PageState};

/// Build the notification page router.
///
/// Only `/` is served; everything else falls through to axum's 404.
pub fn build_router(page: Arc<PageState>) -> Router {
    Router::new()
        .route("/", get(notification_page))
        .layer(TraceLayer::new_for_http())
        .with_state(page)
}

/// Serve the notification page on an already bound listener.
///
/// The listener is accepting by the time this returns; the server task runs
/// for the rest of the process.
pub fn spawn_server(listener: TcpListener, page: Arc<PageState>) -> std::io::Result<SocketAddr> {
    let addr = listener.local_addr()?;
    let app = build_router(page);

    tokio::spawn(async move {
        tracing::info!("Notification page listening on {}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(addr = %addr, error = %e, "Notification server stopped");
        }
    });

    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SERVER_ID;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<PageState>) {
        let page = Arc::new(PageState::new("Test reminder", None));
        (build_router(Arc::clone(&page)), page)
    }

    #[tokio::test]
    async fn test_index_serves_page() {
        let (app, page) = create_test_app();
        page.set_body("disk full");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::SERVER], SERVER_ID);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("disk full"));
        assert!(html.contains("Test reminder"));
    }

    #[tokio::test]
    async fn test_query_string_is_ignored() {
        let (app, page) = create_test_app();
        page.set_body("disk full");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?body=other")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("disk full"));
        assert!(!html.contains("other"));
    }

    #[tokio::test]
    async fn test_other_paths_not_found() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/favicon.ico")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

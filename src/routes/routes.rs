//! Defines routes for the image API.
//!
//! ## Structure
//! - `GET    /`                            API status
//! - `GET    /healthz`, `GET /readyz`       probes
//! - `POST   /api/images/upload`            upload a new image (multipart `image`)
//! - `GET    /api/images`                   list all records
//! - `GET    /api/images/{id}`              fetch one record
//! - `PUT    /api/images/{id}`              replace the stored file
//! - `DELETE /api/images/{id}`              delete object and record
//! - `GET    /api/images/{id}/download`     stream the stored file

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{
            api_status, delete_image, download_image, get_image, list_images, update_image,
            upload_image,
        },
    },
    services::image_service::ImageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router for all routes. Handlers share `ImageService` as state.
pub fn routes() -> Router<ImageService> {
    Router::new()
        .route("/", get(api_status))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/images", image_routes())
}

fn image_routes() -> Router<ImageService> {
    Router::new()
        .route("/", get(list_images))
        .route("/upload", post(upload_image))
        .route(
            "/{id}",
            get(get_image).put(update_image).delete(delete_image),
        )
        .route("/{id}/download", get(download_image))
}

/// The complete application: routes, upload size limit, request tracing.
pub fn app(service: ImageService, max_upload_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

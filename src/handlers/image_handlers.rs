//! HTTP handlers for image records.
//! Uploads arrive as multipart forms with a single `image` file field;
//! downloads stream the object body straight from the store.

use crate::{
    errors::AppError,
    models::image::ImageRecord,
    services::image_service::{ImageError, ImageService, UploadedFile},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "image";

#[derive(Serialize)]
struct ImageEnvelope {
    message: &'static str,
    image: ImageRecord,
}

#[derive(Serialize)]
struct ImageList {
    message: &'static str,
    total: usize,
    images: Vec<ImageRecord>,
}

/// Pull the first `image` part that carries a filename out of the form.
///
/// A request that is not multipart at all, or has no such part, yields
/// `None`; the service turns that into a 400.
async fn read_image_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Option<UploadedFile>, AppError> {
    let Ok(mut multipart) = multipart else {
        return Ok(None);
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;

        return Ok(Some(UploadedFile {
            file_name,
            content_type,
            bytes,
        }));
    }

    Ok(None)
}

/// `GET /`
pub async fn api_status() -> impl IntoResponse {
    Json(json!({ "message": "API is running..." }))
}

/// `POST /api/images/upload`
pub async fn upload_image(
    State(service): State<ImageService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let file = read_image_field(multipart).await?;
    let image = service.create(file).await?;

    Ok((
        StatusCode::CREATED,
        Json(ImageEnvelope {
            message: "Image uploaded successfully",
            image,
        }),
    ))
}

/// `GET /api/images`
pub async fn list_images(
    State(service): State<ImageService>,
) -> Result<impl IntoResponse, AppError> {
    let images = service.list().await?;

    Ok(Json(ImageList {
        message: "Images fetched successfully",
        total: images.len(),
        images,
    }))
}

/// `GET /api/images/{id}`
pub async fn get_image(
    State(service): State<ImageService>,
    Path(id): Path<String>,
) -> Result<Json<ImageRecord>, AppError> {
    Ok(Json(service.find(&id).await?))
}

/// `PUT /api/images/{id}`: replace the stored file.
pub async fn update_image(
    State(service): State<ImageService>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let file = read_image_field(multipart).await?;
    let image = service.update(&id, file).await?;

    Ok(Json(ImageEnvelope {
        message: "Image updated successfully",
        image,
    }))
}

/// `DELETE /api/images/{id}`
pub async fn delete_image(
    State(service): State<ImageService>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete(&id).await?;
    Ok(Json(json!({ "message": "Image deleted successfully" })))
}

/// `GET /api/images/{id}/download`: stream the object as an attachment.
pub async fn download_image(
    State(service): State<ImageService>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let download = service.download(&id).await?;

    // Keys come from client filenames; a control character cannot go in a header.
    let disposition =
        HeaderValue::from_bytes(format!("attachment; filename=\"{}\"", download.key).as_bytes())
            .map_err(|err| ImageError::DownloadFailed(err.to_string()))?;
    let content_type = HeaderValue::from_str(&download.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = Response::new(Body::from_stream(ReaderStream::new(download.reader)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok(response)
}

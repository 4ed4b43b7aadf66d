//! HTTP handlers. Each one decodes a request, calls `ImageService`, and
//! encodes the outcome as JSON or a byte stream.

pub mod health_handlers;
pub mod image_handlers;

//! Data models for the image service.
//!
//! `ImageRecord` maps to the `images` table via `sqlx::FromRow` and serializes
//! as the JSON document returned by the HTTP API.

pub mod image;

//! Screenshot-to-art pipeline.
//!
//! Watches a screenshots directory, captions each new image with a remote
//! vision model, turns the caption into a text-to-image prompt, renders it
//! with a remote generation model, and publishes the result to an outputs
//! directory browsable through an embedded web gallery.

pub mod app_state;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;

//! Kino - adaptive HLS transcoding for a personal media server
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod server;
pub mod streaming;

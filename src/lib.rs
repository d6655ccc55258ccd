//! Cleaning Operations Sync Core
//!
//! This module exports the store, engine, and session components for
//! embedding and integration testing.

pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod notify;
pub mod relay;
pub mod sync;
pub mod types;

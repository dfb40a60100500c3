//! Full-page HTTP response cache.
//!
//! Sits in front of an origin site, stores rendered pages per url and
//! variant, and expands instruction markers on every delivery.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod util;

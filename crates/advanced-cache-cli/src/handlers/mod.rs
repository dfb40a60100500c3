#![deny(clippy::all, clippy::pedantic)]

pub mod cache;

//! Application-level error taxonomy shared by the binary and HTTP surfaces.

pub mod error;

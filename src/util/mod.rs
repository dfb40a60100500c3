//! Small shared helpers.

pub mod bytes;

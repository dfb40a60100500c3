#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use advanced_cache_api_types::BodyEncoding;
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::client::CliError;

/// Body for `cache set`: the file wins over the inline value; non UTF-8 files go out as base64.
pub async fn read_body(
    val: Option<String>,
    file: Option<PathBuf>,
) -> Result<(String, BodyEncoding), CliError> {
    if let Some(path) = file {
        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| CliError::InputFile {
                path: path.display().to_string(),
                source,
            })?;
        return Ok(match String::from_utf8(data) {
            Ok(text) => (text, BodyEncoding::Utf8),
            Err(err) => (STANDARD.encode(err.as_bytes()), BodyEncoding::Base64),
        });
    }
    Ok((val.unwrap_or_default(), BodyEncoding::Utf8))
}

/// Split `Name: value` into a header pair.
pub fn parse_header(raw: &str) -> Result<(String, String), CliError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| CliError::InvalidInput(format!("header `{raw}` must look like `Name: value`")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidInput(format!(
            "header `{raw}` has an empty name"
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#![deny(clippy::all, clippy::pedantic)]

use advanced_cache_api_types::ApiErrorBody;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, Method, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::args::Cli;
use std::fs;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("admin URL is required (use --admin or ADVANCED_CACHE_ADMIN_URL)")]
    MissingAdmin,
    #[error("admin token is required (use --token-file or ADVANCED_CACHE_TOKEN)")]
    MissingToken,
    #[error("failed to read token file: {0}")]
    TokenFile(std::io::Error),
    #[error("failed to read input file {path}: {source}")]
    InputFile {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message} ({code}, status {status}){}", format_hint(.hint.as_deref()))]
    Api {
        status: u16,
        code: String,
        message: String,
        hint: Option<String>,
    },
    #[error("server error: {0}")]
    Server(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

fn format_hint(hint: Option<&str>) -> String {
    hint.map(|hint| format!(": {hint}")).unwrap_or_default()
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub client: Client,
    pub base: Url,
    pub token: String,
}

impl Ctx {
    pub fn new(admin: &str, token: String) -> Result<Self, CliError> {
        let base = Url::parse(admin)?.join("/")?;
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("advanced-cache-cli/", env!("CARGO_PKG_VERSION"))
    }

    pub fn auth_header(&self) -> Result<HeaderValue, CliError> {
        HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| CliError::InvalidInput(e.to_string()))
    }

    pub fn url(&self, path: &str) -> Result<Url, CliError> {
        self.base.join(path).map_err(CliError::Url)
    }

    pub async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, CliError> {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }

        let mut req = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, self.auth_header()?);
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await?;
        Self::handle(resp).await
    }

    async fn handle<T: DeserializeOwned>(resp: Response) -> Result<T, CliError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(match serde_json::from_slice::<ApiErrorBody>(&bytes) {
                Ok(body) => CliError::Api {
                    status: status.as_u16(),
                    code: body.error.code,
                    message: body.error.message,
                    hint: body.error.hint,
                },
                Err(_) => CliError::Server(format!(
                    "status {status} body {}",
                    String::from_utf8_lossy(&bytes)
                )),
            });
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| CliError::Server(format!("failed to parse body: {e}")))
    }
}

pub fn build_ctx_from_cli(cli: &Cli) -> Result<Ctx, CliError> {
    let admin = cli.admin.clone().ok_or(CliError::MissingAdmin)?;
    let token = if let Some(path) = &cli.token_file {
        fs::read_to_string(path)
            .map_err(CliError::TokenFile)?
            .trim()
            .to_string()
    } else {
        cli.token_env.clone().ok_or(CliError::MissingToken)?
    };

    Ctx::new(&admin, token)
}

/// Reject anything that is not an absolute http(s) url before touching the network.
pub fn validate_page_url(raw: &str) -> Result<(), CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::InvalidInput("url must not be empty".into()));
    }
    let parsed = Url::parse(trimmed)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CliError::InvalidInput(format!(
            "unsupported scheme `{}`",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(CliError::InvalidInput("url has no host".into()));
    }
    Ok(())
}

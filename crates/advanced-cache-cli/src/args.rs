//! Command-line surface for `advanced-cache-cli`.

#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "advanced-cache-cli",
    version,
    about = "Inspect and manage advanced-cache entries",
    long_about = None
)]
pub struct Cli {
    /// Admin API base URL, e.g. <http://127.0.0.1:3001>
    #[arg(long, env = "ADVANCED_CACHE_ADMIN_URL")]
    pub admin: Option<String>,

    /// Path to file containing the admin token (takes precedence over env)
    #[arg(long, env = "ADVANCED_CACHE_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Admin token from env (CLI flag intentionally disabled to avoid shell history leaks)
    #[arg(hide = true, env = "ADVANCED_CACHE_TOKEN")]
    pub token_env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cached page management
    Cache(CacheArgs),
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheCmd,
}

#[derive(Subcommand, Debug)]
pub enum CacheCmd {
    /// Print a stored entry (status, headers, body)
    Get {
        url: String,
        #[arg(default_value = "")]
        variant_key: String,
    },
    /// Store a response verbatim under the url and variant
    Set {
        url: String,
        #[arg(default_value = "")]
        variant_key: String,
        #[arg(long, default_value_t = 200)]
        status: u16,
        /// Response header as `Name: value`; repeatable
        #[arg(long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// Lifetime in seconds; omitted keeps the entry until invalidated
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Delete one stored variant
    Delete {
        url: String,
        #[arg(default_value = "")]
        variant_key: String,
    },
    /// Print entry metadata and the variants known for the url
    Info {
        url: String,
        #[arg(default_value = "")]
        variant_key: String,
    },
    /// Delete every stored variant of the url
    Flush { url: String },
}

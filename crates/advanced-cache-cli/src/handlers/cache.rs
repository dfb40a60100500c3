#![deny(clippy::all, clippy::pedantic)]

use advanced_cache_api_types::{
    DeleteResponse, EntryInfo, EntryView, FlushRequest, FlushResponse, StoreEntryRequest,
};
use reqwest::Method;

use crate::args::CacheCmd;
use crate::client::{CliError, Ctx, validate_page_url};
use crate::io::{parse_header, read_body};
use crate::print::print_json;

const ENTRY: &str = "api/v1/cache/entry";
const INFO: &str = "api/v1/cache/info";
const FLUSH: &str = "api/v1/cache/flush";

pub async fn handle(ctx: &Ctx, cmd: CacheCmd) -> Result<(), CliError> {
    match cmd {
        CacheCmd::Get { url, variant_key } => {
            validate_page_url(&url)?;
            let res: EntryView = ctx
                .request(
                    Method::GET,
                    ENTRY,
                    &[("url", url.as_str()), ("variant", variant_key.as_str())],
                    None::<&()>,
                )
                .await?;
            print_json(&res)?;
        }
        CacheCmd::Set {
            url,
            variant_key,
            status,
            headers,
            body,
            body_file,
            ttl,
        } => {
            validate_page_url(&url)?;
            let headers = headers
                .iter()
                .map(String::as_str)
                .map(parse_header)
                .collect::<Result<Vec<_>, _>>()?;
            let (body, body_encoding) = read_body(body, body_file).await?;
            let payload = StoreEntryRequest {
                url,
                variant_key,
                status,
                headers,
                body,
                body_encoding,
                ttl_secs: ttl,
            };
            let res: EntryView = ctx
                .request(Method::PUT, ENTRY, &[], Some(&payload))
                .await?;
            print_json(&res)?;
        }
        CacheCmd::Delete { url, variant_key } => {
            validate_page_url(&url)?;
            let res: DeleteResponse = ctx
                .request(
                    Method::DELETE,
                    ENTRY,
                    &[("url", url.as_str()), ("variant", variant_key.as_str())],
                    None::<&()>,
                )
                .await?;
            print_json(&res)?;
        }
        CacheCmd::Info { url, variant_key } => {
            validate_page_url(&url)?;
            let res: EntryInfo = ctx
                .request(
                    Method::GET,
                    INFO,
                    &[("url", url.as_str()), ("variant", variant_key.as_str())],
                    None::<&()>,
                )
                .await?;
            print_json(&res)?;
        }
        CacheCmd::Flush { url } => {
            validate_page_url(&url)?;
            let res: FlushResponse = ctx
                .request(Method::POST, FLUSH, &[], Some(&FlushRequest { url }))
                .await?;
            print_json(&res)?;
        }
    }
    Ok(())
}

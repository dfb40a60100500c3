//! Request lifecycle orchestration.
//!
//! ```text
//! describe -> evaluate policy -+-> lookup -+-> hit  -> perpetual -> serve
//!                              |           +-> miss -> render -> response policy
//!                              |                        -> ephemeral -> store? -> perpetual -> serve
//!                              +-> skip -> render -> all instructions -> serve
//! ```
//!
//! The processor holds no per-request state; storage and render failures
//! degrade to serving uncached content. Upstream answers the transport chose
//! not to buffer skip instructions and storage and are forwarded as is.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::Method;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::config::{CacheConfig, DEFAULT_MAX_VARIANTS_PER_URL};
use super::entry::ResponseEntry;
use super::instruction::{InstructionContext, Pipeline, PipelineError};
use super::lookup::CacheRequest;
use super::policy::{Admission, PolicyEngine, PolicyError};
use super::request::{InboundRequest, RequestDescriptor};
use super::response::{Headers, RenderedResponse};
use super::store::CacheStore;
use super::visitor::Visitor;

const SOURCE: &str = "advanced_cache::processor";
pub const OUTCOME_HEADER: &str = "x-advanced-cache";

const METRIC_HIT: &str = "advanced_cache_hit_total";
const METRIC_MISS: &str = "advanced_cache_miss_total";
const METRIC_BYPASS: &str = "advanced_cache_bypass_total";
const METRIC_STORE: &str = "advanced_cache_store_total";
const METRIC_STORE_FAILED: &str = "advanced_cache_store_failed_total";
const METRIC_RENDER_MS: &str = "advanced_cache_render_ms";

/// Failure of the upstream renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("upstream is unavailable: {0}")]
    Unavailable(String),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("upstream failed: {0}")]
    Upstream(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from storage without rendering.
    Hit,
    /// Rendered on a miss and stored.
    Stored,
    /// Rendered on a miss; the write was not attempted or failed.
    Miss,
    /// A request policy vetoed caching; storage was not touched.
    Bypass,
    /// Rendered on a miss but the response was refused for storage.
    Uncacheable,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Stored => "stored",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
            Self::Uncacheable => "uncacheable",
        }
    }
}

/// What the upstream renderer handed back.
#[derive(Debug)]
pub enum Upstream<P> {
    /// Fully buffered; instructions run and the page may be stored.
    Page(RenderedResponse),
    /// Not buffered (too large, or streaming); forwarded untouched.
    Passthrough(P),
}

/// Final response handed back to the transport.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: RenderedResponse,
    pub outcome: CacheOutcome,
}

impl Served {
    fn new(mut response: RenderedResponse, outcome: CacheOutcome) -> Self {
        response.headers.strip_framing();
        response.headers.insert(OUTCOME_HEADER, outcome.as_str());
        Self { response, outcome }
    }
}

/// Result of [`Processor::handle_upstream`].
#[derive(Debug)]
pub enum Reply<P> {
    Served(Served),
    /// The upstream answer was forwarded as is; the transport tags it with `outcome`.
    Passthrough { upstream: P, outcome: CacheOutcome },
}

impl<P> Reply<P> {
    fn passthrough(upstream: P, outcome: CacheOutcome) -> Self {
        debug!(
            target = SOURCE,
            outcome = outcome.as_str(),
            "Forwarding unbuffered upstream response"
        );
        Self::Passthrough { upstream, outcome }
    }

    pub fn outcome(&self) -> CacheOutcome {
        match self {
            Self::Served(served) => served.outcome,
            Self::Passthrough { outcome, .. } => *outcome,
        }
    }
}

#[derive(Clone)]
pub struct Processor {
    store: CacheStore,
    policies: Arc<PolicyEngine>,
    pipeline: Arc<Pipeline>,
    default_ttl: Option<Duration>,
    max_variants: usize,
    enabled: bool,
}

impl Processor {
    pub fn new(store: CacheStore, policies: PolicyEngine, pipeline: Pipeline) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
            pipeline: Arc::new(pipeline),
            default_ttl: None,
            max_variants: DEFAULT_MAX_VARIANTS_PER_URL,
            enabled: true,
        }
    }

    /// Build policies and instructions from `config`.
    pub fn from_config(store: CacheStore, config: &CacheConfig) -> Result<Self, BuildError> {
        let processor = Self::new(
            store,
            PolicyEngine::from_config(config)?,
            Pipeline::from_config(config)?,
        );
        Ok(processor
            .with_default_ttl(config.default_ttl())
            .with_variant_limit(config.max_variants_per_url)
            .with_enabled(config.enabled))
    }

    /// Lifetime for responses without cache-control lifetimes; `None` keeps entries until invalidated.
    pub fn with_default_ttl(mut self, default_ttl: Option<Duration>) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    /// Distinct variants stored per url; further variants are served without storing.
    pub fn with_variant_limit(mut self, max_variants: usize) -> Self {
        self.max_variants = max_variants;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Serve `inbound`, invoking `render` only when storage cannot answer.
    pub async fn handle<F, Fut>(&self, inbound: InboundRequest, render: F) -> Served
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<RenderedResponse, RenderError>> + Send,
    {
        let render = move || {
            let rendered = render();
            async move { rendered.await.map(Upstream::<Infallible>::Page) }
        };
        match self.handle_upstream(inbound, render).await {
            Reply::Served(served) => served,
            Reply::Passthrough { upstream, .. } => match upstream {},
        }
    }

    /// Like [`handle`](Self::handle), for renderers that may decline to buffer
    /// their answer. Passthrough answers are never stored or rewritten.
    #[instrument(skip_all, fields(method = %inbound.method, url = %inbound.url, outcome = tracing::field::Empty))]
    pub async fn handle_upstream<F, Fut, P>(&self, inbound: InboundRequest, render: F) -> Reply<P>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Upstream<P>, RenderError>> + Send,
        P: Send,
    {
        let reply = self.process(inbound, render).await;
        tracing::Span::current().record("outcome", reply.outcome().as_str());
        reply
    }

    async fn process<F, Fut, P>(&self, inbound: InboundRequest, render: F) -> Reply<P>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Upstream<P>, RenderError>> + Send,
        P: Send,
    {
        let descriptor = match RequestDescriptor::from_inbound(&inbound) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                debug!(target = SOURCE, error = %error, "Request url is not cacheable");
                counter!(METRIC_BYPASS, "reason" => "url").increment(1);
                return match self.render(render).await {
                    Ok(Upstream::Page(response)) => {
                        Reply::Served(Served::new(response, CacheOutcome::Bypass))
                    }
                    Ok(Upstream::Passthrough(upstream)) => {
                        Reply::passthrough(upstream, CacheOutcome::Bypass)
                    }
                    Err(error) => {
                        Reply::Served(Served::new(bad_gateway(&error), CacheOutcome::Bypass))
                    }
                };
            }
        };
        let visitor = Visitor::from_inbound(&inbound);

        if !self.enabled {
            counter!(METRIC_BYPASS, "reason" => "disabled").increment(1);
            return self.skip(&descriptor, &visitor, render).await;
        }

        let variant_key = match self.policies.evaluate(&descriptor, &visitor) {
            Admission::Cache { variant_key } => variant_key,
            Admission::Bypass { vetoed_by } => {
                debug!(target = SOURCE, policy = vetoed_by, "Request bypasses cache");
                counter!(METRIC_BYPASS, "reason" => vetoed_by).increment(1);
                return self.skip(&descriptor, &visitor, render).await;
            }
        };
        let descriptor = descriptor.with_variant(variant_key);
        let lookup = CacheRequest::new(self.store.clone(), descriptor.url())
            .with_variant_limit(self.max_variants);

        if let Some(entry) = lookup.get_variant(descriptor.variant_key()).await {
            counter!(METRIC_HIT).increment(1);
            debug!(
                target = SOURCE,
                variant = descriptor.variant_key(),
                "Serving cached response"
            );
            let context = InstructionContext::new(&descriptor, &visitor);
            let response = self.serve_pass(entry.into_response(), &context);
            return Reply::Served(Served::new(response, CacheOutcome::Hit));
        }

        counter!(METRIC_MISS).increment(1);
        let mut rendered = match self.render(render).await {
            Ok(Upstream::Page(response)) => response,
            Ok(Upstream::Passthrough(upstream)) => {
                return Reply::passthrough(upstream, CacheOutcome::Uncacheable);
            }
            Err(error) => {
                return Reply::Served(Served::new(
                    bad_gateway(&error),
                    CacheOutcome::Uncacheable,
                ));
            }
        };
        rendered.headers.strip_framing();

        let context = InstructionContext::new(&descriptor, &visitor);
        if let Some(policy) = self.policies.refuse_response(&rendered) {
            debug!(
                target = SOURCE,
                policy,
                status = rendered.status,
                "Response refused for storage"
            );
            let response = self.all_passes(rendered, &context);
            return Reply::Served(Served::new(response, CacheOutcome::Uncacheable));
        }

        let baked = match self.bake(rendered, &context) {
            Ok(baked) => baked,
            Err(served) => return Reply::Served(Served::new(served, CacheOutcome::Uncacheable)),
        };

        let outcome = if *descriptor.method() == Method::GET {
            let ttl = PolicyEngine::ttl_for(&baked, self.default_ttl);
            let entry = ResponseEntry::new(
                descriptor.url(),
                descriptor.variant_key(),
                baked.clone(),
                ttl,
            );
            if lookup.store(&entry).await {
                counter!(METRIC_STORE).increment(1);
                CacheOutcome::Stored
            } else {
                counter!(METRIC_STORE_FAILED).increment(1);
                CacheOutcome::Miss
            }
        } else {
            CacheOutcome::Miss
        };

        Reply::Served(Served::new(self.serve_pass(baked, &context), outcome))
    }

    /// Render and serve without any storage interaction.
    async fn skip<F, Fut, P>(
        &self,
        descriptor: &RequestDescriptor,
        visitor: &Visitor,
        render: F,
    ) -> Reply<P>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Upstream<P>, RenderError>> + Send,
        P: Send,
    {
        match self.render(render).await {
            Ok(Upstream::Page(response)) => {
                let context = InstructionContext::new(descriptor, visitor);
                Reply::Served(Served::new(
                    self.all_passes(response, &context),
                    CacheOutcome::Bypass,
                ))
            }
            Ok(Upstream::Passthrough(upstream)) => {
                Reply::passthrough(upstream, CacheOutcome::Bypass)
            }
            Err(error) => Reply::Served(Served::new(bad_gateway(&error), CacheOutcome::Bypass)),
        }
    }

    async fn render<F, Fut, P>(&self, render: F) -> Result<Upstream<P>, RenderError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Upstream<P>, RenderError>> + Send,
    {
        let started = Instant::now();
        let result = render().await;
        histogram!(METRIC_RENDER_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        if let Err(error) = &result {
            warn!(target = SOURCE, error = %error, "Upstream render failed");
        }
        result
    }

    fn all_passes(
        &self,
        response: RenderedResponse,
        context: &InstructionContext<'_>,
    ) -> RenderedResponse {
        match self.bake(response, context) {
            Ok(baked) => self.serve_pass(baked, context),
            Err(served) => served,
        }
    }

    /// Ephemeral pass. On failure the unbaked body has already been through
    /// the perpetual pass and comes back as `Err`; it must not be stored.
    fn bake(
        &self,
        response: RenderedResponse,
        context: &InstructionContext<'_>,
    ) -> Result<RenderedResponse, RenderedResponse> {
        let baked = self.pipeline.bake(response.clone(), context);
        self.settle_bake(baked, response, context)
    }

    fn settle_bake(
        &self,
        baked: Result<RenderedResponse, PipelineError>,
        unbaked: RenderedResponse,
        context: &InstructionContext<'_>,
    ) -> Result<RenderedResponse, RenderedResponse> {
        baked.map_err(|error| {
            warn!(
                target = SOURCE,
                error = %error,
                "Ephemeral instructions failed; serving unbaked body"
            );
            self.serve_pass(unbaked, context)
        })
    }

    fn serve_pass(
        &self,
        response: RenderedResponse,
        context: &InstructionContext<'_>,
    ) -> RenderedResponse {
        match self.pipeline.serve(response.clone(), context) {
            Ok(served) => served,
            Err(error) => {
                warn!(target = SOURCE, error = %error, "Perpetual instructions failed");
                response
            }
        }
    }
}

fn bad_gateway(error: &RenderError) -> RenderedResponse {
    let mut headers = Headers::new();
    headers.append("content-type", "text/plain; charset=utf-8");
    headers.append("cache-control", "no-store");
    let status = match error {
        RenderError::Timeout(_) => 504,
        _ => 502,
    };
    RenderedResponse::new(status, headers, "upstream unavailable")
}

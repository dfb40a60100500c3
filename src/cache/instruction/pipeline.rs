use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, doc_comments, rewrite_str};
use thiserror::Error;

use super::builtin::{GeneratedAt, Nonce, ServedAt, StaticInstruction};
use super::{Instruction, InstructionContext, InstructionKind, MARKER_PREFIX, sanitize_tag};
use crate::cache::config::CacheConfig;
use crate::cache::response::RenderedResponse;

const MARKER_OPEN: &str = "<!--instruction:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("instruction tag `{0}` contains no letters")]
    EmptyTag(String),
    #[error("instruction tags `{existing}` and `{incoming}` both sanitise to `{sanitized}`")]
    DuplicateTag {
        sanitized: String,
        existing: String,
        incoming: String,
    },
    #[error("unknown instruction `{0}`")]
    Unknown(String),
    #[error("failed to rewrite document: {0}")]
    Rewrite(String),
}

/// Ordered, collision-free set of instructions.
#[derive(Clone, Default)]
pub struct Pipeline {
    instructions: Vec<Arc<dyn Instruction>>,
    by_tag: HashMap<String, usize>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instruction` after the existing ones.
    pub fn register(&mut self, instruction: Arc<dyn Instruction>) -> Result<(), PipelineError> {
        let sanitized = sanitize_tag(instruction.tag());
        if sanitized.is_empty() {
            return Err(PipelineError::EmptyTag(instruction.tag().to_string()));
        }
        if let Some(&index) = self.by_tag.get(&sanitized) {
            return Err(PipelineError::DuplicateTag {
                sanitized,
                existing: self.instructions[index].tag().to_string(),
                incoming: instruction.tag().to_string(),
            });
        }
        self.by_tag.insert(sanitized, self.instructions.len());
        self.instructions.push(instruction);
        Ok(())
    }

    pub fn with(mut self, instruction: impl Instruction + 'static) -> Result<Self, PipelineError> {
        self.register(Arc::new(instruction))?;
        Ok(self)
    }

    /// Built-ins in configured order, then static instructions in declaration order.
    pub fn from_config(config: &CacheConfig) -> Result<Self, PipelineError> {
        let mut pipeline = Self::new();
        for name in &config.instructions {
            let instruction: Arc<dyn Instruction> = match name.as_str() {
                "generated" => Arc::new(GeneratedAt),
                "servedat" => Arc::new(ServedAt),
                "nonce" => Arc::new(Nonce),
                other => return Err(PipelineError::Unknown(other.to_string())),
            };
            pipeline.register(instruction)?;
        }
        for entry in &config.static_instructions {
            pipeline.register(Arc::new(StaticInstruction::new(
                entry.tag.clone(),
                entry.kind,
                entry.content.clone(),
            )))?;
        }
        Ok(pipeline)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Sanitised tags in execution order.
    pub fn tags(&self) -> Vec<String> {
        self.instructions
            .iter()
            .map(|instruction| sanitize_tag(instruction.tag()))
            .collect()
    }

    fn has_kind(&self, kind: InstructionKind) -> bool {
        self.instructions
            .iter()
            .any(|instruction| instruction.kind() == kind)
    }

    /// Run Ephemeral instructions, producing the copy that is stored.
    pub fn bake(
        &self,
        response: RenderedResponse,
        context: &InstructionContext<'_>,
    ) -> Result<RenderedResponse, PipelineError> {
        self.run(InstructionKind::Ephemeral, response, context)
    }

    /// Run Perpetual instructions, producing the copy that is sent.
    pub fn serve(
        &self,
        response: RenderedResponse,
        context: &InstructionContext<'_>,
    ) -> Result<RenderedResponse, PipelineError> {
        self.run(InstructionKind::Perpetual, response, context)
    }

    fn run(
        &self,
        kind: InstructionKind,
        mut response: RenderedResponse,
        context: &InstructionContext<'_>,
    ) -> Result<RenderedResponse, PipelineError> {
        if !self.has_kind(kind) || !response.is_html() {
            return Ok(response);
        }
        let Ok(html) = std::str::from_utf8(&response.body) else {
            return Ok(response);
        };
        if !html.contains(MARKER_OPEN) {
            return Ok(response);
        }

        let rewritten = self.rewrite(kind, html, context)?;
        response.body = Bytes::from(rewritten);
        Ok(response)
    }

    /// Single pass over `html`; content is computed once per tag.
    fn rewrite(
        &self,
        kind: InstructionKind,
        html: &str,
        context: &InstructionContext<'_>,
    ) -> Result<String, PipelineError> {
        let mut computed: HashMap<usize, String> = HashMap::new();
        rewrite_str(
            html,
            RewriteStrSettings {
                document_content_handlers: vec![doc_comments!(|comment| {
                    let Some(index) = self.owner(&comment.text()) else {
                        return Ok(());
                    };
                    let instruction = &self.instructions[index];
                    if instruction.kind() != kind {
                        return Ok(());
                    }
                    let content = computed
                        .entry(index)
                        .or_insert_with(|| instruction.content(context));
                    match kind {
                        InstructionKind::Ephemeral => {
                            comment.replace(content.as_str(), ContentType::Html)
                        }
                        InstructionKind::Perpetual => {
                            comment.after(content.as_str(), ContentType::Html)
                        }
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| PipelineError::Rewrite(err.to_string()))
    }

    /// Index of the instruction owning the marker with comment text `text`.
    fn owner(&self, text: &str) -> Option<usize> {
        let tag = text.trim().strip_prefix(MARKER_PREFIX)?;
        self.by_tag.get(&sanitize_tag(tag)).copied()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;
    use crate::cache::instruction::marker;
    use crate::cache::request::RequestDescriptor;
    use crate::cache::response::Headers;
    use crate::cache::visitor::Visitor;

    struct Counting {
        tag: &'static str,
        kind: InstructionKind,
        content: &'static str,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Counting {
        fn new(tag: &'static str, kind: InstructionKind, content: &'static str) -> Self {
            Self {
                tag,
                kind,
                content,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl Instruction for Counting {
        fn tag(&self) -> &str {
            self.tag
        }

        fn kind(&self) -> InstructionKind {
            self.kind
        }

        fn content(&self, _context: &InstructionContext<'_>) -> String {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.content.to_string()
        }
    }

    fn inputs() -> (RequestDescriptor, Visitor) {
        (
            RequestDescriptor::new(Method::GET, "https://example.com/page").expect("url"),
            Visitor::new(Method::GET, Headers::new()),
        )
    }

    fn body(response: &RenderedResponse) -> &str {
        std::str::from_utf8(&response.body).expect("utf-8")
    }

    #[test]
    fn ephemeral_replaces_marker() {
        let pipeline = Pipeline::new()
            .with(StaticInstruction::new("abc", InstructionKind::Ephemeral, "X"))
            .expect("pipeline");
        let (request, visitor) = inputs();
        let context = InstructionContext::new(&request, &visitor);

        let baked = pipeline
            .bake(
                RenderedResponse::html(200, "<p>a<!--instruction:abc-->b</p>"),
                &context,
            )
            .expect("bake");
        assert_eq!(body(&baked), "<p>aXb</p>");
    }

    #[test]
    fn perpetual_keeps_marker_and_inserts_after() {
        let pipeline = Pipeline::new()
            .with(StaticInstruction::new("now", InstructionKind::Perpetual, "<b>1</b>"))
            .expect("pipeline");
        let (request, visitor) = inputs();
        let context = InstructionContext::new(&request, &visitor);

        let served = pipeline
            .serve(RenderedResponse::html(200, "<!--instruction:now-->"), &context)
            .expect("serve");
        assert_eq!(body(&served), "<!--instruction:now--><b>1</b>");
    }

    #[test]
    fn passes_only_touch_their_own_kind() {
        let pipeline = Pipeline::new()
            .with(StaticInstruction::new("once", InstructionKind::Ephemeral, "E"))
            .and_then(|p| p.with(StaticInstruction::new("every", InstructionKind::Perpetual, "P")))
            .expect("pipeline");
        let (request, visitor) = inputs();
        let context = InstructionContext::new(&request, &visitor);
        let source = "<!--instruction:once-->|<!--instruction:every-->";

        let baked = pipeline
            .bake(RenderedResponse::html(200, source), &context)
            .expect("bake");
        assert_eq!(body(&baked), "E|<!--instruction:every-->");

        let served = pipeline.serve(baked, &context).expect("serve");
        assert_eq!(body(&served), "E|<!--instruction:every-->P");
    }

    #[test]
    fn unknown_markers_and_plain_comments_are_untouched() {
        let pipeline = Pipeline::new()
            .with(StaticInstruction::new("abc", InstructionKind::Ephemeral, "X"))
            .expect("pipeline");
        let (request, visitor) = inputs();
        let context = InstructionContext::new(&request, &visitor);
        let source = "<!-- note --><!--instruction:other--><!--instruction:abc-->";

        let baked = pipeline
            .bake(RenderedResponse::html(200, source), &context)
            .expect("bake");
        assert_eq!(body(&baked), "<!-- note --><!--instruction:other-->X");
    }

    #[test]
    fn marker_text_is_sanitised_before_lookup() {
        let pipeline = Pipeline::new()
            .with(StaticInstruction::new("foo-1", InstructionKind::Ephemeral, "X"))
            .expect("pipeline");
        let (request, visitor) = inputs();
        let context = InstructionContext::new(&request, &visitor);

        let baked = pipeline
            .bake(
                RenderedResponse::html(200, format!("{}|<!--instruction:foo_2-->", marker("foo"))),
                &context,
            )
            .expect("bake");
        assert_eq!(body(&baked), "X|X");
    }

    #[test]
    fn content_is_computed_once_per_run() {
        let tick = Arc::new(Counting::new("tick", InstructionKind::Perpetual, "T"));
        let mut pipeline = Pipeline::new();
        pipeline.register(tick.clone()).expect("register");
        let (request, visitor) = inputs();
        let context = InstructionContext::new(&request, &visitor);

        let served = pipeline
            .serve(
                RenderedResponse::html(200, "<!--instruction:tick--><!--instruction:tick-->"),
                &context,
            )
            .expect("serve");
        assert_eq!(
            body(&served),
            "<!--instruction:tick-->T<!--instruction:tick-->T"
        );
        assert_eq!(tick.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        pipeline
            .serve(RenderedResponse::html(200, "<!--instruction:tick-->"), &context)
            .expect("serve");
        assert_eq!(tick.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn non_html_and_binary_bodies_are_skipped() {
        let pipeline = Pipeline::new()
            .with(StaticInstruction::new("abc", InstructionKind::Ephemeral, "X"))
            .expect("pipeline");
        let (request, visitor) = inputs();
        let context = InstructionContext::new(&request, &visitor);

        let mut json = RenderedResponse::new(200, Headers::new(), "\"<!--instruction:abc-->\"");
        json.headers.append("Content-Type", "application/json");
        let untouched = pipeline.bake(json.clone(), &context).expect("bake");
        assert_eq!(untouched, json);

        let binary = RenderedResponse::html(200, &b"\xff<!--instruction:abc-->"[..]);
        let untouched = pipeline.bake(binary.clone(), &context).expect("bake");
        assert_eq!(untouched, binary);
    }

    #[test]
    fn colliding_tags_are_rejected() {
        let result = Pipeline::new()
            .with(StaticInstruction::new("foo-1", InstructionKind::Ephemeral, "a"))
            .and_then(|p| p.with(StaticInstruction::new("foo_1", InstructionKind::Perpetual, "b")));
        assert!(matches!(
            result.err(),
            Some(PipelineError::DuplicateTag { sanitized, .. }) if sanitized == "foo"
        ));

        assert_eq!(
            Pipeline::new()
                .with(StaticInstruction::new("42", InstructionKind::Ephemeral, "a"))
                .err(),
            Some(PipelineError::EmptyTag("42".to_string()))
        );
    }

    #[test]
    fn from_config_orders_builtins_before_static_instructions() {
        let config = CacheConfig {
            instructions: vec!["nonce".into(), "generated".into()],
            static_instructions: vec![crate::cache::config::StaticInstructionConfig {
                tag: "banner".into(),
                kind: InstructionKind::Perpetual,
                content: "<aside></aside>".into(),
            }],
            ..Default::default()
        };
        let pipeline = Pipeline::from_config(&config).expect("pipeline");
        assert_eq!(pipeline.tags(), vec!["nonce", "generated", "banner"]);

        let unknown = CacheConfig {
            instructions: vec!["weather".into()],
            ..Default::default()
        };
        assert_eq!(
            Pipeline::from_config(&unknown).err(),
            Some(PipelineError::Unknown("weather".into()))
        );
    }
}

//! Fragment orchestration: from instruction list to output stream.
//!
//! Every fragment fetch is spawned eagerly, before a single output byte is
//! produced, so upstream latency overlaps. Bodies are then written under two
//! ordering rules: sync fragments stream at their document position in
//! parser order, async fragments emit an inline placeholder and drain after
//! the document body in completion order.
//!
//! Each fragment moves through a small state machine realized by
//! [`FragmentSlot`]: a spawned fetch task (fetching, with fallback handled
//! inside the fetcher), a resolved result (streaming or failed), and
//! consumption at its document position (done). Non-primary failures
//! collapse to an empty hook-bracketed region so the client runtime's
//! bookkeeping still completes; a failed first primary aborts the whole
//! response before the shell is sent.

use crate::error::{Result, WeaveError};
use crate::protocol::pipe::PipePlanner;
use crate::protocol::{link, pipe};
use crate::server::assembler::Assembler;
use crate::server::config::{ComposerConfig, TagHandler};
use crate::server::handler::Composer;
use crate::trace;
use crate::types::{
    AssetEntry, ContextOverrides, FragmentDescriptor, FragmentResponse, Instruction,
    ParsedTemplate, RequestContext, TagEvent,
};
use crate::client::FragmentClient;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use http::{header, HeaderName, HeaderValue, Response, StatusCode};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// Compose one request into a streaming response.
pub(crate) async fn compose(composer: &Composer, ctx: RequestContext) -> Result<Response<Body>> {
    let span = trace::request_span(&ctx);
    let result = compose_inner(composer, &ctx).instrument(span.clone()).await;
    if let Err(err) = &result {
        trace::record_request_error(&span, err);
    }
    result
}

async fn compose_inner(composer: &Composer, ctx: &RequestContext) -> Result<Response<Body>> {
    let (overrides, template) = tokio::join!(
        composer.context.fetch_context(ctx),
        composer.templates.fetch_template(ctx, &composer.parser),
    );
    let overrides = overrides?;
    let template = template?;

    let mut plan = RenderPlan::build(composer, ctx, &template, &overrides);

    // The first primary's headers gate the response head: its status and
    // curated headers become the outer response's, and its terminal failure
    // turns into an outer 500 before anything is written.
    let mut status = StatusCode::OK;
    let mut propagated: Vec<(HeaderName, HeaderValue)> = Vec::new();
    let mut primary_assets: Vec<AssetEntry> = Vec::new();
    if let Some(idx) = plan.first_primary {
        let descriptor = plan.slots[idx].descriptor.clone();
        plan.slots[idx].resolve().await;
        match plan.slots[idx].resolved.as_ref() {
            Some(Ok(response)) => {
                status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
                propagated =
                    (composer.config.filter_response_headers)(&descriptor, &response.headers);
                primary_assets = response.assets.clone();
            }
            Some(Err(err)) => {
                let err = err.clone();
                trace::record_fragment_error(&plan.slots[idx].span, &err);
                return Err(err);
            }
            None => {
                return Err(WeaveError::FragmentFetch(
                    "primary fragment never resolved".to_string(),
                ))
            }
        }
    }

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache");
    // The preload header only makes sense when the runtime is loaded from an
    // external URL; an inlined runtime has nothing to preload.
    if composer.config.pipe_definition.is_none() {
        if let Some(amd) = &composer.config.amd_loader_url {
            builder = builder.header(
                header::LINK,
                link::format_preload_header(amd, ctx.host.as_deref(), &primary_assets),
            );
        }
    }
    for (name, value) in propagated {
        builder = builder.header(name, value);
    }

    let (assembler, rx) = Assembler::channel(64);
    let response = builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|err| WeaveError::Template(err.to_string()))?;

    let env = RenderEnv {
        config: composer.config.clone(),
        tags: composer.tags.clone(),
        client: composer.client.clone(),
        ctx: ctx.clone(),
    };
    let span = tracing::Span::current();
    tokio::spawn(
        async move {
            match render(&env, plan, &assembler).await {
                Ok(()) => {}
                Err(WeaveError::ClientDisconnected) => {
                    tracing::debug!("client disconnected mid-stream");
                }
                Err(err) => tracing::warn!(error = %err, "render aborted"),
            }
        }
        .instrument(span),
    );

    Ok(response)
}

/// Everything the render task owns once the response head has been sent.
struct RenderEnv {
    config: Arc<ComposerConfig>,
    tags: Arc<dyn TagHandler>,
    client: FragmentClient,
    ctx: RequestContext,
}

/// One fragment's in-flight state.
struct FragmentSlot {
    descriptor: FragmentDescriptor,
    span: tracing::Span,
    task: Option<JoinHandle<Result<FragmentResponse>>>,
    resolved: Option<Result<FragmentResponse>>,
}

impl FragmentSlot {
    fn spawn(
        client: &FragmentClient,
        ctx: &RequestContext,
        descriptor: FragmentDescriptor,
        max_asset_links: usize,
    ) -> Self {
        let span = trace::fragment_span(&descriptor);
        let client = client.clone();
        let fetch_ctx = ctx.clone();
        let fetch_descriptor = descriptor.clone();
        let task = tokio::spawn(
            async move { client.fetch(&fetch_descriptor, &fetch_ctx, max_asset_links).await }
                .instrument(span.clone()),
        );
        FragmentSlot {
            descriptor,
            span,
            task: Some(task),
            resolved: None,
        }
    }

    /// Await the fetch task once, keeping the result for later consumption.
    async fn resolve(&mut self) {
        if self.resolved.is_some() {
            return;
        }
        let result = match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(err) => Err(WeaveError::FragmentFetch(format!(
                    "fetch task failed: {err}"
                ))),
            },
            None => Err(WeaveError::FragmentFetch(
                "fragment consumed twice".to_string(),
            )),
        };
        self.resolved = Some(result);
    }

    /// Resolve and take ownership of the result.
    async fn take(&mut self) -> Result<FragmentResponse> {
        self.resolve().await;
        self.resolved.take().unwrap_or_else(|| {
            Err(WeaveError::FragmentFetch(
                "fragment consumed twice".to_string(),
            ))
        })
    }
}

impl Drop for FragmentSlot {
    fn drop(&mut self) {
        // A slot dropped before consumption (client gone, primary failed)
        // cancels its in-flight fetch.
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// A render-ready step; fragment steps point into the slot table.
enum RenderItem {
    Literal(Bytes),
    Sync(usize),
    Deferred(usize),
    Custom {
        name: String,
        attrs: Vec<(String, Option<String>)>,
    },
}

/// The per-request render plan: items in document order plus the slot table
/// of eagerly spawned fetches.
struct RenderPlan {
    doctype: Option<Bytes>,
    head: Vec<RenderItem>,
    body: Vec<RenderItem>,
    slots: Vec<FragmentSlot>,
    first_primary: Option<usize>,
    next_index: usize,
}

impl RenderPlan {
    fn build(
        composer: &Composer,
        ctx: &RequestContext,
        template: &ParsedTemplate,
        overrides: &ContextOverrides,
    ) -> Self {
        let mut slots = Vec::new();
        let head = plan_items(composer, ctx, &template.head, overrides, &mut slots);
        let body = plan_items(composer, ctx, &template.body, overrides, &mut slots);
        // First primary in parser order, which is index order, not slot
        // creation order: head-hoisted fragments keep their source position.
        let first_primary = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.descriptor.primary)
            .min_by_key(|(_, slot)| slot.descriptor.index)
            .map(|(i, _)| i);
        RenderPlan {
            doctype: template.doctype.clone(),
            head,
            body,
            slots,
            first_primary,
            next_index: template.next_index,
        }
    }
}

fn plan_items(
    composer: &Composer,
    ctx: &RequestContext,
    instructions: &[Instruction],
    overrides: &ContextOverrides,
    slots: &mut Vec<FragmentSlot>,
) -> Vec<RenderItem> {
    let mut items = Vec::with_capacity(instructions.len());
    for instruction in instructions {
        match instruction {
            Instruction::Literal(bytes) => items.push(RenderItem::Literal(bytes.clone())),
            Instruction::Fragment(descriptor) | Instruction::AsyncPlaceholder(descriptor) => {
                let mut descriptor = descriptor.clone();
                if let Some(attrs) = overrides.get(&descriptor.override_key()) {
                    descriptor.apply_overrides(attrs);
                }
                let deferred = descriptor.is_async;
                let slot = FragmentSlot::spawn(
                    &composer.client,
                    ctx,
                    descriptor,
                    composer.config.max_asset_links,
                );
                slots.push(slot);
                let idx = slots.len() - 1;
                items.push(if deferred {
                    RenderItem::Deferred(idx)
                } else {
                    RenderItem::Sync(idx)
                });
            }
            Instruction::CustomTag { name, attrs } => items.push(RenderItem::Custom {
                name: name.clone(),
                attrs: attrs.clone(),
            }),
        }
    }
    items
}

async fn render(env: &RenderEnv, mut plan: RenderPlan, out: &Assembler) -> Result<()> {
    out.open_document(plan.doctype.as_ref()).await?;

    let mut drains: FuturesUnordered<BoxFuture<'static, Bytes>> = FuturesUnordered::new();
    let mut planner = PipePlanner::resume(plan.next_index, env.config.max_asset_links);

    let head_items = std::mem::take(&mut plan.head);
    render_items(env, &mut plan, &head_items, &mut drains, &mut planner, out).await?;
    out.write_runtime(&env.config).await?;
    out.open_body().await?;

    let body_items = std::mem::take(&mut plan.body);
    render_items(env, &mut plan, &body_items, &mut drains, &mut planner, out).await?;

    // Drain region: async and dynamic fragment bodies, completion order.
    while let Some(region) = drains.next().await {
        out.write(region).await?;
    }
    out.close_document().await
}

async fn render_items(
    env: &RenderEnv,
    plan: &mut RenderPlan,
    items: &[RenderItem],
    drains: &mut FuturesUnordered<BoxFuture<'static, Bytes>>,
    planner: &mut PipePlanner,
    out: &Assembler,
) -> Result<()> {
    for item in items {
        match item {
            RenderItem::Literal(bytes) => out.write(bytes.clone()).await?,
            RenderItem::Sync(idx) => render_sync(env, &mut plan.slots[*idx], out).await?,
            RenderItem::Deferred(idx) => {
                render_deferred(env, &mut plan.slots[*idx], drains, out).await?
            }
            RenderItem::Custom { name, attrs } => {
                let mut events = env.tags.handle_tag(&env.ctx, name, attrs);
                while let Some(event) = events.next().await {
                    match event {
                        TagEvent::Chunk(bytes) => out.write(bytes).await?,
                        TagEvent::Fragment(mut descriptor) => {
                            descriptor.index = planner.reserve();
                            let mut slot = FragmentSlot::spawn(
                                &env.client,
                                &env.ctx,
                                descriptor,
                                env.config.max_asset_links,
                            );
                            render_deferred(env, &mut slot, drains, out).await?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Stream a sync fragment's region at its document position.
async fn render_sync(env: &RenderEnv, slot: &mut FragmentSlot, out: &Assembler) -> Result<()> {
    let descriptor = slot.descriptor.clone();
    let instance = env.config.pipe_instance_name.clone();
    let span = slot.span.clone();
    match slot.take().await {
        Ok(mut response) => {
            let scripts = response.scripts();
            let range = descriptor.index_range(scripts.len());
            let attrs = (env.config.pipe_attributes)(&descriptor, range);
            for style in response.stylesheets() {
                out.write(pipe::load_css(&instance, &style.href)).await?;
            }
            out.write(pipe::start_region(&instance, descriptor.index, &scripts, &attrs))
                .await?;
            while let Some(chunk) = response.body.next().await {
                match chunk {
                    Ok(bytes) => out.write(bytes).await?,
                    Err(err) => {
                        // Mid-body failure: close the region with what was
                        // already written.
                        trace::record_fragment_error(&span, &err);
                        break;
                    }
                }
            }
            out.write(pipe::end_region(&instance, descriptor.index, &scripts, &attrs))
                .await?;
        }
        Err(err) => {
            trace::record_fragment_error(&span, &err);
            collapsed_region(env, &descriptor, &instance, out).await?;
        }
    }
    Ok(())
}

/// Empty hook-bracketed region for a failed fragment.
async fn collapsed_region(
    env: &RenderEnv,
    descriptor: &FragmentDescriptor,
    instance: &str,
    out: &Assembler,
) -> Result<()> {
    let attrs = (env.config.pipe_attributes)(descriptor, descriptor.index_range(0));
    out.write(pipe::start_region(instance, descriptor.index, &[], &attrs))
        .await?;
    out.write(pipe::end_region(instance, descriptor.index, &[], &attrs))
        .await
}

/// Emit an async fragment's inline placeholder and queue its body for the
/// drain region.
async fn render_deferred(
    env: &RenderEnv,
    slot: &mut FragmentSlot,
    drains: &mut FuturesUnordered<BoxFuture<'static, Bytes>>,
    out: &Assembler,
) -> Result<()> {
    let descriptor = slot.descriptor.clone();
    let instance = env.config.pipe_instance_name.clone();
    let span = slot.span.clone();
    match slot.take().await {
        Ok(response) => {
            for style in response.stylesheets() {
                out.write(pipe::load_css(&instance, &style.href)).await?;
            }
            out.write(pipe::placeholder(&instance, descriptor.index))
                .await?;
            let attrs =
                (env.config.pipe_attributes)(&descriptor, descriptor.index_range(response.scripts().len()));
            drains.push(Box::pin(drain_region(
                descriptor, response, attrs, instance, span,
            )));
        }
        Err(err) => {
            trace::record_fragment_error(&span, &err);
            out.write(pipe::placeholder(&instance, descriptor.index))
                .await?;
            // An empty drained region keeps the client runtime's start/end
            // bookkeeping balanced.
            let attrs = (env.config.pipe_attributes)(&descriptor, descriptor.index_range(0));
            let region = format!(
                "{}{}",
                pipe::start_region(&instance, descriptor.index, &[], &attrs),
                pipe::end_region(&instance, descriptor.index, &[], &attrs),
            );
            drains.push(Box::pin(futures::future::ready(Bytes::from(region))));
        }
    }
    Ok(())
}

/// Buffer one async fragment's full region: start hooks, body, end hooks.
async fn drain_region(
    descriptor: FragmentDescriptor,
    mut response: FragmentResponse,
    attrs: pipe::PipeAttributes,
    instance: String,
    span: tracing::Span,
) -> Bytes {
    let scripts = response.scripts();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(
        pipe::start_region(&instance, descriptor.index, &scripts, &attrs).as_bytes(),
    );
    while let Some(chunk) = response.body.next().await {
        match chunk {
            Ok(bytes) => buf.extend_from_slice(&bytes),
            Err(err) => {
                trace::record_fragment_error(&span, &err);
                break;
            }
        }
    }
    buf.extend_from_slice(
        pipe::end_region(&instance, descriptor.index, &scripts, &attrs).as_bytes(),
    );
    buf.freeze()
}

//! `skein render`: render a page description offline and print the surface.

use crate::engine::Placeholders;
use crate::page::{Page, PageNode};
use crate::transport::DirTransport;
use anyhow::bail;
use serde_json::Value;
use skein_engine::{Promise, Scheduler};
use skein_runtime::{
    MemorySurface, RenderFactory, RenderId, Runtime, RuntimeConfig, RuntimeError,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub struct RenderArgs {
    pub page: PathBuf,
    pub root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub latency: u64,
    pub placeholders: bool,
    pub compact: bool,
}

pub fn execute(args: RenderArgs) -> anyhow::Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    skein_runtime::logging::init(config.logging.filter.as_deref());

    let snapshot = render_page(&args, &config)?;
    let out = if args.compact {
        serde_json::to_string(&snapshot)?
    } else {
        serde_json::to_string_pretty(&snapshot)?
    };
    println!("{}", out);
    Ok(())
}

/// Render `args.page` and return the markup of every anchor
pub fn render_page(
    args: &RenderArgs,
    config: &RuntimeConfig,
) -> anyhow::Result<BTreeMap<String, String>> {
    let page = Page::load(&args.page)?;
    let root = match &args.root {
        Some(root) => root.clone(),
        None => args
            .page
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    let scheduler = Scheduler::with_config(config.scheduler_config());
    let transport = DirTransport::new(scheduler.clone(), root, args.latency);
    tracing::debug!(
        root = %transport.root().display(),
        nodes = page.node_count(),
        "rendering page"
    );
    let surface = MemorySurface::new();
    let runtime = Runtime::with_scheduler(
        scheduler,
        config,
        Rc::new(transport),
        Rc::new(surface.clone()),
    )?;
    if args.placeholders {
        runtime.render().set_template_engine(Rc::new(Placeholders));
    }
    for (tid, markup) in &page.templates {
        runtime.templates().put(tid.clone(), markup.clone());
    }
    for (name, source) in &page.sources {
        runtime.sources().register(name.clone(), source.clone());
    }

    let mounted = mount(&runtime, &page)?;
    let turns = runtime.run_until_idle()?;
    match mounted.outcome() {
        Some(Ok(_)) => {
            tracing::info!(turns, "page rendered");
            Ok(surface.snapshot())
        }
        Some(Err(reason)) => bail!("page render failed: {}", reason),
        None => bail!("page render did not settle"),
    }
}

/// Fetch every sourced model in one batch, then build and show the tree
fn mount(runtime: &Runtime, page: &Page) -> anyhow::Result<Promise> {
    let mut batch = runtime.sources().batch();
    for (source, params) in page.sourced() {
        batch.data(&source, params)?;
    }

    let render = runtime.render().clone();
    let kernel = runtime.kernel().clone();
    let nodes = page.nodes.clone();
    Ok(batch.done().then(move |results| {
        let mut fetched = match results {
            Value::Array(items) => items.into_iter(),
            _ => Vec::new().into_iter(),
        };
        let mut shown = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let id = build(&render, node, &mut fetched).map_err(to_reason)?;
            shown.push(render.show(id).map_err(to_reason)?);
        }
        Ok(kernel.all(shown))
    }))
}

fn build(
    render: &RenderFactory,
    node: &PageNode,
    fetched: &mut impl Iterator<Item = Value>,
) -> Result<RenderId, RuntimeError> {
    let data = match node.source {
        Some(_) => fetched.next().unwrap_or(Value::Null),
        None => node.data.clone(),
    };
    let id = render.create(node.render_config(data));
    for child in &node.children {
        let child = build(render, child, fetched)?;
        render.attach(id, child)?;
    }
    Ok(id)
}

fn to_reason(err: RuntimeError) -> Value {
    Value::from(err.to_string())
}

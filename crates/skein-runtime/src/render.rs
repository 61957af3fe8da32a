//! Render tree
//!
//! Render nodes live in a [`RenderRegistry`] keyed by [`RenderId`]; a node
//! only knows its children's ids, never its parent. Showing a node renders
//! its subtree parent-first (a child's anchor usually lives inside its
//! parent's markup). Hiding and removing go children-first so finalizers
//! run from the leaves up.
//!
//! Markup goes to a [`Surface`], which stands in for the document.

use crate::error::RuntimeError;
use crate::event_bus::{BusError, EventBus};
use crate::template::TemplateLoader;
use rustc_hash::FxHashMap;
use serde_json::Value;
use skein_engine::{Hierarchy, Kernel, Promise, TreeTraversal};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event posted with the node id once a node has been removed
pub const RENDER_REMOVE_EVENT: &str = "$$RenderRemoveEvent";

/// Process-wide; ids never repeat across registries sharing a bus
static NEXT_RENDER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a render node
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderId(u64);

impl RenderId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render#{}", self.0)
    }
}

/// Hook called with the node and its data (`link` after rendering,
/// `finalize` before clearing)
pub type RenderHook = Rc<dyn Fn(RenderId, &Value) -> anyhow::Result<()>>;

/// How a node renders
#[derive(Clone, Default)]
pub struct RenderConfig {
    /// Surface anchor the markup is written to
    pub element: String,
    /// Inline template; wins over `template_url`/`template_id`
    pub template: Option<String>,
    /// Document to load the template from
    pub template_url: Option<String>,
    /// Template id inside the cache or the loaded document
    pub template_id: Option<String>,
    /// Model handed to the template engine
    pub data: Value,
    pub link: Option<RenderHook>,
    pub finalize: Option<RenderHook>,
}

impl RenderConfig {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            ..Self::default()
        }
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn template_url(mut self, url: impl Into<String>) -> Self {
        self.template_url = Some(url.into());
        self
    }

    pub fn template_id(mut self, tid: impl Into<String>) -> Self {
        self.template_id = Some(tid.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn link<F>(mut self, hook: F) -> Self
    where
        F: Fn(RenderId, &Value) -> anyhow::Result<()> + 'static,
    {
        self.link = Some(Rc::new(hook));
        self
    }

    pub fn finalize<F>(mut self, hook: F) -> Self
    where
        F: Fn(RenderId, &Value) -> anyhow::Result<()> + 'static,
    {
        self.finalize = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("element", &self.element)
            .field("template", &self.template)
            .field("template_url", &self.template_url)
            .field("template_id", &self.template_id)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// A node of the render tree
#[derive(Debug, Clone)]
pub struct RenderNode {
    id: RenderId,
    config: RenderConfig,
    visible: bool,
    children: Vec<RenderId>,
}

impl RenderNode {
    pub fn id(&self) -> RenderId {
        self.id
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn data(&self) -> &Value {
        &self.config.data
    }

    /// Rendered and not hidden since
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Child ids in insertion order
    pub fn children(&self) -> &[RenderId] {
        &self.children
    }
}

/// Owner of every render node
#[derive(Default)]
pub struct RenderRegistry {
    nodes: RefCell<FxHashMap<RenderId, RenderNode>>,
}

impl RenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, config: RenderConfig) -> RenderId {
        let id = RenderId(NEXT_RENDER_ID.fetch_add(1, Ordering::Relaxed));
        self.nodes.borrow_mut().insert(
            id,
            RenderNode {
                id,
                config,
                visible: false,
                children: Vec::new(),
            },
        );
        id
    }

    /// Snapshot of a node
    pub fn get(&self, id: RenderId) -> Option<RenderNode> {
        self.nodes.borrow().get(&id).cloned()
    }

    pub fn contains(&self, id: RenderId) -> bool {
        self.nodes.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parent of `id`, found by scanning child lists
    pub fn parent_of(&self, id: RenderId) -> Option<RenderId> {
        self.nodes
            .borrow()
            .values()
            .find(|node| node.children.contains(&id))
            .map(|node| node.id)
    }

    /// Whether `ancestor` is `id` or sits above it
    pub fn is_ancestor(&self, ancestor: RenderId, id: RenderId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.len() {
                break;
            }
            current = self.parent_of(node);
        }
        false
    }

    fn set_visible(&self, id: RenderId, visible: bool) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&id) {
            node.visible = visible;
        }
    }

    fn attach(&self, parent: RenderId, child: RenderId) -> bool {
        match self.nodes.borrow_mut().get_mut(&parent) {
            Some(node) if !node.children.contains(&child) => {
                node.children.push(child);
                true
            }
            _ => false,
        }
    }

    fn detach(&self, parent: RenderId, child: RenderId) -> bool {
        let mut nodes = self.nodes.borrow_mut();
        let Some(node) = nodes.get_mut(&parent) else {
            return false;
        };
        let before = node.children.len();
        node.children.retain(|id| *id != child);
        node.children.len() != before
    }

    /// Forget a node and unlink it from whichever node lists it
    fn discard(&self, id: RenderId) -> bool {
        let mut nodes = self.nodes.borrow_mut();
        let removed = nodes.remove(&id).is_some();
        for node in nodes.values_mut() {
            node.children.retain(|child| *child != id);
        }
        removed
    }
}

impl Hierarchy for RenderRegistry {
    type Id = RenderId;

    fn children(&self, id: RenderId) -> Option<Vec<RenderId>> {
        self.nodes.borrow().get(&id).map(|node| node.children.clone())
    }
}

impl fmt::Debug for RenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRegistry")
            .field("nodes", &self.len())
            .finish()
    }
}

/// Where rendered markup ends up
pub trait Surface {
    /// Replace the markup at `anchor`
    fn set_html(&self, anchor: &str, html: &str);
}

/// Surface keeping the markup per anchor in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    anchors: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn html(&self, anchor: &str) -> Option<String> {
        self.anchors.borrow().get(anchor).cloned()
    }

    /// Every anchor with its current markup
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.anchors.borrow().clone()
    }
}

impl Surface for MemorySurface {
    fn set_html(&self, anchor: &str, html: &str) {
        self.anchors
            .borrow_mut()
            .insert(anchor.to_string(), html.to_string());
    }
}

/// Turns a template and a model into markup
pub trait TemplateEngine {
    fn render(&self, template: &str, data: &Value) -> anyhow::Result<String>;
}

/// Default engine: the template is the markup
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl TemplateEngine for Passthrough {
    fn render(&self, template: &str, _data: &Value) -> anyhow::Result<String> {
        Ok(template.to_string())
    }
}

/// Creates render nodes and drives show/hide/remove over the tree
#[derive(Clone)]
pub struct RenderFactory {
    kernel: Kernel,
    registry: Rc<RenderRegistry>,
    traversal: TreeTraversal<RenderRegistry>,
    loader: TemplateLoader,
    bus: EventBus,
    surface: Rc<dyn Surface>,
    engine: Rc<RefCell<Rc<dyn TemplateEngine>>>,
}

impl RenderFactory {
    /// Create a factory; removed nodes are dropped from its registry when
    /// their [`RENDER_REMOVE_EVENT`] is delivered
    pub fn new(
        kernel: Kernel,
        loader: TemplateLoader,
        bus: EventBus,
        surface: Rc<dyn Surface>,
    ) -> Result<Self, BusError> {
        let registry = Rc::new(RenderRegistry::new());
        let dropped = Rc::clone(&registry);
        bus.on(
            RENDER_REMOVE_EVENT,
            move |payload| {
                if let Some(id) = payload.as_u64() {
                    dropped.discard(RenderId(id));
                }
                Ok(())
            },
            false,
        )?;
        Ok(Self {
            traversal: TreeTraversal::new(kernel.clone(), Rc::clone(&registry)),
            kernel,
            registry,
            loader,
            bus,
            surface,
            engine: Rc::new(RefCell::new(Rc::new(Passthrough))),
        })
    }

    /// Register a new, not yet rendered node
    pub fn create(&self, config: RenderConfig) -> RenderId {
        let id = self.registry.insert(config);
        tracing::debug!(node = %id, "render node created");
        id
    }

    /// Snapshot of a node
    pub fn node(&self, id: RenderId) -> Option<RenderNode> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &Rc<RenderRegistry> {
        &self.registry
    }

    pub fn set_template_engine(&self, engine: Rc<dyn TemplateEngine>) {
        *self.engine.borrow_mut() = engine;
    }

    pub fn template_engine(&self) -> Rc<dyn TemplateEngine> {
        self.engine.borrow().clone()
    }

    /// Attach `child` under `parent` without rendering anything; the child
    /// renders with the parent's next [`RenderFactory::show`]
    ///
    /// A child attached elsewhere moves to `parent`. Attaching a node under
    /// itself or under one of its descendants fails with
    /// [`RuntimeError::RenderCycle`].
    pub fn attach(&self, parent: RenderId, child: RenderId) -> Result<(), RuntimeError> {
        self.ensure(parent)?;
        self.ensure(child)?;
        if self.registry.is_ancestor(child, parent) {
            return Err(RuntimeError::RenderCycle { parent, child });
        }
        if let Some(previous) = self.registry.parent_of(child) {
            if previous != parent {
                tracing::warn!(child = %child, from = %previous, to = %parent, "render node moved");
                self.registry.detach(previous, child);
            }
        }
        if !self.registry.attach(parent, child) {
            tracing::warn!(parent = %parent, child = %child, "render node already attached");
        }
        Ok(())
    }

    /// Attach `child` under `parent` and render the child's subtree
    pub fn add_child(&self, parent: RenderId, child: RenderId) -> Result<Promise, RuntimeError> {
        self.attach(parent, child)?;
        self.show(child)
    }

    /// Detach `child` from `parent` and remove its subtree
    ///
    /// Returns `None` (and logs) when `child` is not a child of `parent`.
    pub fn remove_child(
        &self,
        parent: RenderId,
        child: RenderId,
    ) -> Result<Option<Promise>, RuntimeError> {
        self.ensure(parent)?;
        if !self.registry.detach(parent, child) {
            tracing::warn!(parent = %parent, child = %child, "render node is not a child");
            return Ok(None);
        }
        self.remove(child).map(Some)
    }

    /// Render `id` and then its descendants
    pub fn show(&self, id: RenderId) -> Result<Promise, RuntimeError> {
        self.ensure(id)?;
        let factory = self.clone();
        Ok(self
            .traversal
            .parent_first(id, move |node| factory.render_node(node)))
    }

    /// Clear `id` and its descendants, leaves first
    pub fn hide(&self, id: RenderId) -> Result<Promise, RuntimeError> {
        self.ensure(id)?;
        let factory = self.clone();
        Ok(self.traversal.children_first(id, move |node| {
            factory.clear_node(node)?;
            Ok(factory.kernel.resolved(Value::Null))
        }))
    }

    /// Clear `id` and its descendants, then drop them from the registry
    pub fn remove(&self, id: RenderId) -> Result<Promise, RuntimeError> {
        self.ensure(id)?;
        let factory = self.clone();
        Ok(self.traversal.children_first(id, move |node| {
            factory.clear_node(node)?;
            factory.bus.post(RENDER_REMOVE_EVENT, node.as_u64());
            Ok(factory.kernel.resolved(Value::Null))
        }))
    }

    fn ensure(&self, id: RenderId) -> Result<(), RuntimeError> {
        if self.registry.contains(id) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownRender { id })
        }
    }

    fn render_node(&self, id: RenderId) -> Result<Promise, Value> {
        let node = self
            .registry
            .get(id)
            .ok_or_else(|| Value::from(format!("unknown render node {id}")))?;
        let config = &node.config;
        let template = match config.template.as_deref() {
            Some(template) if !template.is_empty() => self.kernel.when(template),
            _ => self
                .loader
                .load(
                    config.template_url.as_deref().unwrap_or_default(),
                    config.template_id.as_deref(),
                )
                .map_err(|err| Value::from(err.to_string()))?,
        };

        let factory = self.clone();
        Ok(template.then(move |template| {
            let template = match template {
                Value::String(template) => template,
                other => other.to_string(),
            };
            let config = &node.config;
            let engine = factory.template_engine();
            let html = engine
                .render(&template, &config.data)
                .map_err(|err| Value::from(format!("render of {id} failed: {err:#}")))?;
            if !config.element.is_empty() {
                factory.surface.set_html(&config.element, &html);
            }
            if let Some(link) = &config.link {
                if let Err(err) = link(id, &config.data) {
                    tracing::error!(node = %id, "link hook failed: {err:#}");
                }
            }
            factory.registry.set_visible(id, true);
            tracing::trace!(node = %id, element = %config.element, "render node shown");
            Ok(())
        }))
    }

    fn clear_node(&self, id: RenderId) -> Result<(), Value> {
        let node = self
            .registry
            .get(id)
            .ok_or_else(|| Value::from(format!("unknown render node {id}")))?;
        let config = &node.config;
        if let Some(finalize) = &config.finalize {
            if let Err(err) = finalize(id, &config.data) {
                tracing::error!(node = %id, "finalize hook failed: {err:#}");
            }
        }
        if !config.element.is_empty() {
            self.surface.set_html(&config.element, "");
        }
        self.registry.set_visible(id, false);
        Ok(())
    }
}

impl fmt::Debug for RenderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderFactory")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

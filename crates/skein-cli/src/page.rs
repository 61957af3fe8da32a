//! Page descriptions read by `skein render`
//!
//! A page is a TOML file with the render tree under `[[nodes]]`, plus
//! optional page-local `[templates]` and `[sources.<name>]` tables that are
//! merged over the runtime configuration.

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;
use skein_runtime::{RenderConfig, SourceConfig};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Page {
    /// Inline templates, keyed by template id
    pub templates: BTreeMap<String, String>,
    /// Data sources available to `source =` on nodes
    pub sources: BTreeMap<String, SourceConfig>,
    /// Root nodes, shown in order
    pub nodes: Vec<PageNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageNode {
    /// Surface anchor
    pub element: String,
    pub template: Option<String>,
    pub template_url: Option<String>,
    pub template_id: Option<String>,
    /// Static model
    pub data: Value,
    /// Named source whose response becomes the model
    pub source: Option<String>,
    /// Request params for `source`
    pub params: Value,
    pub children: Vec<PageNode>,
}

impl Page {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read page {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid page {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let page: Page = toml::from_str(text)?;
        for node in &page.nodes {
            node.validate()?;
        }
        Ok(page)
    }

    /// `(source, params)` of every sourced node, in pre-order
    pub fn sourced(&self) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.collect_sourced(&mut out);
        }
        out
    }

    /// Number of nodes in the whole tree
    pub fn node_count(&self) -> usize {
        self.nodes.iter().map(PageNode::count).sum()
    }
}

impl PageNode {
    fn validate(&self) -> anyhow::Result<()> {
        if self.template.is_none() && self.template_url.is_none() && self.template_id.is_none() {
            bail!("node `{}` has no template", self.element);
        }
        if self.source.is_some() && !self.data.is_null() {
            bail!("node `{}` sets both `data` and `source`", self.element);
        }
        self.children.iter().try_for_each(PageNode::validate)
    }

    fn collect_sourced(&self, out: &mut Vec<(String, Value)>) {
        if let Some(source) = &self.source {
            out.push((source.clone(), self.params.clone()));
        }
        for child in &self.children {
            child.collect_sourced(out);
        }
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(PageNode::count).sum::<usize>()
    }

    /// Render configuration with `data` as the model
    pub fn render_config(&self, data: Value) -> RenderConfig {
        let mut config = RenderConfig::new(self.element.clone()).data(data);
        config.template = self.template.clone();
        config.template_url = self.template_url.clone();
        config.template_id = self.template_id.clone();
        config
    }
}

//! `skein check`: validate a runtime config and page descriptions without
//! rendering anything.

use crate::page::{Page, PageNode};
use anyhow::bail;
use skein_runtime::RuntimeConfig;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub struct CheckArgs {
    pub config: Option<PathBuf>,
    pub pages: Vec<PathBuf>,
}

pub fn execute(args: CheckArgs) -> anyhow::Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    skein_runtime::logging::init(config.logging.filter.as_deref());

    println!("Clock:        {:?}", config.scheduler.clock);
    println!("Max turns:    {}", config.scheduler.max_turns);
    println!("Sources:      {}", config.sources.len());
    for (name, source) in &config.sources {
        println!("  {} = {} {}", name, source.method, source.url);
    }
    println!("Templates:    {}", config.templates.len());

    let mut failed = 0;
    for path in &args.pages {
        let outcome = Page::load(path).and_then(|page| {
            check_page(&config, &page)?;
            Ok(page)
        });
        match outcome {
            Ok(page) => println!("ok    {} ({} nodes)", path.display(), page.node_count()),
            Err(err) => {
                failed += 1;
                println!("error {}: {:#}", path.display(), err);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} pages failed", failed, args.pages.len());
    }
    Ok(())
}

/// Every `source` and every URL-less `template_id` must resolve against the
/// page or the config
pub fn check_page(config: &RuntimeConfig, page: &Page) -> anyhow::Result<()> {
    let sources: BTreeSet<&str> = config
        .sources
        .keys()
        .chain(page.sources.keys())
        .map(String::as_str)
        .collect();
    let templates: BTreeSet<&str> = config
        .templates
        .keys()
        .chain(page.templates.keys())
        .map(String::as_str)
        .collect();

    let mut problems = Vec::new();
    let mut stack: Vec<&PageNode> = page.nodes.iter().collect();
    while let Some(node) = stack.pop() {
        if let Some(source) = &node.source {
            if !sources.contains(source.as_str()) {
                problems.push(format!("node `{}`: unknown source `{}`", node.element, source));
            }
        }
        if let (None, None, Some(tid)) = (&node.template, &node.template_url, &node.template_id) {
            if !templates.contains(tid.as_str()) {
                problems.push(format!("node `{}`: unknown template `{}`", node.element, tid));
            }
        }
        stack.extend(node.children.iter());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        bail!(problems.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig::from_toml_str(
            "[sources.news]\nurl = \"/news.json\"\n[templates]\nshell = \"<p></p>\"\n",
        )
        .unwrap()
    }

    #[test]
    fn test_references_resolve_against_config_and_page() {
        let page = Page::from_toml_str(
            r#"
            [templates]
            local = "<i></i>"

            [[nodes]]
            element = "a"
            template_id = "shell"
            source = "news"

            [[nodes.children]]
            element = "b"
            template_id = "local"
            "#,
        )
        .unwrap();
        check_page(&config(), &page).unwrap();
    }

    #[test]
    fn test_unknown_references_are_listed() {
        let page = Page::from_toml_str(
            r#"
            [[nodes]]
            element = "a"
            template_id = "nope"

            [[nodes.children]]
            element = "b"
            template = "<b></b>"
            source = "gone"
            "#,
        )
        .unwrap();
        let message = check_page(&config(), &page).unwrap_err().to_string();
        assert!(message.contains("unknown template `nope`"));
        assert!(message.contains("unknown source `gone`"));
    }

    #[test]
    fn test_template_ids_with_url_are_not_checked() {
        let page = Page::from_toml_str(
            "[[nodes]]\nelement = \"a\"\ntemplate_url = \"/w.html\"\ntemplate_id = \"card\"\n",
        )
        .unwrap();
        check_page(&config(), &page).unwrap();
    }
}

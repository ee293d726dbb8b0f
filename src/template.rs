//! Template rendering
//!
//! Templates use Jinja-style `{{ name }}` placeholders. Values are inserted
//! verbatim: nothing is escaped, so a value containing `{{` is copied as-is
//! and never re-expanded.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap())
}

/// Render `template` with `vars`. Fails on the first placeholder without a value.
pub fn render_str(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut missing = None;
    let rendered = placeholder_re().replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    if let Some(key) = missing {
        anyhow::bail!("Template variable '{}' has no value", key);
    }
    Ok(rendered.into_owned())
}

/// Render the template at `template_path` into `output_path`
pub fn render_file(
    template_path: &Path,
    output_path: &Path,
    vars: &BTreeMap<String, String>,
) -> Result<()> {
    let template = fs::read_to_string(template_path)
        .with_context(|| format!("Failed to read template: {}", template_path.display()))?;
    let rendered = render_str(&template, vars)
        .with_context(|| format!("Failed to render template: {}", template_path.display()))?;
    fs::write(output_path, rendered)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;
    log::debug!(
        "rendered {} -> {}",
        template_path.display(),
        output_path.display()
    );
    Ok(())
}

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::types::{Component, CrawlResult};

/// Serializes a finished crawl to its structured and human-readable
/// outputs: `<name>-results.json` and `<name>-documentation.md`.
pub fn write_outputs(output_dir: &Path, name: &str, result: &CrawlResult) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("could not create output dir {:?}", output_dir))?;

    let json_path = output_dir.join(format!("{}-results.json", name));
    fs::write(&json_path, to_json(result)?)
        .with_context(|| format!("could not write {:?}", json_path))?;

    let md_path = output_dir.join(format!("{}-documentation.md", name));
    fs::write(&md_path, to_markdown(name, result))
        .with_context(|| format!("could not write {:?}", md_path))?;

    info!(
        "wrote {} components to {:?} and {:?}",
        result.components.len(),
        json_path,
        md_path
    );
    Ok(())
}

pub fn to_json(result: &CrawlResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("could not serialize crawl result")
}

/// Markdown rendering: records grouped by category, a table of contents,
/// then one section per record.
pub fn to_markdown(name: &str, result: &CrawlResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} components\n\n", name));
    out.push_str(&format!(
        "> Source: {} ({} components across {} pages, {} errors)\n\n",
        result.metadata.source,
        result.metadata.total_components,
        result.metadata.total_pages,
        result.metadata.errors.len()
    ));
    if let Some(version) = &result.metadata.version {
        out.push_str(&format!("> Detected version: {}\n\n", version));
    }

    // BTreeMap keeps category order deterministic across runs
    let grouped: BTreeMap<String, Vec<&Component>> = result
        .components
        .iter()
        .map(|c| (c.category.clone().unwrap_or_else(|| "uncategorized".into()), c))
        .into_group_map()
        .into_iter()
        .collect();

    out.push_str("## Contents\n\n");
    for (category, components) in &grouped {
        out.push_str(&format!("- **{}**\n", category));
        for component in components {
            out.push_str(&format!(
                "  - [{}](#{})\n",
                component.name,
                anchor(&component.name)
            ));
        }
    }
    out.push('\n');

    for (category, components) in &grouped {
        out.push_str(&format!("## {}\n\n", category));
        for component in components {
            render_component(&mut out, component);
        }
    }
    out
}

fn render_component(out: &mut String, component: &Component) {
    out.push_str(&format!("### {}\n\n", component.name));
    if let Some(description) = &component.description {
        out.push_str(description);
        out.push_str("\n\n");
    }
    if let Some(installation) = &component.installation {
        out.push_str("**Installation**\n\n```bash\n");
        out.push_str(installation);
        out.push_str("\n```\n\n");
    }
    if !component.dependencies.is_empty() {
        out.push_str(&format!(
            "**Dependencies:** {}\n\n",
            component.dependencies.join(", ")
        ));
    }
    for example in &component.examples {
        out.push_str(&format!("```{}\n{}\n```\n\n", example.language, example.code));
    }
    if !component.props.is_empty() {
        out.push_str("| Prop | Type | Default | Required | Description |\n");
        out.push_str("| --- | --- | --- | --- | --- |\n");
        for prop in &component.props {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                prop.name,
                prop.prop_type.as_deref().unwrap_or("-"),
                prop.default.as_deref().unwrap_or("-"),
                if prop.required { "yes" } else { "no" },
                prop.description.as_deref().unwrap_or("-"),
            ));
        }
        out.push('\n');
    }
    if let Some(demo) = &component.demo_url {
        out.push_str(&format!("[Live demo]({})\n\n", demo));
    }
}

fn anchor(name: &str) -> String {
    name.chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c.to_ascii_lowercase())
            } else if c.is_whitespace() || c == '-' {
                Some('-')
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{CodeExample, CrawlMetadata, PropSpec};
    use chrono::Utc;

    fn sample_result() -> CrawlResult {
        let mut button = Component::new(
            "Button".into(),
            Some("inputs".into()),
            Some("Clickable button".into()),
        );
        button.installation = Some("npm install ui".into());
        button.examples = vec![CodeExample {
            language: "tsx".into(),
            code: "<Button />".into(),
        }];
        button.props = vec![PropSpec {
            name: "variant".into(),
            prop_type: Some("string".into()),
            default: Some("default".into()),
            required: false,
            description: None,
        }];
        let alert = Component::new("Alert Dialog".into(), Some("feedback".into()), None);
        CrawlResult {
            success: true,
            components: vec![button, alert],
            metadata: CrawlMetadata {
                source: "https://x.test/docs".into(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                total_components: 2,
                total_pages: 3,
                errors: vec![],
                version: Some("1.2.3".into()),
            },
        }
    }

    #[test]
    fn markdown_groups_by_category_with_toc() {
        let md = to_markdown("ui", &sample_result());
        assert!(md.starts_with("# ui components"));
        assert!(md.contains("## Contents"));
        // categories sorted deterministically
        let feedback = md.find("## feedback").unwrap();
        let inputs = md.find("## inputs").unwrap();
        assert!(feedback < inputs);
        assert!(md.contains("- [Alert Dialog](#alert-dialog)"));
        assert!(md.contains("```bash\nnpm install ui\n```"));
        assert!(md.contains("```tsx\n<Button />\n```"));
        assert!(md.contains("| variant | string | default | no | - |"));
        assert!(md.contains("Detected version: 1.2.3"));
    }

    #[test]
    fn json_round_trips() {
        let result = sample_result();
        let raw = to_json(&result).unwrap();
        let parsed: CrawlResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.components.len(), 2);
        assert!(parsed.success);
    }

    #[test]
    fn writes_both_output_files() {
        let dir = tempfile::tempdir().unwrap();
        write_outputs(dir.path(), "ui", &sample_result()).unwrap();
        assert!(dir.path().join("ui-results.json").exists());
        assert!(dir.path().join("ui-documentation.md").exists());
    }
}

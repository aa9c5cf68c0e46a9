use std::path::PathBuf;

use action_flow::{Step, StepTree};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::fs;

use super::output::{print_json, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct InspectArgs {
    /// Recorded step file (flat JSON array)
    pub steps: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct TreeNode {
    pub depth: usize,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TreeSummary {
    pub steps: usize,
    pub reachable: usize,
    pub orphans: Vec<String>,
    pub tree: Vec<TreeNode>,
}

pub async fn cmd_inspect(args: InspectArgs, output: OutputFormat) -> Result<()> {
    let raw = fs::read_to_string(&args.steps)
        .await
        .with_context(|| format!("Failed to read step file {}", args.steps.display()))?;
    let tree = StepTree::from_json(&raw).context("Invalid step file")?;
    tree.validate().context("Step tree failed validation")?;

    let summary = summarize(&tree);
    match output {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Human => {
            for node in &summary.tree {
                let mut line = format!(
                    "{}{} [{}] {}",
                    "  ".repeat(node.depth),
                    node.id,
                    node.kind,
                    node.label
                );
                if let Some(detail) = &node.detail {
                    line.push_str("  ");
                    line.push_str(detail);
                }
                println!("{}", line);
            }
            println!(
                "{} steps, {} reachable, {} orphaned",
                summary.steps,
                summary.reachable,
                summary.orphans.len()
            );
            for orphan in &summary.orphans {
                println!("  orphan: {}", orphan);
            }
        }
    }
    Ok(())
}

pub fn summarize(tree: &StepTree) -> TreeSummary {
    let nodes: Vec<TreeNode> = tree
        .walk()
        .into_iter()
        .map(|(depth, step)| TreeNode {
            depth,
            id: step.id.clone(),
            kind: step.kind.to_string(),
            label: step.display_name().to_string(),
            detail: detail(step),
        })
        .collect();
    TreeSummary {
        steps: tree.len(),
        reachable: nodes.len(),
        orphans: tree.orphans().to_vec(),
        tree: nodes,
    }
}

fn detail(step: &Step) -> Option<String> {
    if let Some(url) = step.url.as_deref().filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }
    if step.kind.is_loop() {
        if let Some(source) = step.source.as_deref() {
            return Some(format!("source={}", source));
        }
        if let Some(count) = step.count {
            return Some(format!("count={}", count));
        }
        return None;
    }
    step.selector
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|selector| match step.action.as_deref() {
            Some(action) if !action.is_empty() => format!("{} {}", action, selector),
            _ => selector.to_string(),
        })
}

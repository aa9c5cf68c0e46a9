use std::path::PathBuf;

use action_locator::{rank, CandidateGenerator, ElementMetadata, SelectorCandidate};
use anyhow::{Context, Result};
use clap::Args;
use tokio::fs;

use super::output::{print_json, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct CandidatesArgs {
    /// Captured element metadata (JSON object; a recorded step works too)
    pub element: PathBuf,

    /// Dom path to use when none was captured
    #[arg(long)]
    pub fallback_path: Option<String>,

    /// Skip text candidates for texts longer than this
    #[arg(long, default_value_t = 100)]
    pub max_text_len: usize,
}

pub async fn cmd_candidates(args: CandidatesArgs, output: OutputFormat) -> Result<()> {
    let raw = fs::read_to_string(&args.element)
        .await
        .with_context(|| format!("Failed to read element file {}", args.element.display()))?;
    let meta: ElementMetadata =
        serde_json::from_str(&raw).context("Invalid element metadata")?;

    let candidates = ranked_candidates(&meta, args.fallback_path.as_deref(), args.max_text_len);
    match output {
        OutputFormat::Json => print_json(&candidates)?,
        OutputFormat::Human => {
            if candidates.is_empty() {
                println!("No candidates for this element");
            }
            for (position, candidate) in candidates.iter().enumerate() {
                println!(
                    "{:>2}. {:>4}  {:<16} {}",
                    position + 1,
                    candidate.score,
                    candidate.source.to_string(),
                    candidate.selector
                );
            }
        }
    }
    Ok(())
}

/// Generated candidates, best first. No page is consulted.
pub fn ranked_candidates(
    meta: &ElementMetadata,
    fallback_path: Option<&str>,
    max_text_len: usize,
) -> Vec<SelectorCandidate> {
    let generator = CandidateGenerator { max_text_len };
    let mut candidates = generator.generate_with_fallback(meta, fallback_path);
    rank(&mut candidates);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_scores_come_first() {
        let meta: ElementMetadata = serde_json::from_str(
            r#"{"tagName":"BUTTON","elementId":"submit","attributes":{"data-testid":"submit"},"elementText":"Send"}"#,
        )
        .unwrap();
        let candidates = ranked_candidates(&meta, None, 100);
        let scores: Vec<i32> = candidates.iter().map(|c| c.score).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(scores, sorted);
        assert_eq!(candidates[0].selector, "#submit");
        assert!(candidates.iter().any(|c| c.selector == "[data-testid=\"submit\"]"));
    }

    #[test]
    fn fallback_path_is_used_without_a_recorded_one() {
        let meta = ElementMetadata {
            tag_name: Some("td".to_string()),
            ..ElementMetadata::default()
        };
        let candidates = ranked_candidates(&meta, Some("table > tr > td"), 100);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].selector, "table > tr > td");
    }
}

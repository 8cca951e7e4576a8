//! Validation of the agent's JSON analysis payload.
//!
//! A run only counts as successful once its result text parses into an
//! [`AnalysisPayload`]. Anything else is reported as a schema validation
//! failure, which the queue treats as permanent: retrying an agent that
//! answered in prose costs money and tends to produce prose again.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Parsed analysis result.
///
/// `summary` is the only required field. Everything else the analyzer
/// emits (topics, decisions, open questions, connections) rides along in
/// `extra` and is stored verbatim on the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub summary: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Parse the agent's result text into a payload.
///
/// Accepts a bare JSON object or one wrapped in a markdown code fence,
/// which agents add despite instructions not to.
pub fn extract_payload(text: &str) -> Result<AnalysisPayload> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        bail!("analysis payload failed schema validation: agent returned no result text");
    }
    let payload = parse_payload(trimmed).or_else(|first_err| {
        let unfenced = strip_code_fences(trimmed);
        if unfenced == trimmed {
            Err(first_err)
        } else {
            parse_payload(&unfenced)
        }
    })?;
    if payload.summary.trim().is_empty() {
        bail!("analysis payload failed schema validation: summary is empty");
    }
    Ok(payload)
}

fn parse_payload(candidate: &str) -> Result<AnalysisPayload> {
    serde_json::from_str(candidate).context("analysis payload failed schema validation")
}

/// Drop markdown code fences around a JSON block. Returns the input
/// unchanged when no fence is present.
fn strip_code_fences(text: &str) -> String {
    let mut inside = false;
    let mut collected: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            collected.push(line);
        }
    }
    if collected.is_empty() {
        text.to_string()
    } else {
        collected.join("\n")
    }
}

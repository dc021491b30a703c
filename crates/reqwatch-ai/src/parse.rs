//! Strict parsing of model output into draft artifacts.
//!
//! Accepted shape: one JSON object, optionally wrapped in a single markdown
//! code fence, with the artifacts under `"stories"` (user stories) or
//! `"test_cases"` (test cases). Anything else is an error; there is no
//! best-effort recovery from free text.

use reqwatch_core::{ArtifactKind, DraftArtifact};
use serde::Deserialize;

use crate::GenerateError;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    stories: Option<Vec<RawArtifact>>,
    #[serde(default)]
    test_cases: Option<Vec<RawArtifact>>,
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    #[serde(alias = "heading")]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "steps", alias = "test_steps")]
    acceptance_criteria: Criteria,
}

/// Criteria come back as a list or as one newline-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Criteria {
    List(Vec<String>),
    Text(String),
}

impl Default for Criteria {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Criteria {
    fn into_lines(self) -> Vec<String> {
        let lines = match self {
            Self::List(items) => items,
            Self::Text(text) => text.lines().map(str::to_string).collect(),
        };
        lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// Parse a model response into drafts of the requested kind.
pub fn parse_artifacts(content: &str, kind: ArtifactKind) -> Result<Vec<DraftArtifact>, GenerateError> {
    let body = strip_fence(content.trim());
    if body.is_empty() {
        return Err(GenerateError::EmptyResponse);
    }

    let envelope: Envelope = serde_json::from_str(body)?;
    let (items, key) = match kind {
        ArtifactKind::UserStory => (envelope.stories, "stories"),
        ArtifactKind::TestCase => (envelope.test_cases, "test_cases"),
    };
    let Some(items) = items else {
        return Err(GenerateError::Invalid {
            index: 0,
            reason: format!("missing \"{key}\" array"),
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let title = raw.title.trim();
            if title.is_empty() {
                return Err(GenerateError::Invalid {
                    index,
                    reason: "empty title".into(),
                });
            }
            Ok(DraftArtifact {
                title: title.to_string(),
                description: raw.description.trim().to_string(),
                acceptance_criteria: raw.acceptance_criteria.into_lines(),
            })
        })
        .collect()
}

fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

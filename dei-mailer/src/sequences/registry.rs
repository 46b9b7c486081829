//! Sequence catalog
//!
//! Nurture sequences are data, not code: a TOML catalog lists each
//! sequence's id, vertical and timed steps. The built-in catalog is compiled
//! into the binary; `sequences_file` in the config replaces it.
//!
//! ```toml
//! [[sequence]]
//! id = "gym-nurture"
//! vertical = "gym"
//! name = "Gym nurture"
//!
//! [[sequence.step]]
//! step_number = 1
//! delay_days = 0
//! subject = "Welcome, {{contact_name}}"
//! text = "..."
//! ```

use super::template::{self, TemplateData, TemplateError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read sequence catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse sequence catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Sequence catalog is empty")]
    Empty,

    #[error("Duplicate sequence id or vertical: {0}")]
    Duplicate(String),

    #[error("Sequence {0} has no steps")]
    NoSteps(String),

    #[error("Sequence {sequence}: expected step {expected}, found {found}")]
    StepOrder {
        sequence: String,
        expected: u32,
        found: u32,
    },

    #[error("Sequence {sequence}: step {step} delay must be later than the previous step")]
    DelayOrder { sequence: String, step: u32 },

    #[error("Sequence {sequence}: step {step} {problem}")]
    InvalidStep {
        sequence: String,
        step: u32,
        problem: &'static str,
    },

    #[error("Sequence {sequence}: step {step}: {source}")]
    Template {
        sequence: String,
        step: u32,
        source: TemplateError,
    },
}

/// One timed message of a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub step_number: u32,
    /// Days after enrollment
    pub delay_days: u32,
    pub subject: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    /// Stored as `email_sequences.sequence_type`
    pub id: String,
    pub vertical: String,
    pub name: String,
    #[serde(rename = "step", default)]
    pub steps: Vec<SequenceStep>,
}

/// A step with placeholders filled in
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStep {
    pub step_number: u32,
    pub delay_days: u32,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

impl SequenceDefinition {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Render every step for one lead
    pub fn render(&self, data: &TemplateData) -> Result<Vec<RenderedStep>, CatalogError> {
        self.steps
            .iter()
            .map(|step| -> Result<RenderedStep, CatalogError> {
                let wrap = |source| CatalogError::Template {
                    sequence: self.id.clone(),
                    step: step.step_number,
                    source,
                };
                Ok(RenderedStep {
                    step_number: step.step_number,
                    delay_days: step.delay_days,
                    subject: template::render_text(&step.subject, data).map_err(wrap)?,
                    html: step
                        .html
                        .as_deref()
                        .map(|html| template::render_html(html, data))
                        .transpose()
                        .map_err(wrap)?,
                    text: step
                        .text
                        .as_deref()
                        .map(|text| template::render_text(text, data))
                        .transpose()
                        .map_err(wrap)?,
                })
            })
            .collect()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.steps.is_empty() {
            return Err(CatalogError::NoSteps(self.id.clone()));
        }

        let mut previous_delay: Option<u32> = None;
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.step_number != expected {
                return Err(CatalogError::StepOrder {
                    sequence: self.id.clone(),
                    expected,
                    found: step.step_number,
                });
            }
            if previous_delay.is_some_and(|prev| step.delay_days <= prev) {
                return Err(CatalogError::DelayOrder {
                    sequence: self.id.clone(),
                    step: step.step_number,
                });
            }
            previous_delay = Some(step.delay_days);

            let invalid = |problem| CatalogError::InvalidStep {
                sequence: self.id.clone(),
                step: step.step_number,
                problem,
            };
            if step.subject.trim().is_empty() {
                return Err(invalid("has an empty subject"));
            }
            let has_body = |body: &Option<String>| body.as_deref().is_some_and(|b| !b.trim().is_empty());
            if !has_body(&step.html) && !has_body(&step.text) {
                return Err(invalid("needs an html or text body"));
            }

            for part in [Some(&step.subject), step.html.as_ref(), step.text.as_ref()]
                .into_iter()
                .flatten()
            {
                template::check(part).map_err(|source| CatalogError::Template {
                    sequence: self.id.clone(),
                    step: step.step_number,
                    source,
                })?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "sequence", default)]
    sequences: Vec<SequenceDefinition>,
}

/// Validated set of sequences, addressable by id or vertical
#[derive(Debug, Clone)]
pub struct SequenceRegistry {
    sequences: Vec<SequenceDefinition>,
}

impl SequenceRegistry {
    /// The catalog shipped with the binary
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::new(file.sequences)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            sequences = registry.sequences.len(),
            "Loaded sequence catalog"
        );
        Ok(registry)
    }

    /// `path` if given, otherwise the built-in catalog
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn new(sequences: Vec<SequenceDefinition>) -> Result<Self, CatalogError> {
        if sequences.is_empty() {
            return Err(CatalogError::Empty);
        }

        // ids and verticals share one namespace for lookup
        let mut keys = HashSet::new();
        for sequence in &sequences {
            sequence.validate()?;
            let own: HashSet<&str> = [sequence.id.as_str(), sequence.vertical.as_str()].into();
            for key in own {
                if !keys.insert(key) {
                    return Err(CatalogError::Duplicate(key.to_string()));
                }
            }
        }

        Ok(Self { sequences })
    }

    pub fn get(&self, id: &str) -> Option<&SequenceDefinition> {
        self.sequences.iter().find(|s| s.id == id)
    }

    /// Look up by sequence id, falling back to vertical
    pub fn resolve(&self, key: &str) -> Option<&SequenceDefinition> {
        self.get(key)
            .or_else(|| self.sequences.iter().find(|s| s.vertical == key))
    }

    pub fn list(&self) -> &[SequenceDefinition] {
        &self.sequences
    }
}

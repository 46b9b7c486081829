//! `{{placeholder}}` expansion for sequence templates

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Names a template may reference
pub const PLACEHOLDERS: [&str; 4] = [
    "contact_name",
    "company_name",
    "estimated_revenue",
    "vertical",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder {{{{{0}}}}}")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Per-lead values substituted into a sequence's templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateData {
    pub contact_name: String,
    pub company_name: String,
    /// Estimated monthly revenue in dollars
    pub estimated_revenue: f64,
    pub vertical: String,
}

impl TemplateData {
    fn value(&self, name: &str) -> Option<String> {
        match name {
            "contact_name" => Some(self.contact_name.clone()),
            "company_name" => Some(self.company_name.clone()),
            "estimated_revenue" => Some(format!("{:.2}", self.estimated_revenue)),
            "vertical" => Some(self.vertical.clone()),
            _ => None,
        }
    }
}

/// Check that every placeholder in `template` is known
pub fn check(template: &str) -> Result<(), TemplateError> {
    expand(template, |name| {
        PLACEHOLDERS.contains(&name).then(String::new)
    })
    .map(|_| ())
}

/// Render plain text (subjects, text bodies)
pub fn render_text(template: &str, data: &TemplateData) -> Result<String, TemplateError> {
    expand(template, |name| data.value(name))
}

/// Render HTML, escaping substituted values
pub fn render_html(template: &str, data: &TemplateData) -> Result<String, TemplateError> {
    expand(template, |name| data.value(name).map(|v| escape_html(&v)))
}

fn expand(
    template: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or(TemplateError::Unterminated(offset + start))?;
        let name = after_open[..end].trim();
        let value =
            lookup(name).ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(&value);

        let consumed = start + 2 + end + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    out.push_str(rest);

    Ok(out)
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

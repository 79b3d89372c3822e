//! Template substitution.
//!
//! The renderer is opaque to the builders; anything that can substitute
//! `{{ name }}` placeholders from a field map will do.

use super::EnvelopeFields;
use crate::domain::EnvelopeError;

/// Text-substitution service.
pub trait TemplateRenderer: Send + Sync {
    /// Substitute every placeholder. Values are inserted verbatim.
    fn render(&self, template: &str, values: &EnvelopeFields) -> Result<String, EnvelopeError>;
}

/// Minimal `{{ name }}` renderer.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, values: &EnvelopeFields) -> Result<String, EnvelopeError> {
        let mut out = String::with_capacity(template.len() + 256);
        let mut rest = template;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or(EnvelopeError::MalformedTemplate(offset + open))?;
            let name = after[..close].trim();
            let value = values
                .get(name)
                .ok_or_else(|| EnvelopeError::MissingField(name.to_string()))?;
            out.push_str(value);

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

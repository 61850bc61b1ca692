// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Minimal prompt templates: `{{variable}}` substitution over a string.
//! Rendering is treated as opaque string-in/string-out by everything
//! downstream.

use std::collections::HashMap;

use regex::Regex;

use conduit_model::ConduitError;

#[derive(Debug, Clone)]
pub struct Prompt {
    template: String,
}

impl Prompt {
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into() }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Variable names referenced by the template, in order of first mention.
    pub fn input_variables(&self) -> Vec<String> {
        let re = Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("static regex must compile");
        let mut seen = Vec::new();
        for cap in re.captures_iter(&self.template) {
            let name = cap[1].to_string();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    /// Substitute every placeholder.  Every referenced variable must be
    /// supplied; unused extras are ignored.
    pub fn render(&self, variables: &HashMap<String, String>) -> Result<String, ConduitError> {
        let missing: Vec<String> = self
            .input_variables()
            .into_iter()
            .filter(|name| !variables.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(ConduitError::validation(format!(
                "missing template variables: {}",
                missing.join(", "),
            )));
        }
        let re = Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("static regex must compile");
        let rendered = re.replace_all(&self.template, |caps: &regex::Captures<'_>| {
            variables[&caps[1]].clone()
        });
        Ok(rendered.into_owned())
    }

    /// Render a template that takes no variables.
    pub fn render_plain(&self) -> Result<String, ConduitError> {
        self.render(&HashMap::new())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn render_substitutes_variables() {
        let p = Prompt::new("Name one {{kind}} that lives in {{place}}.");
        let out = p.render(&vars(&[("kind", "mammal"), ("place", "the sea")])).unwrap();
        assert_eq!(out, "Name one mammal that lives in the sea.");
    }

    #[test]
    fn render_handles_whitespace_in_braces() {
        let p = Prompt::new("Hello {{ name }}!");
        assert_eq!(p.render(&vars(&[("name", "world")])).unwrap(), "Hello world!");
    }

    #[test]
    fn repeated_variable_substitutes_everywhere() {
        let p = Prompt::new("{{x}} and {{x}}");
        assert_eq!(p.render(&vars(&[("x", "a")])).unwrap(), "a and a");
    }

    #[test]
    fn input_variables_in_order_without_duplicates() {
        let p = Prompt::new("{{b}} {{a}} {{b}}");
        assert_eq!(p.input_variables(), vec!["b", "a"]);
    }

    #[test]
    fn missing_variable_is_validation_error() {
        let p = Prompt::new("Hello {{name}}!");
        let err = p.render(&HashMap::new()).unwrap_err();
        assert_eq!(err.info.code, "validation_error");
        assert!(err.info.message.contains("name"));
    }

    #[test]
    fn extra_variables_are_ignored() {
        let p = Prompt::new("static text");
        assert_eq!(p.render(&vars(&[("unused", "x")])).unwrap(), "static text");
    }

    #[test]
    fn plain_template_renders_verbatim() {
        let p = Prompt::new("no placeholders here");
        assert_eq!(p.render_plain().unwrap(), "no placeholders here");
    }
}

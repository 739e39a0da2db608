//! Prompt templates
//!
//! A template is plain text with `{name}` placeholders, a separate system
//! instruction and an optional prefill: the forced start of the model's reply.
//! Each template instance owns its own text and variables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use crate::error::{RagError, RagResult};

static PLACEHOLDER_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    template: String,
    #[serde(default)]
    system_prompt: String,
    #[serde(default, deserialize_with = "non_empty")]
    prefill: Option<String>,
    input_variables: Vec<String>,
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl PromptTemplate {
    pub fn new<I, S>(template: impl Into<String>, input_variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let template = Self {
            template: template.into(),
            system_prompt: String::new(),
            prefill: None,
            input_variables: input_variables.into_iter().map(Into::into).collect(),
        };

        let undeclared = template.undeclared_placeholders();
        if !undeclared.is_empty() {
            tracing::debug!(
                placeholders = ?undeclared,
                "Template contains placeholders that are not input variables; they stay literal"
            );
        }
        template
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// An empty prefill is the same as no prefill.
    pub fn with_prefill(mut self, prefill: impl Into<String>) -> Self {
        let prefill = prefill.into();
        self.prefill = if prefill.is_empty() { None } else { Some(prefill) };
        self
    }

    /// Substitute every input variable.
    ///
    /// Fails with a configuration error when an input variable is missing.
    pub fn render(&self, variables: &HashMap<&str, String>) -> RagResult<String> {
        let mut prompt = self.template.clone();

        for name in &self.input_variables {
            let value = variables.get(name.as_str()).ok_or_else(|| {
                RagError::Configuration(format!(
                    "prompt variable '{}' was not provided",
                    name
                ))
            })?;
            prompt = prompt.replace(&format!("{{{}}}", name), value);
        }
        Ok(prompt)
    }

    /// [`render`](Self::render) followed by the prefill, for completion-style
    /// callers that send a single prompt string.
    pub fn format(&self, variables: &HashMap<&str, String>) -> RagResult<String> {
        let mut prompt = self.render(variables)?;
        if let Some(prefill) = &self.prefill {
            prompt.push('\n');
            prompt.push_str(prefill);
        }
        Ok(prompt)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn prefill(&self) -> Option<&str> {
        self.prefill.as_deref()
    }

    pub fn has_prefill(&self) -> bool {
        self.prefill.is_some()
    }

    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    fn undeclared_placeholders(&self) -> BTreeSet<String> {
        PLACEHOLDER_RE
            .captures_iter(&self.template)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|name| !self.input_variables.iter().any(|v| v == name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_format_substitutes_every_occurrence() {
        let template = PromptTemplate::new(
            "Q: {question}\nAgain: {question}\nContext: {context}",
            ["question", "context"],
        );
        let prompt = template
            .format(&vars(&[("question", "best heist movie?"), ("context", "")]))
            .unwrap();
        assert_eq!(prompt, "Q: best heist movie?\nAgain: best heist movie?\nContext: ");
    }

    #[test]
    fn test_missing_variable_is_configuration_error() {
        let template = PromptTemplate::new("{question} {memory}", ["question", "memory"]);
        let err = template.format(&vars(&[("question", "hi")])).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn test_prefill_appended_after_separator() {
        let template = PromptTemplate::new("Is retrieval needed for {question}?", ["question"])
            .with_system_prompt("You decide.")
            .with_prefill("<answer>");
        let prompt = template.format(&vars(&[("question", "x")])).unwrap();
        assert_eq!(prompt, "Is retrieval needed for x?\n<answer>");
        assert!(template.has_prefill());
        assert_eq!(template.system_prompt(), "You decide.");
        assert_eq!(template.render(&vars(&[("question", "x")])).unwrap(), "Is retrieval needed for x?");
    }

    #[test]
    fn test_empty_prefill_is_none() {
        let template = PromptTemplate::new("{question}", ["question"]).with_prefill("");
        assert!(!template.has_prefill());
        assert_eq!(template.format(&vars(&[("question", "q")])).unwrap(), "q");
    }

    #[test]
    fn test_undeclared_braces_stay_literal() {
        let template = PromptTemplate::new(r#"Reply as {"sort_by": "year"} for {question}"#, ["question"]);
        let prompt = template.format(&vars(&[("question", "q")])).unwrap();
        assert_eq!(prompt, r#"Reply as {"sort_by": "year"} for q"#);
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let a = PromptTemplate::new("{a}", ["a"]).with_prefill("x");
        let b = PromptTemplate::new("{b}", ["b"]);
        assert!(a.has_prefill());
        assert!(!b.has_prefill());
        assert_eq!(b.input_variables(), &["b".to_string()]);
    }

    #[test]
    fn test_deserialize_treats_empty_prefill_as_none() {
        let json = r#"{"template":"{question}","system_prompt":"s","prefill":"","input_variables":["question"]}"#;
        let template: PromptTemplate = serde_json::from_str(json).unwrap();
        assert!(!template.has_prefill());
    }
}

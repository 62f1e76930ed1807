//! Prompt template for QA generation.
//!
//! The template carries three placeholders (`{domain}`, `{qa_count}`, and
//! `{chunk}`) substituted per chunk. Operators can replace the active
//! template; it is persisted as `prompt.txt` beside the projects root so every
//! run picks it up.

use std::fs;
use std::path::Path;

const PROMPT_FILE: &str = "prompt.txt";

/// Built-in template used when no override has been saved.
pub const DEFAULT_TEMPLATE: &str = r#"Context Domain: {domain}.

You are a helpful assistant that generates Question-Answer pairs from text.
Please create exactly {qa_count} high-quality QA pairs based on the following text chunk.

Text Chunk:
{chunk}

Instructions:
1. Cover important facts in the chunk.
2. Behave like a normal helpful LLM.
3. You may expand slightly for clarity, but stick to the facts in the text.
4. Output MUST be a valid JSON list of objects strictly following this structure:
[
  {"question": "The generated question", "answer": "The generated answer"}
]
5. Do not include any explanation, only the raw JSON list.
"#;

/// A QA-generation prompt with per-chunk substitution.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Wrap a custom template string.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Load the persisted override from `root`, or fall back to the default.
    pub fn load_or_default(root: &Path) -> Self {
        match fs::read_to_string(root.join(PROMPT_FILE)) {
            Ok(text) if !text.trim().is_empty() => Self::new(text),
            _ => Self::default(),
        }
    }

    /// Persist a template override beside the projects root.
    pub fn save(root: &Path, template: &str) -> std::io::Result<()> {
        fs::write(root.join(PROMPT_FILE), template)
    }

    /// Raw template text.
    pub fn text(&self) -> &str {
        &self.template
    }

    /// Substitute the chunk-specific values into the template.
    pub fn render(&self, domain: &str, qa_count: usize, chunk: &str) -> String {
        self.template
            .replace("{domain}", domain)
            .replace("{qa_count}", &qa_count.to_string())
            .replace("{chunk}", chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_placeholders() {
        let template = PromptTemplate::default();
        let prompt = template.render("biology", 3, "Cells divide by mitosis.");
        assert!(prompt.contains("Context Domain: biology."));
        assert!(prompt.contains("exactly 3 high-quality"));
        assert!(prompt.contains("Cells divide by mitosis."));
        assert!(!prompt.contains("{chunk}"));
    }

    #[test]
    fn render_preserves_json_example_braces() {
        let template = PromptTemplate::default();
        let prompt = template.render("general", 1, "text");
        assert!(prompt.contains(r#"{"question": "The generated question""#));
    }

    #[test]
    fn load_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let template = PromptTemplate::load_or_default(dir.path());
        assert_eq!(template.text(), DEFAULT_TEMPLATE);

        PromptTemplate::save(dir.path(), "custom {domain}").unwrap();
        let template = PromptTemplate::load_or_default(dir.path());
        assert_eq!(template.text(), "custom {domain}");
    }
}

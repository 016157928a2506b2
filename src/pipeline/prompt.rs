//! Prompt templating and response clean-up around the LLM call.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, LlmProvider};

/// Responses starting with this are upstream error reports, not content.
pub const UPSTREAM_ERROR_TOKEN: &str = "API";

pub const JOB_DESCRIPTION_MARKERS: &[&str] =
    &["[請在此貼上 Job Description 內容]", "{{job_description}}"];
pub const BENCHMARK_MARKERS: &[&str] = &["[請在此貼上 Sample CV 內容]", "{{benchmark_cv}}"];
pub const CANDIDATE_MARKERS: &[&str] = &["[請在此貼上新的候選人履歷]", "{{candidate}}"];
pub const REPORT_MARKERS: &[&str] = &["[在此放入完整報告內容]", "{{report}}"];

/// Used when no `html_to_markdown` prompt is stored.
pub const DEFAULT_CONVERSION_PROMPT: &str = "Convert the following HTML resume into clean, \
well-structured Markdown. Keep every fact, use headings for sections, and write contact \
details as `Label: value` lines.";

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*```(?:[A-Za-z0-9_+-]+)?[ \t]*\n?([\s\S]*?)\n?\s*```\s*$")
        .expect("fence pattern is valid")
});

static REPORT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<report>([\s\S]*?)</report>").expect("report pattern is valid")
});

/// Substitute `value` for every occurrence of any of `markers`.
pub fn fill(template: &str, markers: &[&str], value: &str) -> String {
    markers
        .iter()
        .fold(template.to_string(), |acc, marker| acc.replace(marker, value))
}

pub fn has_marker(template: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| template.contains(m))
}

/// Unwrap a response that is entirely enclosed in a code fence.
///
/// Text that is not fully fenced is returned trimmed but otherwise intact.
pub fn strip_code_fence(text: &str) -> String {
    match CODE_FENCE.captures(text) {
        Some(c) => c[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// The text between the first `<report>` and `</report>` pair.
pub fn extract_report_block(text: &str) -> Option<&str> {
    REPORT_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Send one free-form prompt and return the generated text.
///
/// Empty output and upstream error reports are failures.
pub async fn generate(llm: &dyn LlmProvider, prompt: &str) -> Result<String, LlmError> {
    let response = llm.complete(CompletionRequest::new(prompt)).await?;
    tracing::debug!(
        model = %llm.model_name(),
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "LLM call finished"
    );
    let text = response.content.trim();

    if text.is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: llm.model_name().to_string(),
        });
    }
    if text.starts_with(UPSTREAM_ERROR_TOKEN) {
        return Err(LlmError::Upstream {
            provider: llm.model_name().to_string(),
            message: text.chars().take(200).collect(),
        });
    }
    Ok(response.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;

    struct FixedLlm(&'static str);

    #[async_trait::async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            assert!(!request.prompt.is_empty());
            Ok(CompletionResponse {
                content: self.0.to_string(),
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    #[test]
    fn fenced_markdown_is_unwrapped() {
        let body = "# 王小明\n\nEmail: wang@example.com";
        let fenced = format!("```markdown\n{body}\n```");
        assert_eq!(strip_code_fence(&fenced), strip_code_fence(body));
        assert_eq!(strip_code_fence(&fenced), body);
    }

    #[test]
    fn bare_fence_and_padding_are_unwrapped() {
        assert_eq!(strip_code_fence("  ```\nplain\n```  \n"), "plain");
        assert_eq!(strip_code_fence("```md\nx\n```"), "x");
    }

    #[test]
    fn partial_fences_are_left_alone() {
        let text = "Intro\n```\ncode\n```\nOutro";
        assert_eq!(strip_code_fence(text), text);
    }

    #[test]
    fn fill_replaces_every_marker_form() {
        let template = "JD: [請在此貼上 Job Description 內容]\nAgain: {{job_description}}";
        assert_eq!(
            fill(template, JOB_DESCRIPTION_MARKERS, "Rust dev"),
            "JD: Rust dev\nAgain: Rust dev"
        );
        assert!(has_marker(template, JOB_DESCRIPTION_MARKERS));
        assert!(!has_marker(template, CANDIDATE_MARKERS));
    }

    #[test]
    fn report_block_is_found() {
        let text = "Summarize:\n<report>\n**候選人姓名**：王小明\n</report>\nThanks";
        assert_eq!(
            extract_report_block(text),
            Some("\n**候選人姓名**：王小明\n")
        );
        assert!(extract_report_block("no tags").is_none());
    }

    #[tokio::test]
    async fn generate_rejects_empty_and_upstream_errors() {
        assert!(matches!(
            generate(&FixedLlm("   "), "p").await,
            Err(LlmError::EmptyResponse { .. })
        ));
        assert!(matches!(
            generate(&FixedLlm("API error: quota exceeded"), "p").await,
            Err(LlmError::Upstream { .. })
        ));
        assert_eq!(generate(&FixedLlm("fine"), "p").await.unwrap(), "fine");
    }
}

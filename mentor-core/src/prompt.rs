//! Default prompts and question templating.

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI agent helping users.";

pub const DEFAULT_QUESTION_TEMPLATE: &str = "I'm writing Python, and here's my code: {code} \
and I received this error: {error} Hint in Socratic style:";

/// Renders the user question from a template, substituting the first
/// `{code}` and `{error}` placeholders. A template without placeholders is
/// returned as-is.
pub fn render_question(template: &str, code: &str, error: &str) -> String {
    template
        .replacen("{code}", code, 1)
        .replacen("{error}", error, 1)
}

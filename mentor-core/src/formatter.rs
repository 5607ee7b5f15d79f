//! Display formatting for raw model output.
//!
//! A single left-to-right scan inserts a line break after every occurrence
//! of the delimiter character and truncates the text at the early-stop
//! sentinel when detection is enabled.

/// Configuration for [`format_response`].
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Character after which a line break is inserted.
    pub delimiter: char,
    /// Text inserted after each delimiter occurrence. The terminal UI wants
    /// `"\n"`; an HTML renderer would use `"<br>"`.
    pub line_break: String,
    /// Substring marking that the model intends to end its turn.
    pub stop_sentinel: String,
    /// When false the sentinel is passed through like ordinary text.
    pub detect_stop: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            delimiter: '?',
            line_break: "\n".to_string(),
            stop_sentinel: "<|im_end|>".to_string(),
            detect_stop: true,
        }
    }
}

/// Result of formatting a (possibly partial) model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedResponse {
    pub text: String,
    /// True when the early-stop sentinel was found. Nothing at or past the
    /// sentinel appears in `text`.
    pub stop_detected: bool,
}

/// Transforms raw model output into its display form. Pure: same input and
/// options always yield the same output. Input containing neither the
/// delimiter nor the sentinel is returned unchanged.
pub fn format_response(raw: &str, opts: &FormatOptions) -> FormattedResponse {
    let mut text = String::with_capacity(raw.len());
    let mut stop_detected = false;

    for (idx, ch) in raw.char_indices() {
        if opts.detect_stop
            && !opts.stop_sentinel.is_empty()
            && raw[idx..].starts_with(opts.stop_sentinel.as_str())
        {
            stop_detected = true;
            break;
        }
        text.push(ch);
        if ch == opts.delimiter {
            text.push_str(&opts.line_break);
        }
    }

    FormattedResponse {
        text,
        stop_detected,
    }
}

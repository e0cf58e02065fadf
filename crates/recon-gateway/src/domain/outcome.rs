//! Results produced by the command bridge.

use crate::domain::error::ExecutionError;

/// Marker that introduces a two-character formatting code.
pub const FORMAT_MARKER: char = '§';

/// Lines captured from one execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Output with formatting codes preserved
    pub rich_text: String,
    /// Output with formatting codes removed
    pub plain_text: String,
}

impl CapturedOutput {
    /// Join `lines` with `\n` and derive the plain form.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rich_text = String::new();
        for (i, line) in lines.into_iter().enumerate() {
            if i > 0 {
                rich_text.push('\n');
            }
            rich_text.push_str(line.as_ref());
        }
        let plain_text = strip_formatting(&rich_text);
        Self {
            rich_text,
            plain_text,
        }
    }

    /// No output
    pub fn is_empty(&self) -> bool {
        self.rich_text.is_empty()
    }
}

/// Remove `§x` formatting codes, where `x` is one of `0-9`, `a-f`, `k-o`, `r`
/// (either case). A marker followed by anything else is kept verbatim.
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == FORMAT_MARKER {
            if let Some(&code) = chars.peek() {
                if is_format_code(code) {
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn is_format_code(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), '0'..='9' | 'a'..='f' | 'k'..='o' | 'r')
}

/// Unified result of one bridge invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// The dispatch's own success signal
    pub success: bool,
    /// Output with formatting preserved
    pub rich_text: String,
    /// Output with formatting stripped
    pub plain_text: String,
    /// Reason when `success` is false
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Text returned for a command parked in the offline queue.
    pub const QUEUED: &'static str = "queued";

    /// Dispatch ran; `dispatched` is its return value.
    pub fn completed(dispatched: bool, output: CapturedOutput) -> Self {
        Self {
            success: dispatched,
            rich_text: output.rich_text,
            plain_text: output.plain_text,
            error: (!dispatched).then(|| ExecutionError::DispatchReturnedFailure.to_string()),
        }
    }

    /// Command parked for an offline actor.
    pub fn queued() -> Self {
        Self {
            success: true,
            rich_text: Self::QUEUED.to_string(),
            plain_text: Self::QUEUED.to_string(),
            error: None,
        }
    }

    /// Bridge-internal failure.
    pub fn failed(error: &ExecutionError) -> Self {
        Self {
            success: false,
            rich_text: String::new(),
            plain_text: String::new(),
            error: Some(error.to_string()),
        }
    }
}

//! Typed interpreter results.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

/// Outcome of an interpret call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum Code {
    Success,
    Incomplete,
    Error,
    /// Leave whatever the paragraph showed before untouched.
    KeepPreviousResult,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Success => "SUCCESS",
            Code::Incomplete => "INCOMPLETE",
            Code::Error => "ERROR",
            Code::KeepPreviousResult => "KEEP_PREVIOUS_RESULT",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the front-end should display a result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ResultType {
    Text,
    Html,
    Angular,
    Table,
    Img,
    Svg,
    Null,
}

impl ResultType {
    const ALL: [ResultType; 7] = [
        ResultType::Text,
        ResultType::Html,
        ResultType::Angular,
        ResultType::Table,
        ResultType::Img,
        ResultType::Svg,
        ResultType::Null,
    ];

    /// Directive name without the leading `%`.
    pub fn directive(&self) -> &'static str {
        match self {
            ResultType::Text => "text",
            ResultType::Html => "html",
            ResultType::Angular => "angular",
            ResultType::Table => "table",
            ResultType::Img => "img",
            ResultType::Svg => "svg",
            ResultType::Null => "null",
        }
    }

    fn from_directive(directive: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.directive().eq_ignore_ascii_case(directive))
    }
}

/// Result of running a code fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterResult {
    code: Code,
    result_type: ResultType,
    message: String,
}

impl InterpreterResult {
    /// Build a result, taking the display type from a leading `%type` directive.
    ///
    /// `"%table a\tb"` becomes a table result with message `"a\tb"`. Messages
    /// without a known directive are text.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        let message = message.into();
        match split_directive(&message) {
            Some((result_type, rest)) => Self {
                code,
                result_type,
                message: rest.to_string(),
            },
            None => Self {
                code,
                result_type: ResultType::Text,
                message,
            },
        }
    }

    /// Build a result with an explicit type; the message is kept verbatim.
    pub fn with_type(code: Code, result_type: ResultType, message: impl Into<String>) -> Self {
        Self {
            code,
            result_type,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Code::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_type(Code::Error, ResultType::Text, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }
}

impl fmt::Display for InterpreterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result_type {
            ResultType::Text => f.write_str(&self.message),
            other => write!(f, "%{} {}", other.directive(), self.message),
        }
    }
}

fn split_directive(message: &str) -> Option<(ResultType, &str)> {
    let body = message.strip_prefix('%')?;
    let end = body
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(body.len());
    let result_type = ResultType::from_directive(&body[..end])?;

    // Drop exactly one separator after the directive.
    let rest = &body[end..];
    let rest = rest
        .char_indices()
        .nth(1)
        .map(|(idx, _)| &rest[idx..])
        .unwrap_or("");
    Some((result_type, rest))
}

//! Message formatting: severity labels, caller blocks and the text template.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::Error;

/// Log severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Fatal,
        Severity::Error,
        Severity::Warn,
        Severity::Info,
        Severity::Debug,
    ];

    /// Fixed label shown at the top of every message.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Fatal => "💥 [FATAL]",
            Severity::Error => "🥴 [ERROR]",
            Severity::Warn => "⚠️ [WARN]",
            Severity::Info => "👀 [INFO]",
            Severity::Debug => "🤔 [DEBUG]",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fatal" => Ok(Severity::Fatal),
            "error" => Ok(Severity::Error),
            "warn" | "warning" => Ok(Severity::Warn),
            "info" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            other => Err(Error::InvalidArgument(format!("unknown level: {}", other))),
        }
    }
}

pub const UNKNOWN_FUNCTION: &str = "<unknown>";

/// Source location of a log call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    file: String,
    line: u32,
    function: String,
}

impl CallerInfo {
    /// Build caller info; only the last segment of `file` is kept.
    pub fn new(file: &str, line: u32, function: &str) -> Self {
        Self {
            file: base_name(file).to_string(),
            line,
            function: function.to_string(),
        }
    }

    /// Location of the caller of a `#[track_caller]` function. The enclosing
    /// function name is not available this way.
    #[track_caller]
    pub fn here() -> Self {
        let location = std::panic::Location::caller();
        Self::new(location.file(), location.line(), UNKNOWN_FUNCTION)
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Clean up a `type_name` of a function item nested inside the caller:
/// drops the helper's own segment and any async closure segments.
#[doc(hidden)]
pub fn enclosing_function(type_name: &'static str) -> &'static str {
    let mut name = type_name.strip_suffix("::__telelog_here").unwrap_or(type_name);
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    name
}

/// Immutable rendered message, shared by every recipient of one log call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedMessage(Arc<str>);

impl FormattedMessage {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormattedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FormattedMessage {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Body of a plain log call: the value followed by a newline.
pub fn plain_body(value: impl fmt::Display) -> String {
    format!("{}\n", value)
}

/// Body of a formatted log call: newline-terminated.
pub fn formatted_body(args: fmt::Arguments<'_>) -> String {
    let mut body = fmt::format(args);
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body
}

/// Render the message template.
pub fn format_message(
    severity: Severity,
    app_name: &str,
    caller: Option<&CallerInfo>,
    body: &str,
) -> FormattedMessage {
    let text = match caller {
        Some(c) => format!(
            "{} {}\n\nFilename: {}\nLine: {}\nFuncName: {}\n\nMessage:\n{}",
            severity.label(),
            app_name,
            c.file,
            c.line,
            c.function,
            body
        ),
        None => format!("{} {}\n\nMessage:\n{}", severity.label(), app_name, body),
    };
    FormattedMessage(Arc::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        let labels: std::collections::HashSet<_> =
            Severity::ALL.iter().map(|s| s.label()).collect();
        assert_eq!(labels.len(), Severity::ALL.len());
        assert_eq!(Severity::Error.label(), "🥴 [ERROR]");
    }

    #[test]
    fn severity_parses_cli_levels() {
        assert_eq!("error".parse::<Severity>().unwrap(), Severity::Error);
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warn);
        assert_eq!("info".parse::<Severity>().unwrap(), Severity::Info);
        assert!("trace".parse::<Severity>().is_err());
    }

    #[test]
    fn template_without_caller() {
        let msg = format_message(
            Severity::Error,
            "app",
            None,
            &formatted_body(format_args!("count={}", 5)),
        );
        assert_eq!(msg.as_str(), "🥴 [ERROR] app\n\nMessage:\ncount=5\n");
    }

    #[test]
    fn template_with_caller() {
        let caller = CallerInfo::new("src/handlers/orders.rs", 42, "svc::handlers::create");
        let msg = format_message(Severity::Warn, "svc", Some(&caller), "slow\n");
        assert_eq!(
            msg.as_str(),
            "⚠️ [WARN] svc\n\nFilename: orders.rs\nLine: 42\nFuncName: svc::handlers::create\n\nMessage:\nslow\n"
        );
    }

    #[test]
    fn caller_file_has_no_separators() {
        for path in ["/home/u/app/src/main.rs", r"C:\work\app\src\main.rs", "main.rs"] {
            let caller = CallerInfo::new(path, 1, "f");
            assert_eq!(caller.file(), "main.rs");
        }
    }

    #[test]
    fn caller_here_points_at_this_file() {
        let caller = CallerInfo::here();
        assert_eq!(caller.file(), "format.rs");
        assert_eq!(caller.function(), UNKNOWN_FUNCTION);
    }

    #[test]
    fn bodies_are_newline_terminated() {
        assert_eq!(plain_body("x"), "x\n");
        assert_eq!(plain_body(42), "42\n");
        assert_eq!(formatted_body(format_args!("done\n")), "done\n");
        assert_eq!(formatted_body(format_args!("a{}", 1)), "a1\n");
    }

    #[test]
    fn enclosing_function_strips_helpers() {
        assert_eq!(
            enclosing_function("app::jobs::run::__telelog_here"),
            "app::jobs::run"
        );
        assert_eq!(
            enclosing_function("app::jobs::run::{{closure}}::{{closure}}::__telelog_here"),
            "app::jobs::run"
        );
    }
}

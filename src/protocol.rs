use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Tag carried in `source` by every message this tool posts on a page.
pub const PROTOCOL_TAG: &str = "EX_CONSOLE_STAMP";

/// Message type for console output travelling from page to panel.
pub const CONSOLE_LOG: &str = "CONSOLE_LOG";

/// Runtime message type reserved for the bridge liveness probe.
pub const PING: &str = "PING";

/// Severity attached to console messages and log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Log,
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(LogLevel::Log),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "success" => Ok(LogLevel::Success),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// The wire unit posted on a page's message bus by the injected runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: LogLevel,
    pub content: String,
}

impl SignedMessage {
    pub fn console(level: LogLevel, content: impl Into<String>) -> Self {
        Self {
            source: PROTOCOL_TAG.to_string(),
            kind: CONSOLE_LOG.to_string(),
            level,
            content: content.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "source": self.source,
            "type": self.kind,
            "level": self.level,
            "content": self.content,
        })
    }
}

/// Returns true when a posted payload carries the protocol tag.
pub fn is_signed(data: &Value) -> bool {
    data.get("source").and_then(Value::as_str) == Some(PROTOCOL_TAG)
}

/// Message exchanged over the extension runtime channel.
///
/// Fields the sender left out stay absent, the same way a page that posts a
/// tagged payload without a `level` ends up forwarding nothing for it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl RuntimeMessage {
    pub fn ping() -> Self {
        Self {
            kind: PING.to_string(),
            ..Default::default()
        }
    }

    pub fn console(level: LogLevel, content: impl Into<String>) -> Self {
        Self {
            kind: CONSOLE_LOG.to_string(),
            level: Some(level.to_string()),
            content: Some(Value::String(content.into())),
        }
    }

    /// Repackage the `type`, `level` and `content` fields of a signed payload.
    pub fn from_signed(data: &Value) -> Self {
        Self {
            kind: data
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            level: data.get("level").and_then(Value::as_str).map(str::to_string),
            content: data.get("content").cloned(),
        }
    }

    pub fn is_ping(&self) -> bool {
        self.kind == PING
    }

    pub fn is_console_log(&self) -> bool {
        self.kind == CONSOLE_LOG
    }

    /// Level to display; anything outside the fixed set renders as `log`.
    pub fn log_level(&self) -> LogLevel {
        self.level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or_default()
    }

    /// Content as the panel shows it, under JavaScript `String()` rules.
    pub fn rendered_content(&self) -> String {
        match &self.content {
            None => "undefined".to_string(),
            Some(value) => js_string(value),
        }
    }
}

/// `String(value)` for a JSON value.
fn js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => js_number_string(n),
        Value::String(s) => s.clone(),
        // Array.prototype.join: null and undefined elements become empty
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn js_number_string(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    let Some(f) = n.as_f64() else {
        return n.to_string();
    };
    if f == 0.0 {
        return "0".to_string();
    }
    let magnitude = f.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return format!("{}", f);
    }
    // Exponent form carries an explicit sign for positive exponents
    let text = format!("{:e}", f);
    match text.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => text,
    }
}

/// Reply to a liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: String,
}

impl ProbeResponse {
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}

//! ClockBuilder Pro register map files.
//!
//! An export is a CSV-like text file: an `Address,Data` header, one entry per
//! line with comma-separated values, `#` comments, and `# Delay N msec`
//! markers where the device needs time to settle. Values are decimal or
//! `0x`-prefixed hex; ClockBuilder also writes `NNh` hex.
//!
//! Parsing is all-or-nothing: the first malformed token fails the whole map
//! so that a truncated or corrupted file never half-programs a chip.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::tracing::prelude::*;

/// Pause used when a delay marker does not say how long.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(300);

#[derive(Error, Debug)]
pub enum RegisterMapError {
    #[error("cannot read register map {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: cannot parse {token:?}")]
    Parse {
        file: String,
        line: usize,
        token: String,
    },
}

/// One meaningful line of a register map. Line numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterMapItem {
    Write { line: usize, values: Vec<u32> },
    Delay { line: usize, duration: Duration },
}

impl RegisterMapItem {
    pub fn line(&self) -> usize {
        match self {
            RegisterMapItem::Write { line, .. } | RegisterMapItem::Delay { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    file: String,
    items: Vec<RegisterMapItem>,
}

impl RegisterMap {
    /// Parse map text; `file` names it in errors.
    pub fn parse_str(file: impl Into<String>, text: &str) -> Result<Self, RegisterMapError> {
        let file = file.into();
        let mut items = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            if let Some(duration) = delay_marker(raw) {
                items.push(RegisterMapItem::Delay { line, duration });
                continue;
            }
            let values = parse_line(raw).map_err(|token| RegisterMapError::Parse {
                file: file.clone(),
                line,
                token,
            })?;
            if !values.is_empty() {
                items.push(RegisterMapItem::Write { line, values });
            }
        }

        debug!(file = %file, entries = items.len(), "Register map parsed");
        Ok(Self { file, items })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RegisterMapError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RegisterMapError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse_str(path.display().to_string(), &text)
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn items(&self) -> &[RegisterMapItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Values on one line, or the token that failed to parse.
///
/// Comments and blank lines give an empty list, as does the `Address,Data`
/// header.
pub fn parse_line(line: &str) -> Result<Vec<u32>, String> {
    let content = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };

    let tokens: Vec<&str> = content
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens
        .first()
        .is_some_and(|t| t.eq_ignore_ascii_case("address"))
    {
        return Ok(Vec::new());
    }

    tokens
        .into_iter()
        .map(|token| parse_value(token).ok_or_else(|| token.to_string()))
        .collect()
}

fn parse_value(token: &str) -> Option<u32> {
    if let Some(hex) = token.strip_suffix(['h', 'H']) {
        let digits = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .unwrap_or(hex);
        return u32::from_str_radix(digits, 16).ok();
    }

    let (digits, radix) = match token.get(..2) {
        Some("0x" | "0X") => (&token[2..], 16),
        Some("0o" | "0O") => (&token[2..], 8),
        Some("0b" | "0B") => (&token[2..], 2),
        _ => (token, 10),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    // Leading zeros would read as octal elsewhere; only zero itself may have them.
    if radix == 10 && digits.starts_with('0') && !digits.trim_start_matches('0').is_empty() {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

/// Duration of a `# Delay N msec` marker line, if it is one.
fn delay_marker(line: &str) -> Option<Duration> {
    let comment = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = comment.strip_prefix("Delay")?;
    let ms = rest
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok());
    Some(ms.map_or(DEFAULT_DELAY, Duration::from_millis))
}

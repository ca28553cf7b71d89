//! Line normalization: turns a raw received line into a command ID.

/// Reset command. The instrument answers it like a serial-number request.
const RESET: &str = "@";
const RESET_ALIAS: &str = "I4";

/// Stability-qualified weight requests answer like plain ones.
const STABLE_PREFIX: &str = "SI";
const STABLE_REPLACEMENT: &str = "S";

/// Bytes removed anywhere in the line: LF, CR and ESC.
const STRIPPED: [char; 3] = ['\n', '\r', '\x1B'];

/// Result of normalizing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Nothing left after cleanup. Ignored silently.
    Blank,
    /// The line could not be read as a command. Logged, never answered.
    Invalid(String),
    /// A command to dispatch.
    Command {
        /// The cleaned line, after alias substitution.
        line: String,
        /// The canonical command ID.
        id: String,
    },
}

/// Normalizes a raw line as delivered by the transport's line splitter.
pub fn normalize(raw: &[u8]) -> Normalized {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => return Normalized::Invalid(format!("not valid UTF-8: {e}")),
    };

    let cleaned: String = text.chars().filter(|c| !STRIPPED.contains(c)).collect();
    let mut line = cleaned.trim();
    if line == RESET {
        line = RESET_ALIAS;
    }
    if line.is_empty() {
        return Normalized::Blank;
    }

    let Some(first) = line.split_whitespace().next() else {
        return Normalized::Invalid(line.to_string());
    };

    Normalized::Command {
        id: canonical_id(first),
        line: line.to_string(),
    }
}

fn canonical_id(token: &str) -> String {
    match token.strip_prefix(STABLE_PREFIX) {
        Some(rest) => format!("{STABLE_REPLACEMENT}{rest}"),
        None => token.to_string(),
    }
}

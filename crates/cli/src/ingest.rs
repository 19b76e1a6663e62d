//! Stdin request format
//!
//! One request per line: `METHOD PATH [DESTINATION]`, whitespace separated.
//! Blank lines and lines starting with `#` are skipped. The method is kept
//! as written, so `put` is not a PUT and is ignored downstream.

use crate::error::CliError;

/// One intercepted request read from input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub destination: Option<String>,
}

/// Parse line number `line_no` (1-based, for error messages).
///
/// Returns `Ok(None)` for blank and comment lines.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<RequestLine>, CliError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let (Some(method), Some(path)) = (fields.next(), fields.next()) else {
        return Err(CliError::MalformedRequest {
            line: line_no,
            content: line.to_string(),
        });
    };
    let destination = fields.next().map(str::to_string);
    if fields.next().is_some() {
        return Err(CliError::MalformedRequest {
            line: line_no,
            content: line.to_string(),
        });
    }

    Ok(Some(RequestLine {
        method: method.to_string(),
        path: path.to_string(),
        destination,
    }))
}

//! Minimal MIME type descriptor parsing
//!
//! Parses `type/subtype; key=value; key="quoted value"` into a lowercased
//! type name and its parameters.

use std::fmt;

/// A parsed MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    name: String,
    params: Vec<(String, String)>,
}

impl MimeType {
    /// Parse a Content-Type style string. Returns `None` for an empty type.
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = split_params(input).into_iter();
        let name = parts.next()?.trim().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }

        let params = parts
            .filter_map(|part| {
                let (key, value) = part.split_once('=')?;
                let key = key.trim().to_ascii_lowercase();
                if key.is_empty() {
                    return None;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some((key, value.to_string()))
            })
            .collect();

        Some(Self { name, params })
    }

    /// Type name without parameters, lowercased
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of a parameter, keys compared case-insensitively
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.params {
            write!(f, "; {}=\"{}\"", k, v)?;
        }
        Ok(())
    }
}

// Split on ';' outside of double quotes
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let mime = MimeType::parse("Image/GIF").unwrap();
        assert_eq!(mime.name(), "image/gif");
        assert!(mime.params().is_empty());
    }

    #[test]
    fn test_parse_params() {
        let mime =
            MimeType::parse("application/pdf; name=\"report; final.pdf\"; Charset=utf-8").unwrap();
        assert_eq!(mime.name(), "application/pdf");
        assert_eq!(mime.param("name"), Some("report; final.pdf"));
        assert_eq!(mime.param("charset"), Some("utf-8"));
        assert_eq!(mime.param("boundary"), None);
    }

    #[test]
    fn test_parse_empty() {
        assert!(MimeType::parse("").is_none());
        assert!(MimeType::parse("  ; name=x").is_none());
    }
}

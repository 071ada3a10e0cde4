//! Front matter: a YAML header block followed by free-form body text.
//!
//! [`decompose`] never fails. Malformed headers degrade to an empty
//! [`FrontMatter`] with the whole input kept as the body and the parse error
//! recorded on the result, so a broken file can still be viewed and fixed.
//! [`compose`] is the inverse and always emits a delimited block.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Number, Value};

const DELIMITER: &str = "---";
const END_OF_DOCUMENT: &str = "...";

/// Structured front matter.
///
/// Fields the installer and compactor interpret are typed. Everything else
/// is carried through untouched in [`metadata`](Self::metadata), in the
/// order the author wrote it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    /// `owner/name` of the foreign repository this file was installed from.
    #[serde(rename = "originalRepository", default, skip_serializing_if = "Option::is_none")]
    pub original_repository: Option<String>,
    /// Asset paths successfully installed alongside this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    /// Asset paths referenced by the body but not installed yet.
    #[serde(rename = "missingDependencies", default, skip_serializing_if = "Option::is_none")]
    pub missing_dependencies: Option<Vec<String>>,
    /// Day group an episode belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<Value>,
    /// Ordering key of an episode within its day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Number>,
    /// Editor rules such as `hidden` or `template`.
    #[serde(rename = "ukrn_wb_rules", default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
    #[serde(flatten)]
    pub metadata: Mapping,
}

impl FrontMatter {
    /// Look up an uninterpreted field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Look up an uninterpreted field as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(Value::String(key.into()), value.into());
    }

    pub fn has_rule(&self, rule: &str) -> bool {
        self.rules.iter().any(|r| r == rule)
    }

    /// Order key as a float for sorting; missing keys sort first.
    pub fn order_key(&self) -> f64 {
        self.order.as_ref().and_then(Number::as_f64).unwrap_or(f64::MIN)
    }

    pub fn dependencies(&self) -> &[String] {
        self.dependencies.as_deref().unwrap_or_default()
    }

    pub fn missing_dependencies(&self) -> &[String] {
        self.missing_dependencies.as_deref().unwrap_or_default()
    }
}

/// The result of splitting content into front matter and body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decomposed {
    pub front_matter: FrontMatter,
    pub body: String,
    /// Description of why the header could not be parsed, if it couldn't.
    pub parse_error: Option<String>,
}

impl Decomposed {
    fn failed(content: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::debug!(reason = %reason, "front matter could not be parsed");
        Self {
            front_matter: FrontMatter::default(),
            body: content.to_string(),
            parse_error: Some(reason),
        }
    }
}

/// Split content into front matter and body.
///
/// Content that opens with a `---` line has its header read up to the next
/// `---` (or `...`) line. Content without a leading delimiter is treated as a
/// bare YAML document (as configuration files are) with an empty body.
pub fn decompose(content: &str) -> Decomposed {
    let text = content.strip_prefix('\u{feff}').unwrap_or(content);
    let (first, mut rest) = split_line(text);
    if first.trim_end() != DELIMITER {
        // No header block: the whole document is either a YAML mapping or not front matter at all.
        if text.trim().is_empty() {
            return Decomposed {
                body: content.to_string(),
                ..Decomposed::default()
            };
        }
        return match parse_block(text) {
            Ok(front_matter) => Decomposed {
                front_matter,
                body: String::new(),
                parse_error: None,
            },
            Err(reason) => Decomposed::failed(content, reason),
        };
    }

    let header_start = text.len() - rest.len();
    loop {
        if rest.is_empty() {
            return Decomposed::failed(content, "front matter block is not terminated");
        }
        let line_start = text.len() - rest.len();
        let (line, remaining) = split_line(rest);
        rest = remaining;
        let trimmed = line.trim_end();
        if trimmed == DELIMITER || trimmed == END_OF_DOCUMENT {
            let header = &text[header_start..line_start];
            return match parse_block(header) {
                Ok(front_matter) => Decomposed {
                    front_matter,
                    body: rest.to_string(),
                    parse_error: None,
                },
                Err(reason) => Decomposed::failed(content, reason),
            };
        }
    }
}

/// Serialize front matter and body back into content.
pub fn compose(front_matter: &FrontMatter, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(front_matter).or_raise(|| ErrorKind::Serialize("front matter".to_string()))?;
    // An empty header serializes as `{}`; omit it so the block stays empty.
    let yaml = if yaml.trim() == "{}" { String::new() } else { yaml };
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
}

/// Split off the first line (including its newline, if any).
fn split_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(idx) => (&text[..idx], &text[idx + 1..]),
        None => (text, ""),
    }
}

fn parse_block(yaml: &str) -> std::result::Result<FrontMatter, String> {
    if yaml.trim().is_empty() {
        return Ok(FrontMatter::default());
    }
    let value: Value = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
    match value {
        Value::Null => Ok(FrontMatter::default()),
        Value::Mapping(mapping) => from_mapping(mapping),
        other => Err(format!("front matter must be a mapping, found {}", describe(&other))),
    }
}

fn from_mapping(mapping: Mapping) -> std::result::Result<FrontMatter, String> {
    serde_yaml::from_value(Value::Mapping(mapping)).map_err(|e| e.to_string())
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

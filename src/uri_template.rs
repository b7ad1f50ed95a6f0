//! RFC 6570 URI-template subset
//!
//! Parses a template once into a sequence of literal and expression parts,
//! then supports both directions: [`UriTemplate::expand`] substitutes and
//! percent-encodes variables, and [`UriTemplate::match_uri`] extracts
//! variables back out of a concrete URI via a compiled regex.
//!
//! Supported operators: simple (`{var}`), reserved (`{+var}`), fragment
//! (`{#var}`), label (`{.var}`), path (`{/var}`), query (`{?var}`), and
//! query continuation (`{&var}`), each with the `*` explode modifier and
//! multi-variable lists. Repeated query-style expansions after the first
//! collapse their leading `?` to `&`.
//!
//! All lengths are bounded: template and variable values at 1 MiB, the
//! expression count at 10 000, and the compiled regex source at 1 MiB.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{McpError, Result};

/// Maximum accepted template length in bytes.
pub const MAX_TEMPLATE_LENGTH: usize = 1024 * 1024;
/// Maximum accepted variable-value length in bytes.
pub const MAX_VARIABLE_LENGTH: usize = 1024 * 1024;
/// Maximum number of expressions in one template.
pub const MAX_TEMPLATE_EXPRESSIONS: usize = 10_000;
/// Maximum compiled regex source length in bytes.
pub const MAX_REGEX_LENGTH: usize = 1024 * 1024;

/// An RFC 6570 expression operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    /// `{var}` - comma-joined, unreserved encoding.
    Simple,
    /// `{+var}` - reserved characters pass through.
    Reserved,
    /// `{#var}` - fragment expansion.
    Fragment,
    /// `{.var}` - dot-prefixed labels.
    Label,
    /// `{/var}` - path segments.
    Path,
    /// `{?var}` - query with `?` prefix.
    Query,
    /// `{&var}` - query continuation with `&` prefix.
    QueryContinuation,
}

impl Operator {
    fn from_prefix(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Reserved),
            '#' => Some(Operator::Fragment),
            '.' => Some(Operator::Label),
            '/' => Some(Operator::Path),
            '?' => Some(Operator::Query),
            '&' => Some(Operator::QueryContinuation),
            _ => None,
        }
    }

    /// The string prepended before the first expanded value.
    fn prefix(self) -> &'static str {
        match self {
            Operator::Simple | Operator::Reserved => "",
            Operator::Fragment => "#",
            Operator::Label => ".",
            Operator::Path => "/",
            Operator::Query => "?",
            Operator::QueryContinuation => "&",
        }
    }

    /// The separator between values of an exploded list (and between
    /// variables of a multi-variable expression).
    fn separator(self) -> &'static str {
        match self {
            Operator::Simple | Operator::Reserved | Operator::Fragment => ",",
            Operator::Label => ".",
            Operator::Path => "/",
            Operator::Query | Operator::QueryContinuation => "&",
        }
    }

    /// Whether values are rendered as `name=value` pairs.
    fn named(self) -> bool {
        matches!(self, Operator::Query | Operator::QueryContinuation)
    }

    /// Whether reserved URI characters pass through unencoded.
    fn allow_reserved(self) -> bool {
        matches!(self, Operator::Reserved | Operator::Fragment)
    }
}

/// One variable inside an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VarSpec {
    name: String,
    explode: bool,
}

/// A parsed template part.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Expression { operator: Operator, vars: Vec<VarSpec> },
}

/// A variable binding value: a scalar string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarValue {
    /// A single value.
    Scalar(String),
    /// Multiple values (rendered per the operator's explode rules).
    List(Vec<String>),
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::Scalar(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::Scalar(s)
    }
}

impl From<Vec<String>> for VarValue {
    fn from(v: Vec<String>) -> Self {
        VarValue::List(v)
    }
}

/// A parsed, immutable URI template.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use mcp_runtime::uri_template::{UriTemplate, VarValue};
///
/// let template = UriTemplate::parse("db://{database}/{table}{?fields*}").unwrap();
///
/// let mut vars = HashMap::new();
/// vars.insert("database".to_string(), VarValue::from("metrics"));
/// vars.insert("table".to_string(), VarValue::from("cpu"));
/// vars.insert("fields".to_string(), VarValue::from(vec!["min".to_string(), "max".to_string()]));
///
/// let uri = template.expand(&vars).unwrap();
/// assert_eq!(uri, "db://metrics/cpu?fields=min&fields=max");
///
/// let matched = template.match_uri(&uri).unwrap();
/// assert_eq!(matched["fields"], VarValue::from(vec!["min".to_string(), "max".to_string()]));
/// ```
#[derive(Debug)]
pub struct UriTemplate {
    template: String,
    parts: Vec<Part>,
    matcher: OnceLock<Option<Regex>>,
}

impl UriTemplate {
    /// Parse a template string.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::UriTemplate`] when the template exceeds the
    /// length or expression bounds, or contains an unterminated/empty/
    /// malformed expression.
    pub fn parse(template: &str) -> Result<Self> {
        if template.len() > MAX_TEMPLATE_LENGTH {
            return Err(McpError::UriTemplate(format!(
                "template of {} bytes exceeds maximum of {MAX_TEMPLATE_LENGTH}",
                template.len()
            ))
            .into());
        }

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut expression_count = 0usize;
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                if c == '}' {
                    return Err(
                        McpError::UriTemplate("unmatched '}' outside expression".to_string()).into()
                    );
                }
                literal.push(c);
                continue;
            }

            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }

            let mut body = String::new();
            let mut terminated = false;
            for e in chars.by_ref() {
                if e == '}' {
                    terminated = true;
                    break;
                }
                if e == '{' {
                    return Err(
                        McpError::UriTemplate("nested '{' inside expression".to_string()).into()
                    );
                }
                body.push(e);
            }
            if !terminated {
                return Err(McpError::UriTemplate("unterminated expression".to_string()).into());
            }

            expression_count += 1;
            if expression_count > MAX_TEMPLATE_EXPRESSIONS {
                return Err(McpError::UriTemplate(format!(
                    "template exceeds {MAX_TEMPLATE_EXPRESSIONS} expressions"
                ))
                .into());
            }

            let (operator, var_list) = match body.chars().next() {
                None => {
                    return Err(McpError::UriTemplate("empty expression".to_string()).into());
                }
                Some(first) => match Operator::from_prefix(first) {
                    Some(op) => (op, &body[first.len_utf8()..]),
                    None => (Operator::Simple, body.as_str()),
                },
            };

            let mut vars = Vec::new();
            for raw in var_list.split(',') {
                let (name, explode) = match raw.strip_suffix('*') {
                    Some(stripped) => (stripped, true),
                    None => (raw, false),
                };
                if name.is_empty()
                    || !name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '%'))
                {
                    return Err(McpError::UriTemplate(format!(
                        "invalid variable name {raw:?} in expression"
                    ))
                    .into());
                }
                vars.push(VarSpec {
                    name: name.to_string(),
                    explode,
                });
            }

            parts.push(Part::Expression { operator, vars });
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            template: template.to_string(),
            parts,
            matcher: OnceLock::new(),
        })
    }

    /// The original template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// All variable names in template order.
    pub fn variable_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Expression { vars, .. } => {
                    Some(vars.iter().map(|v| v.name.as_str()))
                }
                Part::Literal(_) => None,
            })
            .flatten()
            .collect()
    }

    /// Expand the template with the given variable bindings.
    ///
    /// Unbound variables expand to nothing. Repeated query expansions
    /// after the first collapse their leading `?` to `&`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::UriTemplate`] if any bound value exceeds
    /// [`MAX_VARIABLE_LENGTH`].
    pub fn expand(&self, vars: &HashMap<String, VarValue>) -> Result<String> {
        let mut out = String::new();
        let mut query_emitted = false;

        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expression { operator, vars: specs } => {
                    let mut operator = *operator;
                    if operator == Operator::Query && query_emitted {
                        operator = Operator::QueryContinuation;
                    }

                    let mut rendered = Vec::new();
                    for spec in specs {
                        let Some(value) = vars.get(&spec.name) else {
                            continue;
                        };
                        check_value_length(value)?;
                        rendered.push(render_var(operator, spec, value));
                    }

                    if rendered.is_empty() {
                        continue;
                    }
                    out.push_str(operator.prefix());
                    out.push_str(&rendered.join(operator.separator()));
                    if matches!(operator, Operator::Query | Operator::QueryContinuation) {
                        query_emitted = true;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Match a concrete URI against this template and extract variables.
    ///
    /// Returns `None` when the URI does not match. Exploded variables come
    /// back as [`VarValue::List`], split on the operator's separator;
    /// everything else is a [`VarValue::Scalar`] with percent-decoding
    /// applied.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, VarValue>> {
        let regex = self
            .matcher
            .get_or_init(|| self.compile_matcher())
            .as_ref()?;
        let captures = regex.captures(uri)?;

        let mut out = HashMap::new();
        let mut group = 1;
        for part in &self.parts {
            let Part::Expression { operator, vars } = part else {
                continue;
            };
            for spec in vars {
                let Some(m) = captures.get(group) else {
                    group += 1;
                    continue;
                };
                group += 1;
                let value = if spec.explode {
                    let separator = explode_match_separator(*operator, &spec.name);
                    VarValue::List(
                        m.as_str()
                            .split(separator.as_str())
                            .map(percent_decode)
                            .collect(),
                    )
                } else {
                    VarValue::Scalar(percent_decode(m.as_str()))
                };
                out.insert(spec.name.clone(), value);
            }
        }
        Some(out)
    }

    /// Compile the matching regex, or `None` when it would exceed the
    /// source-length bound or fail to compile.
    fn compile_matcher(&self) -> Option<Regex> {
        let mut source = String::from("^");
        let mut query_seen = false;

        for part in &self.parts {
            match part {
                Part::Literal(text) => source.push_str(&regex::escape(text)),
                Part::Expression { operator, vars } => {
                    let mut operator = *operator;
                    if operator == Operator::Query && query_seen {
                        operator = Operator::QueryContinuation;
                    }
                    if matches!(operator, Operator::Query | Operator::QueryContinuation) {
                        query_seen = true;
                    }
                    for (i, spec) in vars.iter().enumerate() {
                        let prefix = if i == 0 {
                            operator.prefix()
                        } else {
                            operator.separator()
                        };
                        source.push_str(&regex::escape(prefix));
                        if operator.named() {
                            source.push_str(&regex::escape(&spec.name));
                            source.push('=');
                        }
                        source.push_str(&group_pattern(operator, spec));
                    }
                }
            }
        }
        source.push('$');

        if source.len() > MAX_REGEX_LENGTH {
            tracing::warn!(
                "uri template: compiled matcher for {:?} exceeds {MAX_REGEX_LENGTH} bytes",
                self.template
            );
            return None;
        }
        match Regex::new(&source) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!("uri template: failed to compile matcher for {:?}: {e}", self.template);
                None
            }
        }
    }
}

/// The capture-group pattern for one variable under one operator.
fn group_pattern(operator: Operator, spec: &VarSpec) -> String {
    let atom = match operator {
        Operator::Reserved | Operator::Fragment => "[^#]",
        Operator::Query | Operator::QueryContinuation => "[^&#]",
        Operator::Label => "[^/?#.,]",
        Operator::Path => "[^/?#,]",
        Operator::Simple => "[^/?#,]",
    };
    if spec.explode {
        let separator = match operator {
            Operator::Query | Operator::QueryContinuation => {
                // Repeated `name=value` pairs.
                return format!(
                    "({atom}+(?:&{}={atom}+)*)",
                    regex::escape(&spec.name)
                );
            }
            other => regex::escape(other.separator()),
        };
        format!("({atom}+(?:{separator}{atom}+)*)")
    } else {
        format!("({atom}+)")
    }
}

/// The string an exploded capture is split on when matching.
fn explode_match_separator(operator: Operator, name: &str) -> String {
    match operator {
        Operator::Query | Operator::QueryContinuation => format!("&{name}="),
        other => other.separator().to_string(),
    }
}

/// Render one variable binding for one expression.
fn render_var(operator: Operator, spec: &VarSpec, value: &VarValue) -> String {
    let encode = |s: &str| percent_encode(s, operator.allow_reserved());
    match value {
        VarValue::Scalar(s) => {
            if operator.named() {
                format!("{}={}", spec.name, encode(s))
            } else {
                encode(s)
            }
        }
        VarValue::List(items) => {
            if spec.explode {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| {
                        if operator.named() {
                            format!("{}={}", spec.name, encode(item))
                        } else {
                            encode(item)
                        }
                    })
                    .collect();
                rendered.join(operator.separator())
            } else {
                let joined: Vec<String> = items.iter().map(|i| encode(i)).collect();
                if operator.named() {
                    format!("{}={}", spec.name, joined.join(","))
                } else {
                    joined.join(",")
                }
            }
        }
    }
}

fn check_value_length(value: &VarValue) -> Result<()> {
    let oversized = match value {
        VarValue::Scalar(s) => s.len() > MAX_VARIABLE_LENGTH,
        VarValue::List(items) => items.iter().any(|i| i.len() > MAX_VARIABLE_LENGTH),
    };
    if oversized {
        return Err(McpError::UriTemplate(format!(
            "variable value exceeds maximum of {MAX_VARIABLE_LENGTH} bytes"
        ))
        .into());
    }
    Ok(())
}

/// Percent-encode `input`, keeping unreserved characters and, when
/// `allow_reserved`, the RFC 3986 reserved set as well.
fn percent_encode(input: &str, allow_reserved: bool) -> String {
    const RESERVED: &str = ":/?#[]@!$&'()*+,;=";
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let c = byte as char;
        let keep = c.is_ascii_alphanumeric()
            || matches!(c, '-' | '.' | '_' | '~')
            || (allow_reserved && (RESERVED.contains(c) || c == '%'));
        if keep {
            out.push(c);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Decode percent-escapes; invalid escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

//! Argument normalization for tool calls.
//!
//! Agents tend to send `null` for optional arguments and to omit fields a
//! backend's validator insists on. Before a tool runs, its arguments pass
//! through the [`ArgumentPolicy`] bound to its name:
//!
//! 1. `null` entries are dropped,
//! 2. tool-specific rules apply (defaults, recipient coercion),
//! 3. every declared schema property still missing gets a type default from
//!    [`TYPE_DEFAULTS`].
//!
//! Keys the schema does not mention are passed through untouched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Arguments as sent on the wire.
pub type Arguments = Map<String, Value>;

/// Schema type → default value for properties the caller left out.
pub const TYPE_DEFAULTS: &[(&str, fn() -> Value)] = &[
    ("array", empty_array),
    ("boolean", false_value),
    ("integer", zero),
];

fn empty_array() -> Value {
    Value::Array(Vec::new())
}

fn false_value() -> Value {
    Value::Bool(false)
}

fn zero() -> Value {
    json!(0)
}

/// Strategy for cleaning one tool's arguments.
pub trait ArgumentPolicy: Send + Sync {
    /// Clean `arguments` against the tool's declared `schema`.
    fn clean(&self, schema: Option<&Value>, arguments: Arguments) -> Result<Arguments>;
}

/// Drop nulls, then fill schema type defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl ArgumentPolicy for DefaultPolicy {
    fn clean(&self, schema: Option<&Value>, arguments: Arguments) -> Result<Arguments> {
        let mut cleaned = drop_nulls(arguments);
        fill_schema_defaults(schema, &mut cleaned);
        Ok(cleaned)
    }
}

/// Drop nulls only. Opts a tool out of schema defaulting.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPolicy;

impl ArgumentPolicy for PassthroughPolicy {
    fn clean(&self, _schema: Option<&Value>, arguments: Arguments) -> Result<Arguments> {
        Ok(drop_nulls(arguments))
    }
}

/// Page scraping: markdown output and a 30s backend timeout unless asked otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapePolicy;

impl ScrapePolicy {
    /// Default output formats.
    pub const DEFAULT_FORMATS: &'static [&'static str] = &["markdown"];
    /// Default backend timeout in milliseconds.
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
}

impl ArgumentPolicy for ScrapePolicy {
    fn clean(&self, schema: Option<&Value>, arguments: Arguments) -> Result<Arguments> {
        let mut cleaned = drop_nulls(arguments);
        cleaned
            .entry("formats")
            .or_insert_with(|| json!(Self::DEFAULT_FORMATS));
        cleaned
            .entry("timeout")
            .or_insert_with(|| json!(Self::DEFAULT_TIMEOUT_MS));
        fill_schema_defaults(schema, &mut cleaned);
        Ok(cleaned)
    }
}

/// Email sending: recipient lists may arrive as a single address or as a
/// JSON-encoded array string.
#[derive(Debug, Clone)]
pub struct EmailPolicy {
    recipient_fields: Vec<String>,
}

impl EmailPolicy {
    /// Fields coerced to address lists by default.
    pub const RECIPIENT_FIELDS: &'static [&'static str] =
        &["to_recipients", "cc_recipients", "bcc_recipients", "cc", "bcc"];

    /// Policy coercing the given fields.
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipient_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn coerce(field: &str, raw: &str) -> Result<Value> {
        let trimmed = raw.trim();
        if !(trimmed.starts_with('[') && trimmed.ends_with(']')) {
            return Ok(json!([raw]));
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(parsed @ Value::Array(_)) => Ok(parsed),
            Ok(_) => Err(Error::InvalidArguments {
                field: field.to_string(),
                reason: "Invalid array format".into(),
            }),
            Err(e) => Err(Error::InvalidArguments {
                field: field.to_string(),
                reason: format!("Invalid array format: {}", e),
            }),
        }
    }
}

impl Default for EmailPolicy {
    fn default() -> Self {
        Self::with_fields(Self::RECIPIENT_FIELDS.iter().copied())
    }
}

impl ArgumentPolicy for EmailPolicy {
    fn clean(&self, schema: Option<&Value>, arguments: Arguments) -> Result<Arguments> {
        let mut cleaned = drop_nulls(arguments);
        for field in &self.recipient_fields {
            let coerced = match cleaned.get(field) {
                Some(Value::String(raw)) => Self::coerce(field, raw)?,
                _ => continue,
            };
            cleaned.insert(field.clone(), coerced);
        }
        fill_schema_defaults(schema, &mut cleaned);
        Ok(cleaned)
    }
}

/// Named policies, as referenced from a tool manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// [`DefaultPolicy`].
    Default,
    /// [`PassthroughPolicy`].
    Passthrough,
    /// [`ScrapePolicy`].
    Scrape,
    /// [`EmailPolicy`] with the default recipient fields.
    Email,
}

impl PolicyKind {
    /// Instantiate the policy.
    pub fn policy(self) -> Arc<dyn ArgumentPolicy> {
        match self {
            PolicyKind::Default => Arc::new(DefaultPolicy),
            PolicyKind::Passthrough => Arc::new(PassthroughPolicy),
            PolicyKind::Scrape => Arc::new(ScrapePolicy),
            PolicyKind::Email => Arc::new(EmailPolicy::default()),
        }
    }
}

/// Maps tool identifiers to argument policies, falling back to [`DefaultPolicy`].
#[derive(Clone)]
pub struct ArgumentNormalizer {
    policies: HashMap<String, Arc<dyn ArgumentPolicy>>,
    fallback: Arc<dyn ArgumentPolicy>,
}

impl ArgumentNormalizer {
    /// Normalizer with no tool-specific bindings.
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
            fallback: Arc::new(DefaultPolicy),
        }
    }

    /// Normalizer with the built-in bindings for the stock scrape and email tools.
    pub fn standard() -> Self {
        let mut normalizer = Self::new();
        normalizer.bind_kind("scrapeurl", PolicyKind::Scrape);
        normalizer.bind_kind("gmail_sendemail", PolicyKind::Email);
        normalizer.bind_kind("microsoft_createandsendemail", PolicyKind::Email);
        normalizer
    }

    /// Bind a policy to a tool identifier (case-insensitive).
    pub fn bind(&mut self, tool: &str, policy: Arc<dyn ArgumentPolicy>) {
        self.policies.insert(tool.to_lowercase(), policy);
    }

    /// Bind a named policy to a tool identifier.
    pub fn bind_kind(&mut self, tool: &str, kind: PolicyKind) {
        self.bind(tool, kind.policy());
    }

    /// Clean `arguments` for `tool` against its declared `schema`.
    pub fn clean(&self, tool: &str, schema: Option<&Value>, arguments: Arguments) -> Result<Arguments> {
        self.policies
            .get(&tool.to_lowercase())
            .unwrap_or(&self.fallback)
            .clean(schema, arguments)
    }
}

impl Default for ArgumentNormalizer {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ArgumentNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bound: Vec<_> = self.policies.keys().collect();
        bound.sort();
        f.debug_struct("ArgumentNormalizer")
            .field("bound", &bound)
            .finish_non_exhaustive()
    }
}

/// Remove every `null`-valued entry.
pub fn drop_nulls(arguments: Arguments) -> Arguments {
    arguments.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

/// Fill a default for every declared property that is still missing.
pub fn fill_schema_defaults(schema: Option<&Value>, arguments: &mut Arguments) {
    let Some(properties) = schema
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
    else {
        return;
    };

    for (name, details) in properties {
        if arguments.contains_key(name) {
            continue;
        }
        if let Some(default) = property_type(details).and_then(type_default) {
            arguments.insert(name.clone(), default);
        }
    }
}

fn type_default(kind: &str) -> Option<Value> {
    TYPE_DEFAULTS
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, make)| make())
}

/// Declared type of a schema property, ignoring `"null"` in unions.
fn property_type(details: &Value) -> Option<&str> {
    match details.get("type") {
        Some(Value::String(kind)) => return Some(kind.as_str()),
        Some(Value::Array(kinds)) => {
            return kinds
                .iter()
                .filter_map(Value::as_str)
                .find(|kind| *kind != "null");
        }
        _ => {}
    }

    ["anyOf", "oneOf"]
        .iter()
        .filter_map(|key| details.get(*key).and_then(Value::as_array))
        .flatten()
        .find_map(|branch| property_type(branch).filter(|kind| *kind != "null"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn scrape_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "formats": {"type": "array", "items": {"type": "string"}},
                "timeout": {"type": "integer"},
                "only_main_content": {"type": "boolean"},
                "wait_for": {"type": "integer"},
                "tags": {"type": "array"}
            },
            "required": ["url"]
        })
    }

    #[test]
    fn default_policy_fills_type_defaults() {
        let schema = json!({
            "properties": {
                "query": {"type": "string"},
                "labels": {"type": "array"},
                "unread": {"type": "boolean"},
                "limit": {"type": "integer"},
                "score": {"type": "number"}
            }
        });
        let cleaned = DefaultPolicy
            .clean(Some(&schema), args(json!({"query": "x", "limit": null})))
            .unwrap();

        assert_eq!(
            Value::Object(cleaned),
            json!({"query": "x", "labels": [], "unread": false, "limit": 0})
        );
    }

    #[test]
    fn properties_without_type_default_stay_absent() {
        let schema = json!({
            "properties": {
                "subject": {"type": "string"},
                "score": {"type": "number"},
                "headers": {"type": "object"}
            }
        });
        let mut arguments = Arguments::new();
        fill_schema_defaults(Some(&schema), &mut arguments);
        assert!(arguments.is_empty(), "{arguments:?}");
    }

    #[test]
    fn scrape_defaults_replace_nulls() {
        let cleaned = ScrapePolicy
            .clean(
                Some(&scrape_schema()),
                args(json!({"url": "https://example.com", "formats": null, "tags": null})),
            )
            .unwrap();

        assert_eq!(cleaned["formats"], json!(["markdown"]));
        assert_eq!(cleaned["timeout"], json!(30000));
        assert_eq!(cleaned["only_main_content"], json!(false));
        assert_eq!(cleaned["wait_for"], json!(0));
        assert_eq!(cleaned["tags"], json!([]));
    }

    #[test]
    fn scrape_defaults_apply_without_schema() {
        let cleaned = ScrapePolicy
            .clean(None, args(json!({"url": "https://example.com"})))
            .unwrap();
        assert_eq!(cleaned["formats"], json!(["markdown"]));
        assert_eq!(cleaned["timeout"], json!(30000));
    }

    #[test]
    fn email_accepts_single_address() {
        let cleaned = EmailPolicy::default()
            .clean(None, args(json!({"to_recipients": "a@example.com"})))
            .unwrap();
        assert_eq!(cleaned["to_recipients"], json!(["a@example.com"]));
    }

    #[test]
    fn email_parses_json_array_string() {
        let cleaned = EmailPolicy::default()
            .clean(
                None,
                args(json!({"to_recipients": "[\"a@example.com\", \"b@example.com\"]"})),
            )
            .unwrap();
        assert_eq!(cleaned["to_recipients"], json!(["a@example.com", "b@example.com"]));
    }

    #[test]
    fn email_rejects_broken_array_string() {
        let err = EmailPolicy::default()
            .clean(None, args(json!({"to_recipients": "[a@example.com]"})))
            .unwrap_err();
        match err {
            Error::InvalidArguments { field, .. } => assert_eq!(field, "to_recipients"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn email_fills_missing_cc_lists_from_schema() {
        let schema = json!({
            "properties": {
                "recipient": {"type": "string"},
                "cc": {"type": "array"},
                "bcc": {"type": ["array", "null"]}
            }
        });
        let cleaned = EmailPolicy::default()
            .clean(Some(&schema), args(json!({"recipient": "a@example.com", "cc": null})))
            .unwrap();
        assert_eq!(cleaned["recipient"], json!("a@example.com"));
        assert_eq!(cleaned["cc"], json!([]));
        assert_eq!(cleaned["bcc"], json!([]));
    }

    #[test]
    fn fully_specified_arguments_round_trip() {
        let full = args(json!({
            "url": "https://example.com",
            "formats": ["html"],
            "timeout": 5000,
            "only_main_content": true,
            "wait_for": 10,
            "tags": ["a"]
        }));
        let normalizer = ArgumentNormalizer::standard();
        let cleaned = normalizer
            .clean("scrapeurl", Some(&scrape_schema()), full.clone())
            .unwrap();
        assert_eq!(cleaned, full);

        let email = args(json!({"to_recipients": ["a@example.com"], "subject": "hi"}));
        let cleaned = normalizer
            .clean("gmail_sendemail", None, email.clone())
            .unwrap();
        assert_eq!(cleaned, email);
    }

    #[test]
    fn unknown_keys_pass_through() {
        let cleaned = DefaultPolicy
            .clean(
                Some(&json!({"properties": {"a": {"type": "integer"}}})),
                args(json!({"extra": {"nested": true}, "b": "x"})),
            )
            .unwrap();
        assert_eq!(cleaned["extra"], json!({"nested": true}));
        assert_eq!(cleaned["b"], json!("x"));
        assert_eq!(cleaned["a"], json!(0));
    }

    #[test]
    fn passthrough_skips_schema_defaults() {
        let cleaned = PassthroughPolicy
            .clean(
                Some(&json!({"properties": {"flag": {"type": "boolean"}}})),
                args(json!({"x": null, "y": 1})),
            )
            .unwrap();
        assert_eq!(Value::Object(cleaned), json!({"y": 1}));
    }

    #[test]
    fn any_of_branches_are_typed() {
        let schema = json!({
            "properties": {
                "ids": {"anyOf": [{"type": "null"}, {"type": "array"}]}
            }
        });
        let cleaned = DefaultPolicy.clean(Some(&schema), Arguments::new()).unwrap();
        assert_eq!(cleaned["ids"], json!([]));
    }

    #[test]
    fn lookup_is_case_insensitive_with_fallback() {
        let normalizer = ArgumentNormalizer::standard();
        let cleaned = normalizer.clean("ScrapeUrl", None, Arguments::new()).unwrap();
        assert_eq!(cleaned["timeout"], json!(30000));

        let cleaned = normalizer.clean("other", None, Arguments::new()).unwrap();
        assert!(cleaned.is_empty());
    }

    #[test]
    fn policy_kinds_deserialize_lowercase() {
        let kind: PolicyKind = serde_json::from_value(json!("scrape")).unwrap();
        assert_eq!(kind, PolicyKind::Scrape);
        assert!(serde_json::from_value::<PolicyKind>(json!("Scrape")).is_err());
    }
}

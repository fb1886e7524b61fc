/// Documentation-comment tag extraction
///
/// Parses the `/** ... */` blocks attached to declarations and fields into
/// free-text descriptions and a closed set of validation tags. The result is
/// keyed by the declaring shape and the dotted path of the field within it
/// (`params.address.zip`, `tags[]`); the declaration itself sits at the
/// empty path.

use crate::diagnostics::{Code, Diagnostics};
use crate::scanner::ScanOutput;
use decl_parser::{DocComment, Field, Span, TypeExpr, TypeKind};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as Json;
use std::collections::HashMap;

lazy_static! {
    static ref NUMERIC: Regex =
        Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?$").unwrap();
    static ref LENGTH: Regex = Regex::new(r"^(0|[1-9][0-9]*)$").unwrap();
}

/// Formats with a well-known meaning to downstream validators
const KNOWN_FORMATS: &[&str] = &[
    "date",
    "date-time",
    "time",
    "duration",
    "email",
    "hostname",
    "ipv4",
    "ipv6",
    "uri",
    "url",
    "uri-reference",
    "uuid",
    "regex",
];

/// Recognized tags and what they do
pub const KNOWN_TAGS: &[(&str, &str)] = &[
    ("min", "Lower bound of a number"),
    ("max", "Upper bound of a number"),
    ("minLength", "Minimum length of a string or list"),
    ("maxLength", "Maximum length of a string or list"),
    ("pattern", "Regular expression a string must match"),
    ("format", "Well-known string format, such as `email` or `date-time`"),
    ("enum", "Allowed string values, separated by `,` or `|`"),
    ("required", "Overrides the optional marker: `@required` or `@required false`"),
    ("default", "Value used when the field is omitted (JSON or a bare literal)"),
    ("deprecated", "Marks the field as deprecated"),
];

/// A tag value with the position of its tag line
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Tagged<T> {
    fn at(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

/// Recognized tags of one comment block; absent tags are `None`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagSet {
    pub minimum: Option<Tagged<f64>>,
    pub maximum: Option<Tagged<f64>>,
    pub min_length: Option<Tagged<u64>>,
    pub max_length: Option<Tagged<u64>>,
    pub pattern: Option<Tagged<String>>,
    pub format: Option<Tagged<String>>,
    pub enum_values: Option<Tagged<Vec<String>>>,
    pub required: Option<Tagged<bool>>,
    pub default: Option<Tagged<Json>>,
    pub deprecated: bool,
}

/// Parsed contents of one doc comment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Annotation {
    pub description: Option<String>,
    pub tags: TagSet,
}

/// Annotations of a whole file
#[derive(Debug, Default)]
pub struct Annotations {
    entries: HashMap<(String, String), Annotation>,
}

impl Annotations {
    pub fn get(&self, shape: &str, path: &str) -> Option<&Annotation> {
        self.entries.get(&(shape.to_string(), path.to_string()))
    }

    /// Annotation of the declaration itself
    pub fn declaration(&self, shape: &str) -> Option<&Annotation> {
        self.get(shape, "")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, shape: &str, path: String, annotation: Annotation) {
        self.entries.insert((shape.to_string(), path), annotation);
    }
}

/// Extract annotations for every shape's own fields. Inherited fields are
/// extracted once, under the shape that declares them.
pub fn extract(scan: &ScanOutput<'_>, diags: &mut Diagnostics) -> Annotations {
    let mut annotations = Annotations::default();
    for shape in scan.shapes.iter() {
        let decl = shape.decl;
        if let Some(doc) = &decl.doc {
            annotations.insert(&decl.name, String::new(), parse_comment(doc, diags));
        }
        walk_type(&decl.name, "", &decl.ty, &mut annotations, diags);
    }
    tracing::debug!(annotations = annotations.len(), "annotations extracted");
    annotations
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn walk_type(shape: &str, path: &str, ty: &TypeExpr, out: &mut Annotations, diags: &mut Diagnostics) {
    match &ty.kind {
        TypeKind::Object(object) => {
            for field in &object.fields {
                walk_field(shape, path, field, out, diags);
            }
        }
        TypeKind::Array(element) => walk_type(shape, &format!("{}[]", path), element, out, diags),
        TypeKind::Reference { name, args } if matches!(name.as_str(), "Array" | "ReadonlyArray") => {
            for arg in args {
                walk_type(shape, &format!("{}[]", path), arg, out, diags);
            }
        }
        TypeKind::Union(members) | TypeKind::Intersection(members) => {
            for member in members {
                walk_type(shape, path, member, out, diags);
            }
        }
        _ => {}
    }
}

fn walk_field(shape: &str, parent: &str, field: &Field, out: &mut Annotations, diags: &mut Diagnostics) {
    let path = child_path(parent, &field.name);
    if let Some(doc) = &field.doc {
        let annotation = parse_comment(doc, diags);
        tracing::trace!(shape, path = %path, "annotated field");
        out.insert(shape, path.clone(), annotation);
    }
    if let Some(ty) = &field.ty {
        walk_type(shape, &path, ty, out, diags);
    }
}

/// A content line of a comment with its position
struct CommentLine<'t> {
    text: &'t str,
    span: Span,
}

/// Split a raw comment into content lines, stripping `/**`, `*/` and the
/// leading `*` gutter
fn comment_lines(doc: &DocComment) -> Vec<CommentLine<'_>> {
    let raw = doc.text.as_str();
    let mut lines = Vec::new();
    let mut offset = 0;
    for (index, line) in raw.split('\n').enumerate() {
        let line_start = offset;
        offset += line.len() + 1;

        let mut content = line.trim_start();
        if let Some(rest) = content.strip_prefix("/**") {
            content = rest;
        }
        content = content.trim_end();
        if let Some(rest) = content.strip_suffix("*/") {
            content = rest;
        }
        content = content.trim_start();
        if index > 0 {
            content = content.trim_start_matches('*');
        }
        let content = content.trim();

        let within_line = content.as_ptr() as usize - line.as_ptr() as usize;
        let column = if index == 0 {
            doc.span.column + within_line
        } else {
            within_line + 1
        };
        lines.push(CommentLine {
            text: content,
            span: Span {
                start: doc.span.start + line_start + within_line,
                end: doc.span.start + line_start + within_line + content.len(),
                line: doc.span.line + index,
                column,
            },
        });
    }
    lines
}

/// Parse one doc comment into a description and tag set
pub fn parse_comment(doc: &DocComment, diags: &mut Diagnostics) -> Annotation {
    let mut annotation = Annotation::default();
    let mut description: Vec<&str> = Vec::new();

    for line in comment_lines(doc) {
        let Some(tag_line) = line.text.strip_prefix('@') else {
            description.push(line.text);
            continue;
        };
        let (name, value) = match tag_line.find(char::is_whitespace) {
            Some(split) => (&tag_line[..split], tag_line[split..].trim()),
            None => (tag_line, ""),
        };
        apply_tag(&mut annotation.tags, name, value, line.span, diags);
    }

    while description.first().is_some_and(|l| l.is_empty()) {
        description.remove(0);
    }
    while description.last().is_some_and(|l| l.is_empty()) {
        description.pop();
    }
    if !description.is_empty() {
        annotation.description = Some(description.join("\n"));
    }
    annotation
}

fn apply_tag(tags: &mut TagSet, name: &str, value: &str, span: Span, diags: &mut Diagnostics) {
    let malformed = |diags: &mut Diagnostics, expected: &str| {
        diags.report(
            Code::MalformedTagValue,
            span,
            format!("malformed value `{}` for @{}: expected {}", value, name, expected),
        );
    };

    match name {
        "min" | "max" => match parse_number(value) {
            Some(number) => {
                if name == "min" {
                    tags.minimum = Some(Tagged::at(number, span));
                } else {
                    tags.maximum = Some(Tagged::at(number, span));
                }
            }
            None => malformed(diags, "a numeric literal"),
        },
        "minLength" | "maxLength" => match parse_length(value) {
            Some(length) => {
                if name == "minLength" {
                    tags.min_length = Some(Tagged::at(length, span));
                } else {
                    tags.max_length = Some(Tagged::at(length, span));
                }
            }
            None => malformed(diags, "a non-negative integer"),
        },
        "pattern" => {
            if value.is_empty() {
                malformed(diags, "a regular expression");
            } else if let Err(err) = Regex::new(value) {
                diags.report(
                    Code::InvalidPattern,
                    span,
                    format!("@pattern `{}` does not compile: {}", value, err),
                );
            } else {
                tags.pattern = Some(Tagged::at(value.to_string(), span));
            }
        }
        "format" => {
            if value.is_empty() {
                malformed(diags, "a format name");
                return;
            }
            if !KNOWN_FORMATS.contains(&value) {
                diags.report(
                    Code::UnknownFormat,
                    span,
                    format!("unknown format `{}`", value),
                );
            }
            tags.format = Some(Tagged::at(value.to_string(), span));
        }
        "enum" => {
            let values = parse_enum(value);
            if values.is_empty() {
                malformed(diags, "a list of values");
            } else {
                tags.enum_values = Some(Tagged::at(values, span));
            }
        }
        "required" => match value {
            "" | "true" => tags.required = Some(Tagged::at(true, span)),
            "false" => tags.required = Some(Tagged::at(false, span)),
            _ => malformed(diags, "`true` or `false`"),
        },
        "default" => {
            if value.is_empty() {
                malformed(diags, "a value");
            } else {
                let parsed = serde_json::from_str(value)
                    .unwrap_or_else(|_| Json::String(unquote_bare(value).to_string()));
                tags.default = Some(Tagged::at(parsed, span));
            }
        }
        "deprecated" => tags.deprecated = true,
        _ => diags.report(
            Code::UnknownTag,
            span,
            format!("unknown tag @{} is ignored", name),
        ),
    }
}

/// Strict numeric literal; non-finite values are rejected
fn parse_number(value: &str) -> Option<f64> {
    if !NUMERIC.is_match(value) {
        return None;
    }
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_length(value: &str) -> Option<u64> {
    if !LENGTH.is_match(value) {
        return None;
    }
    value.parse().ok()
}

/// `a, b, c`, `a | b` or `"a" | "b"`
fn parse_enum(value: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for part in value.split([',', '|']) {
        let item = unquote_bare(part.trim());
        if !item.is_empty() && !values.iter().any(|v| v == item) {
            values.push(item.to_string());
        }
    }
    values
}

fn unquote_bare(value: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

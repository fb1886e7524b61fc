/// Type-to-schema translation and descriptor building
///
/// Turns every classified declaration into its descriptor. Field types go
/// through one total recursive translation into [`SchemaNode`] trees, merged
/// with the tags the annotation extractor found for them. Constraint problems
/// are collected as [`ConstraintFinding`]s and reported by the validator;
/// shapes the translator cannot express become `Unsupported` with a warning.

use crate::annotations::{Annotations, TagSet, Tagged};
use crate::descriptors::{
    AuthConfig, CapabilityGroupDescriptor, DescriptorGraph, OperationDescriptor, OperationFlags,
    PromptArgument, PromptContent, PromptDescriptor, ResourceContent, ResourceDescriptor,
    ServiceDescriptor, is_uri_template,
};
use crate::diagnostics::{Code, Diagnostics};
use crate::scanner::{DeclarationKind, MergedField, ScanOutput, ShapeInfo, ShapeTable};
use crate::schema::{Constraints, ObjectField, PrimitiveKind, SchemaNode};
use decl_parser::{Field, Literal, ObjectType, SkippedMember, Span, TypeExpr, TypeKind};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value as Json};
use std::collections::HashSet;

lazy_static! {
    static ref URI: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:.+").unwrap();
}

/// A constraint problem found while merging tags into a schema node
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintFinding {
    pub kind: FindingKind,
    /// Position of the offending tag
    pub span: Span,
    /// `Shape.path.to.field`
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FindingKind {
    /// The tag does not apply to the node kind; it was dropped
    Incompatible { tag: &'static str, node: &'static str },
    /// Lower bound above upper bound; both were kept
    Contradictory { low: &'static str, high: &'static str },
    /// `@enum` lists a different set than the literal union
    EnumMismatch { declared: Vec<String>, tagged: Vec<String> },
    DefaultViolation { reason: String },
    DefaultOnRequired,
}

/// Source positions of one descriptor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Site {
    /// Declaring shape
    pub shape: String,
    /// The shape's name
    pub span: Span,
    /// Spans of the descriptor's merged fields by name
    pub fields: IndexMap<String, Span>,
    /// Per-entry spans of list-valued fields (group members)
    pub items: Vec<Span>,
}

impl Site {
    /// Span of a field, falling back to the declaration name
    pub fn field(&self, name: &str) -> Span {
        self.fields.get(name).copied().unwrap_or(self.span)
    }
}

/// Sites parallel to the descriptor lists of a graph
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceIndex {
    pub service: Option<Site>,
    pub operations: Vec<Site>,
    pub prompts: Vec<Site>,
    pub resources: Vec<Site>,
    pub groups: Vec<Site>,
}

#[derive(Debug, Default)]
pub struct Translation {
    pub graph: DescriptorGraph,
    pub index: SourceIndex,
    pub findings: Vec<ConstraintFinding>,
}

struct Translator<'s, 'a, 'd> {
    shapes: &'s ShapeTable<'a>,
    notes: &'s Annotations,
    diags: &'d mut Diagnostics,
    findings: Vec<ConstraintFinding>,
    /// Shapes currently being expanded, for recursion cut-off
    expanding: Vec<String>,
    warned: HashSet<(usize, String)>,
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn subject(owner: &str, path: &str) -> String {
    if path.is_empty() {
        owner.to_string()
    } else {
        format!("{}.{}", owner, path)
    }
}

impl<'s, 'a, 'd> Translator<'s, 'a, 'd> {
    /// Report once per position; shapes expanded several times would
    /// otherwise repeat their warnings
    fn report_once(&mut self, code: Code, span: Span, message: String) {
        if self.warned.insert((span.start, message.clone())) {
            self.diags.report(code, span, message);
        }
    }

    fn unsupported(&mut self, span: Span, what: &str) -> SchemaNode {
        self.report_once(
            Code::UnsupportedConstruct,
            span,
            format!("{} cannot be translated to a schema", what),
        );
        SchemaNode::unsupported(what)
    }

    fn finding(&mut self, kind: FindingKind, span: Span, subject: &str) {
        let finding = ConstraintFinding {
            kind,
            span,
            subject: subject.to_string(),
        };
        if !self.findings.contains(&finding) {
            self.findings.push(finding);
        }
    }

    fn warn_skipped(&mut self, skipped: &[&SkippedMember]) {
        for member in skipped {
            let what = format!("{}s", member.syntax);
            self.unsupported(member.span, &what);
        }
    }

    /// Translate a type expression. The flag is set when an `undefined`
    /// member made the value optional.
    fn node(&mut self, ty: &TypeExpr, owner: &str, path: &str) -> (SchemaNode, bool) {
        match &ty.kind {
            TypeKind::Keyword(keyword) => match keyword.as_str() {
                "string" => (SchemaNode::leaf(PrimitiveKind::String), false),
                "number" => (SchemaNode::leaf(PrimitiveKind::Number), false),
                "boolean" => (SchemaNode::leaf(PrimitiveKind::Boolean), false),
                "null" => (SchemaNode::leaf(PrimitiveKind::Null), false),
                "undefined" => (SchemaNode::leaf(PrimitiveKind::Null), true),
                "any" | "unknown" => (SchemaNode::leaf(PrimitiveKind::Any), false),
                other => (self.unsupported(ty.span, &format!("`{}` type", other)), false),
            },
            TypeKind::Literal(literal) => match literal {
                Literal::String(value) => (
                    SchemaNode::Enum {
                        values: vec![value.clone()],
                    },
                    false,
                ),
                Literal::Bool(_) => (SchemaNode::leaf(PrimitiveKind::Boolean), false),
                Literal::Number(_) => {
                    self.report_once(
                        Code::UnsupportedConstruct,
                        ty.span,
                        "numeric literal type is widened to number".to_string(),
                    );
                    (SchemaNode::leaf(PrimitiveKind::Number), false)
                }
                Literal::Null => (SchemaNode::leaf(PrimitiveKind::Null), false),
                Literal::Undefined => (SchemaNode::leaf(PrimitiveKind::Null), true),
            },
            TypeKind::Reference { name, args } => self.reference(ty, name, args, owner, path),
            TypeKind::Array(element) => {
                let (items, _) = self.node(element, owner, &format!("{}[]", path));
                (
                    SchemaNode::List {
                        items: Box::new(items),
                        constraints: Constraints::default(),
                    },
                    false,
                )
            }
            TypeKind::Object(object) => (self.inline_object(object, owner, path), false),
            TypeKind::Union(members) => self.union(members, owner, path),
            TypeKind::Tuple(_) => (self.unsupported(ty.span, "tuple type"), false),
            TypeKind::Intersection(_) => (self.unsupported(ty.span, "intersection type"), false),
            TypeKind::Function => (self.unsupported(ty.span, "function type"), false),
            TypeKind::Other(kind) => {
                let what = format!("{} syntax", kind.replace('_', " "));
                (self.unsupported(ty.span, &what), false)
            }
        }
    }

    fn reference(
        &mut self,
        ty: &TypeExpr,
        name: &str,
        args: &[TypeExpr],
        owner: &str,
        path: &str,
    ) -> (SchemaNode, bool) {
        let simple = ty.reference_name().unwrap_or(name);

        if matches!(name, "Array" | "ReadonlyArray") {
            if let [element] = args {
                let (items, _) = self.node(element, owner, &format!("{}[]", path));
                return (
                    SchemaNode::List {
                        items: Box::new(items),
                        constraints: Constraints::default(),
                    },
                    false,
                );
            }
        }

        let shapes = self.shapes;
        if let Some(info) = shapes.get(simple) {
            return self.expand(info, ty.span);
        }

        match simple {
            "Integer" | "integer" | "int" => (SchemaNode::leaf(PrimitiveKind::Integer), false),
            "Date" => (
                SchemaNode::Leaf {
                    kind: PrimitiveKind::String,
                    constraints: Constraints {
                        format: Some("date-time".to_string()),
                        ..Default::default()
                    },
                },
                false,
            ),
            _ if DeclarationKind::from_marker(simple).is_some() => {
                let what = format!("marker `{}` used as a field type", simple);
                (self.unsupported(ty.span, &what), false)
            }
            _ => {
                let what = format!("unknown type `{}`", name);
                (self.unsupported(ty.span, &what), false)
            }
        }
    }

    /// Inline a declared shape, merged with its heritage
    fn expand(&mut self, info: &ShapeInfo<'a>, at: Span) -> (SchemaNode, bool) {
        let name = info.name();
        if self.expanding.iter().any(|n| n == name) {
            let what = format!("recursive reference to `{}`", name);
            return (self.unsupported(at, &what), false);
        }
        self.expanding.push(name.to_string());

        let result = if info.object_like {
            self.warn_skipped(&info.skipped);
            let mut fields = IndexMap::new();
            for merged in &info.fields {
                let entry = self.field_entry(merged.field, merged.owner, &merged.field.name);
                fields.insert(merged.field.name.clone(), entry);
            }
            (SchemaNode::Object { fields }, false)
        } else {
            let (node, undefined) = self.node(&info.decl.ty, name, "");
            let notes = self.notes;
            let node = match notes.declaration(name) {
                Some(note) => self.constrain(node, &note.tags, name),
                None => node,
            };
            (node, undefined)
        };

        self.expanding.pop();
        result
    }

    fn inline_object(&mut self, object: &ObjectType, owner: &str, path: &str) -> SchemaNode {
        let skipped: Vec<&SkippedMember> = object.skipped.iter().collect();
        self.warn_skipped(&skipped);
        let mut fields = IndexMap::new();
        for field in &object.fields {
            let entry = self.field_entry(field, owner, &child_path(path, &field.name));
            fields.insert(field.name.clone(), entry);
        }
        SchemaNode::Object { fields }
    }

    fn union(&mut self, members: &[TypeExpr], owner: &str, path: &str) -> (SchemaNode, bool) {
        let mut undefined = false;
        let mut kept = Vec::new();
        for member in members {
            match &member.kind {
                TypeKind::Literal(Literal::Undefined) => undefined = true,
                TypeKind::Keyword(k) if k == "undefined" => undefined = true,
                TypeKind::Literal(Literal::Null) => self.null_member(member.span),
                TypeKind::Keyword(k) if k == "null" => self.null_member(member.span),
                _ => kept.push(member),
            }
        }

        let node = match kept.as_slice() {
            [] => SchemaNode::leaf(PrimitiveKind::Null),
            [single] => {
                let (node, inner_undefined) = self.node(single, owner, path);
                return (node, undefined || inner_undefined);
            }
            _ if kept.iter().all(|m| m.as_string_literal().is_some()) => {
                let mut values: Vec<String> = Vec::new();
                for value in kept.iter().filter_map(|m| m.as_string_literal()) {
                    if !values.iter().any(|v| v == value) {
                        values.push(value.to_string());
                    }
                }
                SchemaNode::Enum { values }
            }
            _ if kept.iter().all(|m| is_boolean_type(m)) => SchemaNode::leaf(PrimitiveKind::Boolean),
            _ if kept
                .iter()
                .all(|m| matches!(m.kind, TypeKind::Literal(Literal::Number(_)))) =>
            {
                let span = kept[0].span;
                self.report_once(
                    Code::UnsupportedConstruct,
                    span,
                    "numeric literal union is widened to number".to_string(),
                );
                SchemaNode::leaf(PrimitiveKind::Number)
            }
            _ => {
                let span = kept[0].span;
                self.unsupported(span, "union of mixed types")
            }
        };
        (node, undefined)
    }

    fn null_member(&mut self, span: Span) {
        self.report_once(
            Code::UnsupportedConstruct,
            span,
            "`null` union member is ignored".to_string(),
        );
    }

    fn field_entry(&mut self, field: &Field, owner: &str, path: &str) -> ObjectField {
        let (mut schema, undefined) = match &field.ty {
            Some(ty) => self.node(ty, owner, path),
            None => (SchemaNode::leaf(PrimitiveKind::Any), false),
        };
        let mut entry_required = !(field.optional || undefined);
        let mut description = None;
        let mut default = None;
        let mut deprecated = false;

        let notes = self.notes;
        if let Some(note) = notes.get(owner, path) {
            let subject = subject(owner, path);
            schema = self.constrain(schema, &note.tags, &subject);
            if let Some(required) = &note.tags.required {
                entry_required = required.value;
            }
            if let Some(tag) = &note.tags.default {
                if let Some(reason) = default_violation(&schema, &tag.value) {
                    self.finding(FindingKind::DefaultViolation { reason }, tag.span, &subject);
                }
                if entry_required {
                    self.finding(FindingKind::DefaultOnRequired, tag.span, &subject);
                }
                default = Some(tag.value.clone());
            }
            description = note.description.clone();
            deprecated = note.tags.deprecated;
        }

        ObjectField {
            schema,
            required: entry_required,
            description,
            default,
            deprecated,
        }
    }

    /// Merge a tag set into a node. Tags that do not apply to the node kind
    /// are dropped and recorded.
    fn constrain(&mut self, node: SchemaNode, tags: &TagSet, subject: &str) -> SchemaNode {
        let mut node = node;
        if let Some(tag) = &tags.enum_values {
            node = match node {
                SchemaNode::Leaf {
                    kind: PrimitiveKind::String,
                    ..
                } => SchemaNode::Enum {
                    values: tag.value.clone(),
                },
                SchemaNode::Enum { values } => {
                    let same_set = values.len() == tag.value.len()
                        && values.iter().all(|v| tag.value.contains(v));
                    if same_set {
                        SchemaNode::Enum {
                            values: tag.value.clone(),
                        }
                    } else {
                        self.finding(
                            FindingKind::EnumMismatch {
                                declared: values.clone(),
                                tagged: tag.value.clone(),
                            },
                            tag.span,
                            subject,
                        );
                        SchemaNode::Enum { values }
                    }
                }
                SchemaNode::Unsupported { reason } => SchemaNode::Unsupported { reason },
                other => {
                    self.finding(
                        FindingKind::Incompatible {
                            tag: "enum",
                            node: other.describe(),
                        },
                        tag.span,
                        subject,
                    );
                    other
                }
            };
        }

        // Already reported where the node was produced
        if matches!(node, SchemaNode::Unsupported { .. }) {
            return node;
        }
        let node_name = node.describe();
        let (constraints, numeric, sized, textual) = match &mut node {
            SchemaNode::Leaf { kind, constraints } => {
                let textual = *kind == PrimitiveKind::String;
                (Some(constraints), kind.is_numeric(), textual, textual)
            }
            SchemaNode::List { constraints, .. } => (Some(constraints), false, true, false),
            _ => (None, false, false, false),
        };

        let mut dropped: Vec<(&'static str, Span)> = Vec::new();
        let mut scratch = Constraints::default();
        let target = constraints.unwrap_or(&mut scratch);

        apply(&mut target.minimum, &tags.minimum, numeric, "min", &mut dropped);
        apply(&mut target.maximum, &tags.maximum, numeric, "max", &mut dropped);
        apply(&mut target.min_length, &tags.min_length, sized, "minLength", &mut dropped);
        apply(&mut target.max_length, &tags.max_length, sized, "maxLength", &mut dropped);
        apply(&mut target.pattern, &tags.pattern, textual, "pattern", &mut dropped);
        apply(&mut target.format, &tags.format, textual, "format", &mut dropped);

        let mut contradictions = Vec::new();
        if let (Some(low), Some(high)) = (target.minimum, target.maximum) {
            if low > high {
                let span = tags.maximum.as_ref().or(tags.minimum.as_ref()).map(|t| t.span);
                contradictions.extend(span.map(|s| ("min", "max", s)));
            }
        }
        if let (Some(low), Some(high)) = (target.min_length, target.max_length) {
            if low > high {
                let span = tags.max_length.as_ref().or(tags.min_length.as_ref()).map(|t| t.span);
                contradictions.extend(span.map(|s| ("minLength", "maxLength", s)));
            }
        }

        for (tag, span) in dropped {
            self.finding(FindingKind::Incompatible { tag, node: node_name }, span, subject);
        }
        for (low, high, span) in contradictions {
            self.finding(FindingKind::Contradictory { low, high }, span, subject);
        }
        node
    }

    /// Translate a descriptor's own field (params, result, args)
    fn translate_root(&mut self, merged: &MergedField<'_>) -> SchemaNode {
        let path = merged.field.name.as_str();
        let node = match merged.ty() {
            Some(ty) => self.node(ty, merged.owner, path).0,
            None => SchemaNode::leaf(PrimitiveKind::Any),
        };
        let notes = self.notes;
        match notes.get(merged.owner, path) {
            Some(note) => {
                let subject = subject(merged.owner, path);
                self.constrain(node, &note.tags, &subject)
            }
            None => node,
        }
    }

    fn site(&self, info: &ShapeInfo<'_>) -> Site {
        Site {
            shape: info.name().to_string(),
            span: info.decl.name_span,
            fields: info
                .fields
                .iter()
                .map(|f| (f.field.name.clone(), f.field.span))
                .collect(),
            items: Vec::new(),
        }
    }

    fn check_fields(&mut self, info: &ShapeInfo<'_>, kind: DeclarationKind) {
        let recognized = kind.recognized_fields();
        for merged in &info.fields {
            if !recognized.contains(&merged.field.name.as_str()) {
                self.report_once(
                    Code::UnknownField,
                    merged.field.span,
                    format!(
                        "`{}` is not a recognized {} field and is ignored",
                        merged.field.name, kind
                    ),
                );
            }
        }
        self.warn_skipped(&info.skipped);
    }

    fn literal_string(&mut self, info: &ShapeInfo<'_>, field: &str, required: bool) -> Option<String> {
        let Some(merged) = info.field(field) else {
            if required {
                self.diags.report(
                    Code::MissingField,
                    info.decl.name_span,
                    format!("`{}` is missing required field `{}`", info.name(), field),
                );
            }
            return None;
        };
        match merged.ty().and_then(TypeExpr::as_string_literal) {
            Some(value) => Some(value.to_string()),
            None => {
                self.diags.report(
                    Code::NonLiteralField,
                    merged.field.span,
                    format!("field `{}` of `{}` must be a string literal", field, info.name()),
                );
                None
            }
        }
    }

    fn flag(&mut self, info: &ShapeInfo<'_>, field: &str) -> bool {
        let Some(merged) = info.field(field) else {
            return false;
        };
        match merged.ty().and_then(TypeExpr::as_bool_literal) {
            Some(value) => value,
            None => {
                self.diags.report(
                    Code::InvalidFieldType,
                    merged.field.span,
                    format!("`{}` of `{}` must be `true` or `false`", field, info.name()),
                );
                false
            }
        }
    }

    /// Literal `description` field, else the declaration's doc comment
    fn description(&mut self, info: &ShapeInfo<'_>) -> Option<String> {
        if info.field("description").is_some() {
            return self.literal_string(info, "description", false);
        }
        self.notes
            .declaration(info.name())
            .and_then(|note| note.description.clone())
    }

    fn object_root(&mut self, info: &ShapeInfo<'_>, field: &str) -> Option<SchemaNode> {
        let merged = *info.field(field)?;
        let node = self.translate_root(&merged);
        match node {
            SchemaNode::Object { .. } => Some(node),
            other => {
                if !matches!(other, SchemaNode::Unsupported { .. }) {
                    self.diags.report(
                        Code::InvalidFieldType,
                        merged.field.span,
                        format!(
                            "`{}` of `{}` must be an object type, found {}",
                            field,
                            info.name(),
                            other.describe()
                        ),
                    );
                }
                None
            }
        }
    }

    fn service(&mut self, info: &ShapeInfo<'_>, translation: &mut Translation) {
        self.check_fields(info, DeclarationKind::Service);
        let name = self.literal_string(info, "name", true);
        let version = self.literal_string(info, "version", true);
        let description = self.description(info);
        let auth = match info.field("auth") {
            Some(merged) => {
                let merged = *merged;
                self.auth(&merged)
            }
            None => None,
        };
        let (Some(name), Some(version)) = (name, version) else {
            return;
        };
        if let Some(existing) = &translation.graph.service {
            self.diags.report(
                Code::DuplicateService,
                info.decl.name_span,
                format!(
                    "service `{}` is declared after service `{}`; a file declares exactly one",
                    name, existing.name
                ),
            );
            return;
        }
        translation.graph.service = Some(ServiceDescriptor {
            name,
            version,
            description,
            auth,
        });
        translation.index.service = Some(self.site(info));
    }

    fn auth(&mut self, merged: &MergedField<'_>) -> Option<AuthConfig> {
        let span = merged.field.span;
        let Some(TypeKind::Object(object)) = merged.ty().map(|t| &t.kind) else {
            self.diags.report(Code::InvalidAuth, span, "`auth` must be an object type");
            return None;
        };
        let field = |name: &str| {
            object
                .fields
                .iter()
                .find(|f| f.name == name)
                .and_then(|f| f.ty.as_ref())
        };
        let optional_literal = |name: &str| -> Result<Option<String>, String> {
            match field(name) {
                None => Ok(None),
                Some(ty) => ty
                    .as_string_literal()
                    .map(|s| Some(s.to_string()))
                    .ok_or_else(|| format!("auth `{}` must be a string literal", name)),
            }
        };

        let result = match field("type").and_then(TypeExpr::as_string_literal) {
            Some("apiKey") => optional_literal("header").and_then(|header| {
                Ok(AuthConfig::ApiKey {
                    header: header.unwrap_or_else(|| "Authorization".to_string()),
                    env: optional_literal("env")?,
                })
            }),
            Some("oauth") => optional_literal("issuer").and_then(|issuer| {
                let issuer = issuer.ok_or_else(|| "oauth auth requires an `issuer`".to_string())?;
                let scopes = match field("scopes") {
                    None => Vec::new(),
                    Some(ty) => string_list(ty)
                        .map(|items| items.into_iter().map(|(s, _)| s).collect())
                        .ok_or_else(|| "auth `scopes` must list string literals".to_string())?,
                };
                Ok(AuthConfig::OAuth {
                    issuer,
                    audience: optional_literal("audience")?,
                    scopes,
                })
            }),
            _ => Err("auth `type` must be \"apiKey\" or \"oauth\"".to_string()),
        };

        match result {
            Ok(auth) => Some(auth),
            Err(message) => {
                self.diags.report(Code::InvalidAuth, span, message);
                None
            }
        }
    }

    fn operation(&mut self, info: &ShapeInfo<'_>, translation: &mut Translation) {
        self.check_fields(info, DeclarationKind::Operation);
        let name = self.literal_string(info, "name", true);
        let description = self.description(info);
        let params = self
            .object_root(info, "params")
            .unwrap_or_else(SchemaNode::empty_object);
        let result = match info.field("result") {
            Some(merged) => {
                let merged = *merged;
                Some(self.translate_root(&merged))
            }
            None => None,
        };
        let flags = OperationFlags {
            read_only: self.flag(info, "readOnly"),
            destructive: self.flag(info, "destructive"),
            idempotent: self.flag(info, "idempotent"),
            open_world: self.flag(info, "openWorld"),
            requires_confirmation: self.flag(info, "requiresConfirmation"),
        };
        let Some(name) = name else {
            return;
        };
        tracing::trace!(operation = %name, "translated operation");
        translation.graph.operations.push(OperationDescriptor {
            name,
            description,
            params,
            result,
            flags,
            handler: None,
        });
        translation.index.operations.push(self.site(info));
    }

    fn prompt(&mut self, info: &ShapeInfo<'_>, translation: &mut Translation) {
        self.check_fields(info, DeclarationKind::Prompt);
        let name = self.literal_string(info, "name", true);
        let description = self.description(info);

        let mut arguments = Vec::new();
        if let Some(SchemaNode::Object { fields }) = self.object_root(info, "args") {
            for (arg_name, field) in fields {
                arguments.push(PromptArgument {
                    name: arg_name,
                    description: field.description,
                    required: field.required,
                    schema: field.schema,
                    default: field.default,
                    deprecated: field.deprecated,
                });
            }
        }

        let template = match info.field("template") {
            Some(_) => self.literal_string(info, "template", false),
            None => None,
        };
        let has_template = info.field("template").is_some();
        let dynamic = self.flag(info, "dynamic");

        let content = match (template, dynamic) {
            (Some(text), false) => PromptContent::Template(text),
            (None, true) if !has_template => PromptContent::Dynamic,
            (template, _) => {
                if has_template && dynamic {
                    self.diags.report(
                        Code::ConflictingContent,
                        info.decl.name_span,
                        format!("prompt `{}` declares both a `template` and `dynamic: true`", info.name()),
                    );
                } else if !has_template {
                    self.diags.report(
                        Code::ConflictingContent,
                        info.decl.name_span,
                        format!("prompt `{}` needs either a `template` or `dynamic: true`", info.name()),
                    );
                }
                PromptContent::Template(template.unwrap_or_default())
            }
        };

        let Some(name) = name else {
            return;
        };
        translation.graph.prompts.push(PromptDescriptor {
            name,
            description,
            arguments,
            content,
            handler: None,
        });
        translation.index.prompts.push(self.site(info));
    }

    fn resource(&mut self, info: &ShapeInfo<'_>, translation: &mut Translation) {
        self.check_fields(info, DeclarationKind::Resource);
        let uri = self.literal_string(info, "uri", true);
        let name = self.literal_string(info, "name", true);
        let description = self.description(info);
        let mime_type = match info.field("mimeType") {
            Some(_) => self.literal_string(info, "mimeType", false),
            None => None,
        };
        let subscribable = self.flag(info, "subscribable");
        // A subscribable resource is served by its handler
        let dynamic = self.flag(info, "dynamic") || subscribable;

        let data_field = info.field("data").copied();
        let data = data_field.and_then(|merged| {
            let json = merged.ty().and_then(literal_json);
            if json.is_none() {
                self.diags.report(
                    Code::InvalidFieldType,
                    merged.field.span,
                    format!("`data` of `{}` must be built from literal types", info.name()),
                );
            }
            json
        });

        let content = match (data_field.is_some(), dynamic) {
            (true, false) => ResourceContent::Static(data.unwrap_or(Json::Null)),
            (false, true) => ResourceContent::Dynamic,
            (has_data, _) => {
                let message = if has_data {
                    format!(
                        "resource `{}` declares both `data` and `dynamic: true` or `subscribable: true`",
                        info.name()
                    )
                } else {
                    format!(
                        "resource `{}` needs either `data`, `dynamic: true` or `subscribable: true`",
                        info.name()
                    )
                };
                self.diags
                    .report(Code::ConflictingContent, info.decl.name_span, message);
                ResourceContent::Static(data.unwrap_or(Json::Null))
            }
        };

        let Some(uri) = uri else {
            return;
        };
        let uri_span = info.field("uri").map(|f| f.field.span).unwrap_or(info.decl.name_span);
        if !URI.is_match(&uri) {
            self.diags.report(
                Code::InvalidUri,
                uri_span,
                format!("`{}` is not a valid URI; expected `scheme:rest`", uri),
            );
        }
        if is_uri_template(&uri) && !dynamic {
            self.diags.report(
                Code::ConflictingContent,
                uri_span,
                format!("resource template `{}` must be dynamic", uri),
            );
        }

        let Some(name) = name else {
            return;
        };
        let mime_type = mime_type.unwrap_or_else(|| {
            let default = match &content {
                ResourceContent::Static(Json::String(_)) | ResourceContent::Dynamic => "text/plain",
                ResourceContent::Static(_) => "application/json",
            };
            default.to_string()
        });

        translation.graph.resources.push(ResourceDescriptor {
            uri,
            name,
            mime_type,
            description,
            subscribable,
            content,
            handler: None,
        });
        translation.index.resources.push(self.site(info));
    }

    fn group(&mut self, info: &ShapeInfo<'_>, translation: &mut Translation) {
        self.check_fields(info, DeclarationKind::CapabilityGroup);
        let name = self.literal_string(info, "name", true);
        let description = self.description(info);

        let mut operations = Vec::new();
        let mut items = Vec::new();
        match info.field("tools").copied() {
            None => self.diags.report(
                Code::MissingField,
                info.decl.name_span,
                format!("`{}` is missing required field `tools`", info.name()),
            ),
            Some(merged) => match merged.ty().and_then(string_list) {
                Some(list) => {
                    for (op, span) in list {
                        operations.push(op);
                        items.push(span);
                    }
                }
                None => self.diags.report(
                    Code::InvalidFieldType,
                    merged.field.span,
                    format!("`tools` of `{}` must list operation names as string literals", info.name()),
                ),
            },
        }

        let Some(name) = name else {
            return;
        };
        translation.graph.groups.push(CapabilityGroupDescriptor {
            name,
            description,
            operations,
        });
        let mut site = self.site(info);
        site.items = items;
        translation.index.groups.push(site);
    }
}

fn apply<T: Clone>(
    slot: &mut Option<T>,
    tag: &Option<Tagged<T>>,
    allowed: bool,
    name: &'static str,
    dropped: &mut Vec<(&'static str, Span)>,
) {
    if let Some(tag) = tag {
        if allowed {
            *slot = Some(tag.value.clone());
        } else {
            dropped.push((name, tag.span));
        }
    }
}

fn is_boolean_type(ty: &TypeExpr) -> bool {
    match &ty.kind {
        TypeKind::Literal(Literal::Bool(_)) => true,
        TypeKind::Keyword(k) => k == "boolean",
        _ => false,
    }
}

/// `["a", "b"]`, `"a" | "b"` or `"a"`, with each entry's span
fn string_list(ty: &TypeExpr) -> Option<Vec<(String, Span)>> {
    let members: Vec<&TypeExpr> = match &ty.kind {
        TypeKind::Tuple(members) | TypeKind::Union(members) => members.iter().collect(),
        TypeKind::Literal(Literal::String(_)) => vec![ty],
        _ => return None,
    };
    members
        .into_iter()
        .map(|m| m.as_string_literal().map(|s| (s.to_string(), m.span)))
        .collect()
}

/// JSON value spelled by a literal type
fn literal_json(ty: &TypeExpr) -> Option<Json> {
    match &ty.kind {
        TypeKind::Literal(Literal::String(s)) => Some(Json::String(s.clone())),
        TypeKind::Literal(Literal::Number(text)) => serde_json::from_str::<Json>(text)
            .ok()
            .filter(Json::is_number),
        TypeKind::Literal(Literal::Bool(b)) => Some(Json::Bool(*b)),
        TypeKind::Literal(Literal::Null) => Some(Json::Null),
        TypeKind::Keyword(k) if k == "null" => Some(Json::Null),
        TypeKind::Tuple(members) => members.iter().map(literal_json).collect::<Option<Vec<_>>>().map(Json::Array),
        TypeKind::Object(object) if object.skipped.is_empty() => {
            let mut map = Map::new();
            for field in &object.fields {
                map.insert(field.name.clone(), literal_json(field.ty.as_ref()?)?);
            }
            Some(Json::Object(map))
        }
        _ => None,
    }
}

/// Why `value` cannot be a default for `node`, if it cannot
fn default_violation(node: &SchemaNode, value: &Json) -> Option<String> {
    match node {
        SchemaNode::Leaf { kind, constraints } => {
            match kind {
                PrimitiveKind::String => {
                    let Some(text) = value.as_str() else {
                        return Some("expected a string".to_string());
                    };
                    let length = text.chars().count() as u64;
                    if let Some(min) = constraints.min_length.filter(|&min| length < min) {
                        return Some(format!("shorter than minLength {}", min));
                    }
                    if let Some(max) = constraints.max_length.filter(|&max| length > max) {
                        return Some(format!("longer than maxLength {}", max));
                    }
                    if let Some(pattern) = &constraints.pattern {
                        if let Ok(re) = Regex::new(pattern) {
                            if !re.is_match(text) {
                                return Some(format!("does not match pattern `{}`", pattern));
                            }
                        }
                    }
                }
                PrimitiveKind::Number | PrimitiveKind::Integer => {
                    let Some(number) = value.as_f64() else {
                        return Some("expected a number".to_string());
                    };
                    if *kind == PrimitiveKind::Integer && number.fract() != 0.0 {
                        return Some("expected an integer".to_string());
                    }
                    if let Some(min) = constraints.minimum.filter(|&min| number < min) {
                        return Some(format!("below minimum {}", min));
                    }
                    if let Some(max) = constraints.maximum.filter(|&max| number > max) {
                        return Some(format!("above maximum {}", max));
                    }
                }
                PrimitiveKind::Boolean if !value.is_boolean() => {
                    return Some("expected a boolean".to_string());
                }
                PrimitiveKind::Null if !value.is_null() => {
                    return Some("expected null".to_string());
                }
                _ => {}
            }
            None
        }
        SchemaNode::Enum { values } => match value.as_str() {
            Some(text) if values.iter().any(|v| v == text) => None,
            _ => Some(format!("not one of {}", values.join(", "))),
        },
        SchemaNode::List { constraints, .. } => {
            let Some(items) = value.as_array() else {
                return Some("expected an array".to_string());
            };
            let length = items.len() as u64;
            if let Some(min) = constraints.min_length.filter(|&min| length < min) {
                return Some(format!("fewer than minLength {} items", min));
            }
            if let Some(max) = constraints.max_length.filter(|&max| length > max) {
                return Some(format!("more than maxLength {} items", max));
            }
            None
        }
        SchemaNode::Object { .. } if !value.is_object() => Some("expected an object".to_string()),
        _ => None,
    }
}

/// Build the descriptor graph from the scanned declarations
pub fn translate(scan: &ScanOutput<'_>, notes: &Annotations, diags: &mut Diagnostics) -> Translation {
    let mut translator = Translator {
        shapes: &scan.shapes,
        notes,
        diags,
        findings: Vec::new(),
        expanding: Vec::new(),
        warned: HashSet::new(),
    };
    let mut translation = Translation::default();

    for declaration in &scan.declarations {
        let Some(info) = scan.shapes.get(&declaration.shape.name) else {
            continue;
        };
        translator.expanding.clear();
        translator.expanding.push(info.name().to_string());
        match declaration.kind {
            DeclarationKind::Service => translator.service(info, &mut translation),
            DeclarationKind::Operation => translator.operation(info, &mut translation),
            DeclarationKind::Prompt => translator.prompt(info, &mut translation),
            DeclarationKind::Resource => translator.resource(info, &mut translation),
            DeclarationKind::CapabilityGroup => translator.group(info, &mut translation),
            DeclarationKind::ParameterShape => {}
        }
    }

    if scan.of_kind(DeclarationKind::Service).next().is_none() {
        translator.diags.report(
            Code::MissingService,
            Span {
                start: 0,
                end: 0,
                line: 1,
                column: 1,
            },
            "no service declaration found",
        );
    }

    translation.findings = translator.findings;
    tracing::debug!(
        operations = translation.graph.operations.len(),
        prompts = translation.graph.prompts.len(),
        resources = translation.graph.resources.len(),
        groups = translation.graph.groups.len(),
        findings = translation.findings.len(),
        "translation complete"
    );
    translation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations;
    use crate::scanner;
    use decl_parser::parse;
    use pretty_assertions::assert_eq;

    const SERVICE: &str = "interface Svc extends Server { name: \"svc\"; version: \"1.0.0\" }\n";

    fn run(source: &str) -> (Translation, Vec<String>) {
        let file = parse(source).unwrap();
        let mut diags = Diagnostics::new("test.ts");
        let scan = scanner::scan(&file, &mut diags);
        let notes = annotations::extract(&scan, &mut diags);
        let translation = translate(&scan, &notes, &mut diags);
        let codes = diags.iter().map(|d| d.code.to_string()).collect();
        (translation, codes)
    }

    fn params(translation: &Translation, index: usize) -> &IndexMap<String, ObjectField> {
        translation.graph.operations[index].params.fields().unwrap()
    }

    #[test]
    fn test_add_operation() {
        let (t, codes) = run(&format!(
            "{}interface Add extends Tool {{ name: \"add\"; params: {{ a: number; b: number }}; result: number }}",
            SERVICE
        ));
        assert!(codes.is_empty(), "{:?}", codes);
        let op = &t.graph.operations[0];
        assert_eq!(op.name, "add");
        let fields = params(&t, 0);
        assert_eq!(fields["a"], ObjectField::new(SchemaNode::leaf(PrimitiveKind::Number), true));
        assert_eq!(fields["b"], ObjectField::new(SchemaNode::leaf(PrimitiveKind::Number), true));
        assert_eq!(op.result, Some(SchemaNode::leaf(PrimitiveKind::Number)));
        assert_eq!(t.graph.service.as_ref().map(|s| s.version.as_str()), Some("1.0.0"));
    }

    #[test]
    fn test_optional_markers_and_required_override() {
        let (t, _) = run(&format!(
            r#"{}interface Op extends Tool {{
  name: "op";
  params: {{
    a?: string;
    b: string | undefined;
    /** @required */
    c?: string;
    /** @required false */
    d: string;
  }};
}}"#,
            SERVICE
        ));
        let fields = params(&t, 0);
        let required: Vec<bool> = fields.values().map(|f| f.required).collect();
        assert_eq!(required, vec![false, false, true, false]);
    }

    #[test]
    fn test_enum_order_and_tag_order() {
        let (t, codes) = run(&format!(
            r#"{}interface Op extends Tool {{
  name: "op";
  params: {{
    mode: "zeta" | "alpha" | "mid";
    /** @enum b, a */
    pick: "a" | "b";
    /** @enum x | y */
    free: string;
  }};
}}"#,
            SERVICE
        ));
        assert!(codes.is_empty(), "{:?}", codes);
        let fields = params(&t, 0);
        assert_eq!(
            fields["mode"].schema,
            SchemaNode::Enum {
                values: vec!["zeta".into(), "alpha".into(), "mid".into()]
            }
        );
        assert_eq!(
            fields["pick"].schema,
            SchemaNode::Enum {
                values: vec!["b".into(), "a".into()]
            }
        );
        assert_eq!(
            fields["free"].schema,
            SchemaNode::Enum {
                values: vec!["x".into(), "y".into()]
            }
        );
    }

    #[test]
    fn test_pattern_on_number_is_dropped() {
        let (t, _) = run(&format!(
            "{}interface Op extends Tool {{ name: \"op\"; params: {{ /** @pattern ^1 */ n: number }} }}",
            SERVICE
        ));
        assert_eq!(params(&t, 0)["n"].schema, SchemaNode::leaf(PrimitiveKind::Number));
        assert_eq!(t.findings.len(), 1);
        assert_eq!(
            t.findings[0].kind,
            FindingKind::Incompatible {
                tag: "pattern",
                node: "number"
            }
        );
        assert_eq!(t.findings[0].subject, "Op.params.n");
    }

    #[test]
    fn test_contradictions_and_defaults() {
        let (t, _) = run(&format!(
            r#"{}interface Op extends Tool {{
  name: "op";
  params: {{
    /**
     * @min 10
     * @max 1
     */
    n: number;
    /** @default 99
     * @max 5 */
    m?: number;
    /** @default 1 */
    r: number;
  }};
}}"#,
            SERVICE
        ));
        let kinds: Vec<_> = t.findings.iter().map(|f| &f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &FindingKind::Contradictory {
                    low: "min",
                    high: "max"
                },
                &FindingKind::DefaultViolation {
                    reason: "above maximum 5".to_string()
                },
                &FindingKind::DefaultOnRequired,
            ]
        );
        let n = &params(&t, 0)["n"].schema;
        match n {
            SchemaNode::Leaf { constraints, .. } => {
                assert_eq!(constraints.minimum, Some(10.0));
                assert_eq!(constraints.maximum, Some(1.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shape_references_lists_and_recursion() {
        let (t, codes) = run(&format!(
            r#"{}
interface Address {{ /** @pattern ^[0-9]{{5}}$ */ zip: string }}
interface Tree {{ label: string; children: Tree[] }}
interface Op extends Tool {{
  name: "op";
  params: {{ to: Address; tags: Array<string>; when: Date; count: Integer; tree: Tree }};
}}"#,
            SERVICE
        ));
        assert_eq!(codes, vec!["W0801"]);
        let fields = params(&t, 0);
        let to = fields["to"].schema.fields().unwrap();
        match &to["zip"].schema {
            SchemaNode::Leaf { constraints, .. } => {
                assert_eq!(constraints.pattern.as_deref(), Some("^[0-9]{5}$"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(fields["tags"].schema, SchemaNode::List { .. }));
        assert_eq!(fields["count"].schema, SchemaNode::leaf(PrimitiveKind::Integer));
        let tree = fields["tree"].schema.fields().unwrap();
        match &tree["children"].schema {
            SchemaNode::List { items, .. } => assert!(matches!(**items, SchemaNode::Unsupported { .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_constructs_warn() {
        let (t, codes) = run(&format!(
            r#"{}interface Op extends Tool {{
  name: "op";
  params: {{ a: [string, number]; b: string | number; c: 1 | 2; d: string | null; e: () => void }};
}}"#,
            SERVICE
        ));
        assert_eq!(codes, vec!["W0801"; 5]);
        let fields = params(&t, 0);
        assert_eq!(fields["c"].schema, SchemaNode::leaf(PrimitiveKind::Number));
        assert_eq!(fields["d"].schema, SchemaNode::leaf(PrimitiveKind::String));
    }

    #[test]
    fn test_descriptor_field_problems() {
        let (t, codes) = run(
            r#"
interface Svc extends Server { name: "svc"; version: string; color: "red" }
interface Op extends Tool { name: "op"; params: string; readOnly: boolean }
interface Missing extends Tool { params: {} }
"#,
        );
        assert_eq!(codes, vec!["W0803", "E0103", "E0111", "E0111", "E0102"]);
        assert!(t.graph.service.is_none());
        assert_eq!(t.graph.operations.len(), 1);
        assert_eq!(t.graph.operations[0].params, SchemaNode::empty_object());
    }

    #[test]
    fn test_prompts_resources_groups_and_auth() {
        let (t, codes) = run(
            r#"
interface Svc extends Server {
  name: "svc";
  version: "2";
  auth: { type: "oauth"; issuer: "https://id.example.com"; scopes: ["read", "write"] };
}
/** Say hi */
interface Hello extends Prompt {
  name: "hello";
  args: { /** Who to greet */ who: string; tone?: "formal" | "casual" };
  template: "Hello {{who}}";
}
interface Settings extends Resource { uri: "config://settings"; name: "settings"; data: { debug: false; level: 3 } }
interface Files extends Resource { uri: "files://{path}"; name: "files"; dynamic: true }
interface Math extends ToolGroup { name: "math"; tools: ["add", "sub"] }
"#,
        );
        assert!(codes.is_empty(), "{:?}", codes);
        let service = t.graph.service.as_ref().unwrap();
        assert_eq!(
            service.auth,
            Some(AuthConfig::OAuth {
                issuer: "https://id.example.com".into(),
                audience: None,
                scopes: vec!["read".into(), "write".into()],
            })
        );

        let prompt = &t.graph.prompts[0];
        assert_eq!(prompt.description.as_deref(), Some("Say hi"));
        assert_eq!(prompt.content, PromptContent::Template("Hello {{who}}".into()));
        assert_eq!(prompt.arguments[0].description.as_deref(), Some("Who to greet"));
        assert!(!prompt.arguments[1].required);

        let settings = &t.graph.resources[0];
        assert_eq!(settings.mime_type, "application/json");
        assert_eq!(
            settings.content,
            ResourceContent::Static(serde_json::json!({ "debug": false, "level": 3 }))
        );
        let files = &t.graph.resources[1];
        assert!(files.is_dynamic());
        assert_eq!(files.mime_type, "text/plain");

        assert_eq!(t.graph.groups[0].operations, vec!["add", "sub"]);
        assert_eq!(t.index.groups[0].items.len(), 2);
    }

    #[test]
    fn test_content_conflicts_and_uris() {
        let (_, codes) = run(&format!(
            r#"{}
interface P1 extends Prompt {{ name: "p1"; template: "x"; dynamic: true }}
interface P2 extends Prompt {{ name: "p2" }}
interface R1 extends Resource {{ uri: "not a uri"; name: "r1"; data: "x" }}
interface R2 extends Resource {{ uri: "files://{{id}}"; name: "r2"; data: "x" }}
"#,
            SERVICE
        ));
        assert_eq!(codes, vec!["E0109", "E0109", "E0108", "E0109"]);
    }

    #[test]
    fn test_missing_service_and_duplicates() {
        let (_, codes) = run("interface Op extends Tool { name: \"op\" }");
        assert_eq!(codes, vec!["W0805"]);

        let (_, codes) = run(&format!(
            "{}interface Other extends Server {{ name: \"other\"; version: \"1\" }}",
            SERVICE
        ));
        assert_eq!(codes, vec!["E0106"]);
    }
}

/// Declaration emitter
///
/// Writes a descriptor graph back out as a declaration file in the same
/// TypeScript dialect the compiler reads. Compiling the emitted file gives an
/// equal graph, except for description formatting and nodes that were
/// already `Unsupported`. Constraints on list items are not written.

use crate::descriptors::{
    AuthConfig, CapabilityGroupDescriptor, DescriptorGraph, OperationDescriptor, PromptContent,
    PromptDescriptor, ResourceContent, ResourceDescriptor, ServiceDescriptor,
};
use crate::error::Result;
use crate::naming;
use crate::schema::{Constraints, ObjectField, PrimitiveKind, SchemaNode};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as Json;
use std::collections::HashSet;
use std::fmt::Write as _;

pub const DEFAULT_MARKER_MODULE: &str = "@decl/markers";

/// Name of the class that carries default-export handler stubs
const HANDLER_CLASS: &str = "__handlers";

const HANDLER_SIGNATURE: &str = "(args?: unknown, context?: unknown): unknown;";

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

fn quote(text: &str) -> String {
    Json::String(text.to_string()).to_string()
}

fn property(name: &str) -> String {
    if IDENTIFIER.is_match(name) {
        name.to_string()
    } else {
        quote(name)
    }
}

/// Whether text survives a trip through a doc comment unchanged
fn doc_safe(text: &str) -> bool {
    !text.contains("*/") && text.lines().all(|line| !line.trim_start().starts_with('@'))
}

fn doc_line(line: &str) -> String {
    let line = line.replace("*/", "*\\/");
    match line.trim_start().strip_prefix('@') {
        Some(rest) => format!("\\@{}", rest),
        None => line,
    }
}

/// TypeScript literal type for a JSON value
fn literal_type(value: &Json) -> String {
    match value {
        Json::Null => "null".to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => quote(s),
        Json::Array(items) => {
            let items: Vec<String> = items.iter().map(literal_type).collect();
            format!("[{}]", items.join(", "))
        }
        Json::Object(map) if map.is_empty() => "{}".to_string(),
        Json::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", property(k), literal_type(v)))
                .collect();
            format!("{{ {} }}", entries.join("; "))
        }
    }
}

fn constraint_tags(constraints: &Constraints, tags: &mut Vec<String>) {
    if let Some(min) = constraints.minimum {
        tags.push(format!("@min {}", min));
    }
    if let Some(max) = constraints.maximum {
        tags.push(format!("@max {}", max));
    }
    if let Some(min) = constraints.min_length {
        tags.push(format!("@minLength {}", min));
    }
    if let Some(max) = constraints.max_length {
        tags.push(format!("@maxLength {}", max));
    }
    if let Some(pattern) = &constraints.pattern {
        tags.push(format!("@pattern {}", pattern.replace("*/", "*\\/")));
    }
    if let Some(format) = &constraints.format {
        tags.push(format!("@format {}", format));
    }
}

fn node_tags(node: &SchemaNode) -> Vec<String> {
    let mut tags = Vec::new();
    match node {
        SchemaNode::Leaf { constraints, .. } | SchemaNode::List { constraints, .. } => {
            constraint_tags(constraints, &mut tags)
        }
        _ => {}
    }
    tags
}

fn uses_integer(node: &SchemaNode) -> bool {
    match node {
        SchemaNode::Leaf { kind, .. } => *kind == PrimitiveKind::Integer,
        SchemaNode::List { items, .. } => uses_integer(items),
        SchemaNode::Object { fields } => fields.values().any(|f| uses_integer(&f.schema)),
        SchemaNode::Enum { .. } | SchemaNode::Unsupported { .. } => false,
    }
}

/// Emits one declaration file for a graph
pub struct DeclarationEmitter<'g> {
    graph: &'g DescriptorGraph,
    marker_module: String,
    output: String,
    indent: usize,
    /// Interface names already taken, markers included
    names: HashSet<String>,
}

impl<'g> DeclarationEmitter<'g> {
    pub fn new(graph: &'g DescriptorGraph, marker_module: impl Into<String>) -> Self {
        let names = [
            "Server", "Service", "Tool", "Operation", "Prompt", "Resource", "ToolGroup",
            "CapabilityGroup", "Integer", HANDLER_CLASS,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self {
            graph,
            marker_module: marker_module.into(),
            output: String::new(),
            indent: 0,
            names,
        }
    }

    pub fn emit(mut self) -> Result<String> {
        writeln!(self.output, "// Generated by declc. Edit the source declarations instead.")?;
        self.write_imports()?;

        let graph = self.graph;
        if let Some(service) = &graph.service {
            self.write_service(service)?;
        }
        for op in &graph.operations {
            self.write_operation(op)?;
        }
        for prompt in &graph.prompts {
            self.write_prompt(prompt)?;
        }
        for resource in &graph.resources {
            self.write_resource(resource)?;
        }
        for group in &graph.groups {
            self.write_group(group)?;
        }
        self.write_handlers()?;

        tracing::debug!(bytes = self.output.len(), "emitted declarations");
        Ok(self.output)
    }

    fn write_imports(&mut self) -> Result<()> {
        let graph = self.graph;
        let mut markers = Vec::new();
        if graph.service.is_some() {
            markers.push("Server");
        }
        if !graph.operations.is_empty() {
            markers.push("Tool");
        }
        if !graph.prompts.is_empty() {
            markers.push("Prompt");
        }
        if !graph.resources.is_empty() {
            markers.push("Resource");
        }
        if !graph.groups.is_empty() {
            markers.push("ToolGroup");
        }
        let integer = graph.operations.iter().any(|op| {
            uses_integer(&op.params) || op.result.as_ref().is_some_and(uses_integer)
        }) || graph
            .prompts
            .iter()
            .any(|p| p.arguments.iter().any(|a| uses_integer(&a.schema)));
        if integer {
            markers.push("Integer");
        }
        if !markers.is_empty() {
            writeln!(
                self.output,
                "import type {{ {} }} from {};",
                markers.join(", "),
                quote(&self.marker_module)
            )?;
        }
        Ok(())
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str("  ");
        }
    }

    fn interface_name(&mut self, name: &str, suffix: &str) -> String {
        let mut base = naming::pascal_case(name);
        if !base.starts_with(|c: char| c.is_ascii_alphabetic()) {
            base.insert(0, 'X');
        }
        let mut candidate = format!("{}{}", base, suffix);
        let mut counter = 2;
        while self.names.contains(&candidate) {
            candidate = format!("{}{}{}", base, suffix, counter);
            counter += 1;
        }
        self.names.insert(candidate.clone());
        candidate
    }

    fn write_doc(&mut self, description: Option<&str>, tags: &[String]) -> Result<()> {
        let mut lines: Vec<String> = description
            .map(|d| d.lines().map(doc_line).collect())
            .unwrap_or_default();
        lines.extend(tags.iter().cloned());
        match lines.len() {
            0 => {}
            1 => {
                self.write_indent();
                writeln!(self.output, "/** {} */", lines[0])?;
            }
            _ => {
                self.write_indent();
                writeln!(self.output, "/**")?;
                for line in &lines {
                    self.write_indent();
                    if line.is_empty() {
                        writeln!(self.output, " *")?;
                    } else {
                        writeln!(self.output, " * {}", line)?;
                    }
                }
                self.write_indent();
                writeln!(self.output, " */")?;
            }
        }
        Ok(())
    }

    /// Open an interface; unsafe descriptions become a literal field
    fn open_interface(&mut self, name: &str, marker: &str, description: Option<&str>) -> Result<()> {
        writeln!(self.output)?;
        let literal = match description {
            Some(text) if doc_safe(text) => {
                self.write_doc(Some(text), &[])?;
                None
            }
            other => other,
        };
        writeln!(self.output, "interface {} extends {} {{", name, marker)?;
        self.indent += 1;
        if let Some(text) = literal {
            self.line("description", &quote(text))?;
        }
        Ok(())
    }

    fn close_interface(&mut self) -> Result<()> {
        self.indent -= 1;
        writeln!(self.output, "}}")?;
        Ok(())
    }

    fn line(&mut self, field: &str, ty: &str) -> Result<()> {
        self.write_indent();
        writeln!(self.output, "{}: {};", field, ty)?;
        Ok(())
    }

    fn flag(&mut self, field: &str, set: bool) -> Result<()> {
        if set {
            self.line(field, "true")?;
        }
        Ok(())
    }

    fn write_service(&mut self, service: &ServiceDescriptor) -> Result<()> {
        let name = self.interface_name(&service.name, "Service");
        self.open_interface(&name, "Server", service.description.as_deref())?;
        self.line("name", &quote(&service.name))?;
        self.line("version", &quote(&service.version))?;
        match &service.auth {
            Some(AuthConfig::ApiKey { header, env }) => {
                let mut parts = vec![
                    format!("type: {}", quote("apiKey")),
                    format!("header: {}", quote(header)),
                ];
                if let Some(env) = env {
                    parts.push(format!("env: {}", quote(env)));
                }
                self.line("auth", &format!("{{ {} }}", parts.join("; ")))?;
            }
            Some(AuthConfig::OAuth {
                issuer,
                audience,
                scopes,
            }) => {
                let mut parts = vec![
                    format!("type: {}", quote("oauth")),
                    format!("issuer: {}", quote(issuer)),
                ];
                if let Some(audience) = audience {
                    parts.push(format!("audience: {}", quote(audience)));
                }
                if !scopes.is_empty() {
                    let scopes: Vec<String> = scopes.iter().map(|s| quote(s)).collect();
                    parts.push(format!("scopes: [{}]", scopes.join(", ")));
                }
                self.line("auth", &format!("{{ {} }}", parts.join("; ")))?;
            }
            None => {}
        }
        self.close_interface()
    }

    fn write_operation(&mut self, op: &OperationDescriptor) -> Result<()> {
        let name = self.interface_name(&op.name, "Tool");
        self.open_interface(&name, "Tool", op.description.as_deref())?;
        self.line("name", &quote(&op.name))?;
        if let Some(fields) = op.params.fields().filter(|f| !f.is_empty()) {
            self.write_object_field("params", fields)?;
        }
        if let Some(result) = &op.result {
            self.write_doc(None, &node_tags(result))?;
            self.write_indent();
            self.output.push_str("result: ");
            self.write_type(result)?;
            self.output.push_str(";\n");
        }
        let flags = op.flags;
        self.flag("readOnly", flags.read_only)?;
        self.flag("destructive", flags.destructive)?;
        self.flag("idempotent", flags.idempotent)?;
        self.flag("openWorld", flags.open_world)?;
        self.flag("requiresConfirmation", flags.requires_confirmation)?;
        self.close_interface()
    }

    fn write_prompt(&mut self, prompt: &PromptDescriptor) -> Result<()> {
        let name = self.interface_name(&prompt.name, "Prompt");
        self.open_interface(&name, "Prompt", prompt.description.as_deref())?;
        self.line("name", &quote(&prompt.name))?;
        if !prompt.arguments.is_empty() {
            let fields: IndexMap<String, ObjectField> = prompt
                .arguments
                .iter()
                .map(|arg| {
                    let mut field = ObjectField::new(arg.schema.clone(), arg.required);
                    field.description = arg.description.clone();
                    field.default = arg.default.clone();
                    field.deprecated = arg.deprecated;
                    (arg.name.clone(), field)
                })
                .collect();
            self.write_object_field("args", &fields)?;
        }
        match &prompt.content {
            PromptContent::Template(text) => self.line("template", &quote(text))?,
            PromptContent::Dynamic => self.line("dynamic", "true")?,
        }
        self.close_interface()
    }

    fn write_resource(&mut self, resource: &ResourceDescriptor) -> Result<()> {
        let name = self.interface_name(&resource.name, "Resource");
        self.open_interface(&name, "Resource", resource.description.as_deref())?;
        self.line("uri", &quote(&resource.uri))?;
        self.line("name", &quote(&resource.name))?;
        self.line("mimeType", &quote(&resource.mime_type))?;
        self.flag("subscribable", resource.subscribable)?;
        match &resource.content {
            ResourceContent::Static(value) => self.line("data", &literal_type(value))?,
            ResourceContent::Dynamic => self.line("dynamic", "true")?,
        }
        self.close_interface()
    }

    fn write_group(&mut self, group: &CapabilityGroupDescriptor) -> Result<()> {
        let name = self.interface_name(&group.name, "Group");
        self.open_interface(&name, "ToolGroup", group.description.as_deref())?;
        self.line("name", &quote(&group.name))?;
        let tools: Vec<String> = group.operations.iter().map(|op| quote(op)).collect();
        self.line("tools", &format!("[{}]", tools.join(", ")))?;
        self.close_interface()
    }

    fn write_object_field(&mut self, name: &str, fields: &IndexMap<String, ObjectField>) -> Result<()> {
        self.write_indent();
        write!(self.output, "{}: ", name)?;
        self.write_object(fields)?;
        self.output.push_str(";\n");
        Ok(())
    }

    fn write_object(&mut self, fields: &IndexMap<String, ObjectField>) -> Result<()> {
        if fields.is_empty() {
            self.output.push_str("{}");
            return Ok(());
        }
        self.output.push_str("{\n");
        self.indent += 1;
        for (name, field) in fields {
            self.write_field(name, field)?;
        }
        self.indent -= 1;
        self.write_indent();
        self.output.push('}');
        Ok(())
    }

    fn write_field(&mut self, name: &str, field: &ObjectField) -> Result<()> {
        let mut tags = node_tags(&field.schema);
        if let Some(default) = &field.default {
            tags.push(format!("@default {}", default));
        }
        if field.deprecated {
            tags.push("@deprecated".to_string());
        }
        self.write_doc(field.description.as_deref(), &tags)?;

        self.write_indent();
        let optional = if field.required { "" } else { "?" };
        write!(self.output, "{}{}: ", property(name), optional)?;
        self.write_type(&field.schema)?;
        self.output.push_str(";\n");
        Ok(())
    }

    fn write_type(&mut self, node: &SchemaNode) -> Result<()> {
        match node {
            SchemaNode::Leaf { kind, .. } => {
                let ty = match kind {
                    PrimitiveKind::String => "string",
                    PrimitiveKind::Number => "number",
                    PrimitiveKind::Integer => "Integer",
                    PrimitiveKind::Boolean => "boolean",
                    PrimitiveKind::Null => "null",
                    PrimitiveKind::Any => "unknown",
                };
                self.output.push_str(ty);
            }
            SchemaNode::Enum { values } if values.is_empty() => self.output.push_str("never"),
            SchemaNode::Enum { values } => {
                let values: Vec<String> = values.iter().map(|v| quote(v)).collect();
                self.output.push_str(&values.join(" | "));
            }
            SchemaNode::List { items, .. } => {
                self.output.push_str("Array<");
                self.write_type(items)?;
                self.output.push('>');
            }
            SchemaNode::Object { fields } => self.write_object(fields)?,
            SchemaNode::Unsupported { .. } => self.output.push_str("unknown"),
        }
        Ok(())
    }

    /// Stubs for every bound handler, so the emitted file binds the same way
    fn write_handlers(&mut self) -> Result<()> {
        let graph = self.graph;
        let handlers = graph
            .operations
            .iter()
            .filter_map(|op| op.handler.as_ref())
            .chain(graph.prompts.iter().filter_map(|p| p.handler.as_ref()))
            .chain(graph.resources.iter().filter_map(|r| r.handler.as_ref()));

        let mut seen = HashSet::new();
        let mut top_level = Vec::new();
        let mut members = Vec::new();
        for handler in handlers {
            if !seen.insert(handler.symbol.as_str()) {
                continue;
            }
            match handler.default_member_name() {
                Some(member) => members.push(member),
                None => top_level.push(handler.symbol.as_str()),
            }
        }

        if !top_level.is_empty() {
            writeln!(self.output)?;
        }
        for symbol in top_level {
            writeln!(self.output, "export declare function {}{}", symbol, HANDLER_SIGNATURE)?;
        }
        if !members.is_empty() {
            writeln!(self.output)?;
            writeln!(self.output, "declare class {} {{", HANDLER_CLASS)?;
            for member in members {
                writeln!(self.output, "  {}{}", property(member), HANDLER_SIGNATURE)?;
            }
            writeln!(self.output, "}}")?;
            writeln!(self.output, "export default {};", HANDLER_CLASS)?;
        }
        Ok(())
    }
}

/// Emit a declaration file for `graph`, importing markers from `marker_module`
pub fn emit(graph: &DescriptorGraph, marker_module: &str) -> Result<String> {
    DeclarationEmitter::new(graph, marker_module).emit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{HandlerRef, OperationFlags, ServiceDescriptor};
    use crate::{annotations, binder, scanner, translate};
    use crate::diagnostics::Diagnostics;
    use decl_parser::parse;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> (DescriptorGraph, Vec<String>) {
        let file = parse(source).unwrap();
        let mut diags = Diagnostics::new("emitted.ts");
        let scan = scanner::scan(&file, &mut diags);
        let notes = annotations::extract(&scan, &mut diags);
        let mut translation = translate::translate(&scan, &notes, &mut diags);
        binder::bind(&file, &mut translation.graph, &translation.index);
        let codes = diags.iter().map(|d| d.code.to_string()).collect();
        (translation.graph, codes)
    }

    #[test]
    fn test_names_and_literals() {
        assert_eq!(property("plain"), "plain");
        assert_eq!(property("x-api"), "\"x-api\"");
        assert_eq!(
            literal_type(&serde_json::json!({ "debug": false, "tags": ["a", 1] })),
            "{ debug: false; tags: [\"a\", 1] }"
        );
        assert!(doc_safe("just text"));
        assert!(!doc_safe("see\n@min"));
    }

    #[test]
    fn test_handler_stubs() {
        let graph = DescriptorGraph {
            service: Some(ServiceDescriptor {
                name: "svc".to_string(),
                version: "1".to_string(),
                description: None,
                auth: None,
            }),
            operations: vec![
                OperationDescriptor {
                    name: "add".to_string(),
                    description: None,
                    params: SchemaNode::empty_object(),
                    result: None,
                    flags: OperationFlags::default(),
                    handler: Some(HandlerRef::top_level("add")),
                },
                OperationDescriptor {
                    name: "sub".to_string(),
                    description: Some("Subtract */ safely".to_string()),
                    params: SchemaNode::empty_object(),
                    result: None,
                    flags: OperationFlags::default(),
                    handler: Some(HandlerRef::default_member("sub")),
                },
            ],
            ..Default::default()
        };
        let text = emit(&graph, DEFAULT_MARKER_MODULE).unwrap();
        assert!(text.contains("import type { Server, Tool } from \"@decl/markers\";"));
        assert!(text.contains("export declare function add(args?: unknown, context?: unknown): unknown;"));
        assert!(text.contains("declare class __handlers {\n  sub(args?: unknown, context?: unknown): unknown;\n}"));
        assert!(text.contains("description: \"Subtract */ safely\";"));

        let (reparsed, codes) = compile(&text);
        assert!(codes.is_empty(), "{:?}\n{}", codes, text);
        assert_eq!(reparsed, graph);
    }

    #[test]
    fn test_round_trip() {
        let source = r#"
/** Arithmetic over the wire */
interface Calculator extends Server {
  name: "calculator";
  version: "1.0.0";
  auth: { type: "oauth"; issuer: "https://id.example.com"; scopes: ["calc"] };
}

/** Add two numbers */
interface Add extends Tool {
  name: "add";
  params: {
    /** left operand
     * @min 0 */
    a: number;
    /** @max 10 */
    b?: Integer;
    mode: "fast" | "exact";
    /** @minLength 1 */
    tags: string[];
    nested: { /** @pattern ^[a-z]+$ */ code: string; when?: Date };
    /** @default "x"
     * @deprecated */
    legacy?: string;
  };
  /** @min 0 */
  result: number;
  readOnly: true;
  idempotent: true;
}

interface Greeting extends Prompt {
  name: "greeting";
  args: {
    who: string;
    /** @default "formal"
     * @deprecated */
    tone?: "formal" | "casual";
  };
  template: "Say hello to {{who}}";
}

interface Report extends Prompt {
  name: "report";
  dynamic: true;
}

interface Settings extends Resource {
  uri: "config://settings";
  name: "settings";
  data: { debug: false; level: 3; names: ["a", "b"] };
}

interface Files extends Resource {
  uri: "file:///{path}";
  name: "files";
  dynamic: true;
  subscribable: true;
}

interface MathTools extends ToolGroup { name: "math"; tools: ["add"] }

export function add(args: { a: number }) { return args.a; }
export default {
  report(args) { return ""; },
  files: (args, ctx) => null,
};
"#;
        let (graph, codes) = compile(source);
        assert!(codes.is_empty(), "{:?}", codes);

        let tone = &graph.prompts[0].arguments[1];
        assert_eq!(tone.default, Some(serde_json::json!("formal")));
        assert!(tone.deprecated);

        let text = emit(&graph, DEFAULT_MARKER_MODULE).unwrap();
        let (reparsed, codes) = compile(&text);
        assert!(codes.is_empty(), "{:?}\n{}", codes, text);
        assert_eq!(reparsed, graph);
    }
}

/// Integration tests for the full pipeline

use decl_compiler::{
    Code, CompileOptions, CompileOutput, Compiler, HandlerRef, PrimitiveKind, PromptContent,
    ResourceContent, SchemaNode,
};
use pretty_assertions::assert_eq;
use std::io::Write;

const ADD_EXAMPLE: &str = r#"
import type { Server, Tool } from "@decl/markers";

interface Calculator extends Server {
  name: "calculator";
  version: "1.0.0";
}

/** Add two numbers */
interface Add extends Tool {
  name: "add";
  params: { a: number; b: number };
  result: number;
}

export function add({ a, b }: { a: number; b: number }) {
  return a + b;
}
"#;

/// Write a source string to a temporary `.ts` file and compile it
fn compile_source(source: &str) -> CompileOutput {
    let mut file = tempfile::Builder::new()
        .suffix(".ts")
        .tempfile()
        .expect("temp file");
    file.write_all(source.as_bytes()).expect("write source");
    Compiler::new(CompileOptions::new(file.path()))
        .compile()
        .expect("compilation failed")
}

fn codes(output: &CompileOutput) -> Vec<&'static str> {
    output.diagnostics.iter().map(|d| d.code.as_str()).collect()
}

#[test]
fn test_add_example_is_clean() {
    let output = compile_source(ADD_EXAMPLE);
    assert_eq!(codes(&output), Vec::<&str>::new());

    let op = output.graph.operation("add").expect("add operation");
    assert_eq!(op.description.as_deref(), Some("Add two numbers"));
    assert_eq!(op.handler, Some(HandlerRef::top_level("add")));
    assert_eq!(op.result, Some(SchemaNode::leaf(PrimitiveKind::Number)));
    let fields = op.params.fields().expect("object params");
    assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(fields.values().all(|f| f.required));
}

#[test]
fn test_convention_ambiguity() {
    let source = format!(
        "{}\nexport function Add(args: unknown) {{ return 0; }}\n",
        ADD_EXAMPLE
    );
    let output = compile_source(&source);
    assert_eq!(codes(&output), vec!["E0402"]);
    assert!(output.diagnostics[0].message.contains("`add`"));
    assert!(output.diagnostics[0].message.contains("`Add`"));
    assert_eq!(output.graph.operation("add").and_then(|op| op.handler.clone()), None);
}

#[test]
fn test_compilation_is_deterministic() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "2" }
interface B extends Tool { name: "b"; params: { z: string; y?: number; x: "p" | "q" } }
interface A extends Tool { name: "a"; readOnly: true; destructive: true }
interface G extends ToolGroup { name: "g"; tools: ["a", "b", "c"] }
"#;
    let first = compile_source(source);
    let second = compile_source(source);
    assert_eq!(first.graph, second.graph);
    assert_eq!(
        first.diagnostics.iter().map(|d| (d.code, d.location.line, d.message.clone())).collect::<Vec<_>>(),
        second.diagnostics.iter().map(|d| (d.code, d.location.line, d.message.clone())).collect::<Vec<_>>()
    );
}

#[test]
fn test_required_overrides_both_ways() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Op extends Tool {
  name: "op";
  params: {
    /** @required */
    forced?: string;
    /** @required false */
    relaxed: string;
    plain?: string;
  };
}
export const op = (args: unknown) => args;
"#;
    let output = compile_source(source);
    assert_eq!(codes(&output), Vec::<&str>::new());
    let fields = output.graph.operations[0].params.fields().unwrap();
    assert!(fields["forced"].required);
    assert!(!fields["relaxed"].required);
    assert!(!fields["plain"].required);
}

#[test]
fn test_enum_order_is_preserved() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Op extends Tool { name: "op"; params: { level: "high" | "low" | "medium" } }
export function op(args: unknown) {}
"#;
    let output = compile_source(source);
    let fields = output.graph.operations[0].params.fields().unwrap();
    assert_eq!(
        fields["level"].schema,
        SchemaNode::Enum {
            values: vec!["high".into(), "low".into(), "medium".into()]
        }
    );
}

#[test]
fn test_pattern_on_number_is_rejected() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Op extends Tool {
  name: "op";
  params: {
    /** @pattern ^[0-9]+$ */
    count: number;
  };
}
export function op(args: unknown) {}
"#;
    let output = compile_source(source);
    assert_eq!(codes(&output), vec!["E0301"]);
    let fields = output.graph.operations[0].params.fields().unwrap();
    assert_eq!(fields["count"].schema, SchemaNode::leaf(PrimitiveKind::Number));
}

#[test]
fn test_read_only_and_destructive() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Purge extends Tool {
  name: "purge";
  readOnly: true;
  destructive: true;
}
export function purge() {}
"#;
    let output = compile_source(source);
    assert_eq!(codes(&output), vec!["E0601"]);
    assert!(output.diagnostics[0].message.contains("readOnly"));
    assert!(output.diagnostics[0].message.contains("destructive"));
    let op = output.graph.operation("purge").expect("descriptor kept");
    assert!(op.flags.read_only && op.flags.destructive);
}

#[test]
fn test_prompts_resources_and_groups() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Add extends Tool { name: "add"; params: { a: number } }
interface Greeting extends Prompt {
  name: "greeting";
  args: { who: string; tone?: "formal" | "casual" };
  template: "Say hello to {{who}}";
}
interface Digest extends Prompt { name: "digest"; dynamic: true }
interface Settings extends Resource {
  uri: "config://settings";
  name: "settings";
  data: { debug: false };
}
interface Users extends Resource { uri: "users://{id}"; name: "user"; dynamic: true }
interface Math extends ToolGroup { name: "math"; tools: ["add"] }
interface Admin extends ToolGroup { name: "admin"; tools: ["add"] }

export default {
  add(args: unknown) { return 0; },
  digest(args: unknown) { return ""; },
  user: (args: unknown, ctx: unknown) => null,
};
"#;
    let output = compile_source(source);
    assert_eq!(codes(&output), Vec::<&str>::new());
    let graph = &output.graph;

    assert_eq!(graph.operations[0].handler, Some(HandlerRef::default_member("add")));

    let greeting = graph.prompt("greeting").unwrap();
    assert_eq!(greeting.content, PromptContent::Template("Say hello to {{who}}".into()));
    assert_eq!(
        greeting.arguments.iter().map(|a| (a.name.as_str(), a.required)).collect::<Vec<_>>(),
        vec![("who", true), ("tone", false)]
    );
    assert_eq!(greeting.handler, None);
    assert_eq!(
        graph.prompt("digest").and_then(|p| p.handler.clone()),
        Some(HandlerRef::default_member("digest"))
    );

    let settings = graph.resource("settings").unwrap();
    assert_eq!(settings.mime_type, "application/json");
    assert_eq!(settings.content, ResourceContent::Static(serde_json::json!({ "debug": false })));
    let users = graph.resource("user").unwrap();
    assert!(users.is_template());
    assert_eq!(users.handler, Some(HandlerRef::default_member("user")));

    assert_eq!(graph.groups_of("add").map(|g| g.name.as_str()).collect::<Vec<_>>(), vec!["math", "admin"]);
}

#[test]
fn test_problems_do_not_stop_the_pipeline() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Loop extends Looped {}
interface Looped extends Loop {}
interface Greeting extends Prompt { name: "greeting"; template: "Hi {{name}}" }
interface Sub extends Tool { name: "sub" }
interface Math extends ToolGroup { name: "math"; tools: ["sub", "mul"] }
"#;
    let output = compile_source(source);
    let found = codes(&output);
    assert!(found.contains(&"E0105"), "{:?}", found);
    assert!(found.contains(&"E0701"), "{:?}", found);
    assert!(found.contains(&"E0401"), "{:?}", found);
    assert!(found.contains(&"E0501"), "{:?}", found);
    assert_eq!(output.graph.groups.len(), 1);
    assert!(output.has_errors());

    let lines: Vec<usize> = output.diagnostics.iter().map(|d| d.location.line).collect();
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
}

#[test]
fn test_emit_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("service.ts");
    let emitted = dir.path().join("emitted.ts");
    std::fs::write(&input, ADD_EXAMPLE).unwrap();

    let first = Compiler::new(CompileOptions::new(&input).emit(&emitted))
        .compile()
        .unwrap();
    let text = first.emitted.clone().expect("emitted text");
    assert_eq!(std::fs::read_to_string(&emitted).unwrap(), text);
    assert!(text.contains("interface AddTool extends Tool {"));

    let second = Compiler::new(CompileOptions::new(&emitted)).compile().unwrap();
    assert_eq!(codes(&second), Vec::<&str>::new());
    assert_eq!(second.graph, first.graph);
}

#[test]
fn test_nothing_emitted_on_errors() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("service.ts");
    let emitted = dir.path().join("emitted.ts");
    std::fs::write(&input, format!("{}\nfunction Add() {{}}\n", ADD_EXAMPLE)).unwrap();

    let output = Compiler::new(CompileOptions::new(&input).emit(&emitted))
        .compile()
        .unwrap();
    assert!(output.has_errors());
    assert_eq!(output.emitted, None);
    assert!(!emitted.exists());
    assert!(output.diagnostics.iter().any(|d| d.code == Code::AmbiguousImplementation));
}

#[test]
fn test_subscribable_resource_binds_handler() {
    let source = r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Feed extends Resource { uri: "feed://live"; name: "feed"; subscribable: true }
export function feed() { return []; }
"#;
    let output = compile_source(source);
    assert_eq!(codes(&output), Vec::<&str>::new());
    let feed = output.graph.resource("feed").expect("feed resource");
    assert!(feed.subscribable);
    assert_eq!(feed.content, ResourceContent::Dynamic);
    assert_eq!(feed.handler, Some(HandlerRef::top_level("feed")));

    let unbound = compile_source(
        r#"
interface Svc extends Server { name: "svc"; version: "1" }
interface Feed extends Resource { uri: "feed://live"; name: "feed"; subscribable: true }
"#,
    );
    assert_eq!(codes(&unbound), vec!["E0401"]);
}

// Lowering tests: shapes, types, bindings and doc comments

use crate::*;

fn only_shape(input: &str) -> ShapeDecl {
    let file = parse(input).expect("parse failed");
    assert!(file.syntax_errors.is_empty(), "syntax errors: {:?}", file.syntax_errors);
    file.shapes().next().cloned().expect("Expected a shape")
}

fn object_fields(ty: &TypeExpr) -> &[Field] {
    match &ty.kind {
        TypeKind::Object(object) => &object.fields,
        other => panic!("Expected object type, got {:?}", other),
    }
}

#[test]
fn test_optional_and_readonly_markers() {
    let shape = only_shape("interface P { readonly a: string; b?: number; c: boolean }");
    let fields = object_fields(&shape.ty);

    assert_eq!(fields.len(), 3);
    assert!(fields[0].readonly);
    assert!(!fields[0].optional);
    assert!(fields[1].optional);
    assert!(!fields[2].optional);
    assert_eq!(
        fields[2].ty.as_ref().map(|t| &t.kind),
        Some(&TypeKind::Keyword("boolean".to_string()))
    );
}

#[test]
fn test_union_is_flattened_in_source_order() {
    let shape = only_shape(r#"type Mode = "fast" | "slow" | "auto";"#);
    assert_eq!(shape.form, ShapeForm::TypeAlias);

    match &shape.ty.kind {
        TypeKind::Union(members) => {
            let values: Vec<_> = members.iter().filter_map(|m| m.as_string_literal()).collect();
            assert_eq!(values, vec!["fast", "slow", "auto"]);
        }
        other => panic!("Expected union, got {:?}", other),
    }
}

#[test]
fn test_intersection_alias() {
    let shape = only_shape(r#"type Add = Tool & { name: "add" };"#);
    match &shape.ty.kind {
        TypeKind::Intersection(members) => {
            assert_eq!(members.len(), 2);
            assert_eq!(members[0].reference_name(), Some("Tool"));
            assert_eq!(object_fields(&members[1])[0].name, "name");
        }
        other => panic!("Expected intersection, got {:?}", other),
    }
}

#[test]
fn test_array_and_generic_types() {
    let shape = only_shape("interface P { tags: string[]; ids: Array<number>; m: mcp.Tool }");
    let fields = object_fields(&shape.ty);

    match &fields[0].ty.as_ref().unwrap().kind {
        TypeKind::Array(elem) => assert_eq!(elem.kind, TypeKind::Keyword("string".to_string())),
        other => panic!("Expected array, got {:?}", other),
    }
    match &fields[1].ty.as_ref().unwrap().kind {
        TypeKind::Reference { name, args } => {
            assert_eq!(name, "Array");
            assert_eq!(args.len(), 1);
        }
        other => panic!("Expected generic reference, got {:?}", other),
    }
    assert_eq!(fields[2].ty.as_ref().unwrap().reference_name(), Some("Tool"));
}

#[test]
fn test_literal_types() {
    let shape = only_shape(r#"interface L { s: "x"; n: -1.5; t: true; z: null; tup: ["a", "b"] }"#);
    let fields = object_fields(&shape.ty);
    let kinds: Vec<_> = fields.iter().map(|f| f.ty.as_ref().unwrap().kind.clone()).collect();

    assert_eq!(kinds[0], TypeKind::Literal(Literal::String("x".to_string())));
    assert_eq!(kinds[1], TypeKind::Literal(Literal::Number("-1.5".to_string())));
    assert_eq!(kinds[2], TypeKind::Literal(Literal::Bool(true)));
    assert_eq!(kinds[3], TypeKind::Literal(Literal::Null));
    match &kinds[4] {
        TypeKind::Tuple(members) => assert_eq!(members.len(), 2),
        other => panic!("Expected tuple, got {:?}", other),
    }
}

#[test]
fn test_doc_comments_attach_to_declaration_and_fields() {
    let input = r#"
/** Adds numbers */
export interface Add extends Tool {
  name: "add";
  params: {
    /**
     * Left operand
     * @min 0
     */
    a: number;
    // not a doc comment
    b: number;
  };
}
"#;
    let shape = only_shape(input);
    assert!(shape.exported);
    assert_eq!(shape.doc.as_ref().map(|d| d.text.as_str()), Some("/** Adds numbers */"));

    let fields = object_fields(&shape.ty);
    let params = object_fields(fields[1].ty.as_ref().unwrap());
    let a_doc = params[0].doc.as_ref().expect("a has a doc comment");
    assert!(a_doc.text.contains("@min 0"));
    assert!(params[1].doc.is_none());
}

#[test]
fn test_skipped_members_are_recorded() {
    let shape = only_shape("interface P { [key: string]: number; ok: string }");
    match &shape.ty.kind {
        TypeKind::Object(object) => {
            assert_eq!(object.fields.len(), 1);
            assert_eq!(object.skipped.len(), 1);
            assert_eq!(object.skipped[0].syntax, "index signature");
        }
        other => panic!("Expected object, got {:?}", other),
    }
}

#[test]
fn test_variable_bindings() {
    let input = r#"
const add = (a: number, b: number) => a + b;
const twice = x => x * 2;
let total = 5;
const alias = add;
const made = makeHandler();
"#;
    let file = parse(input).unwrap();
    let bindings: Vec<_> = file.bindings().collect();

    assert_eq!(bindings.len(), 5);
    assert_eq!(bindings[0].value, Value::Function(Arity { required: 2, optional: 0, rest: false }));
    assert_eq!(bindings[1].value, Value::Function(Arity { required: 1, optional: 0, rest: false }));
    assert_eq!(bindings[2].value, Value::Literal);
    assert_eq!(bindings[3].value, Value::Alias("add".to_string()));
    assert_eq!(bindings[4].value, Value::Opaque);
}

#[test]
fn test_rest_and_default_parameters() {
    let file = parse("function f(a, b = 1, ...rest) {}").unwrap();
    let binding = file.bindings().next().unwrap();
    assert_eq!(binding.value, Value::Function(Arity { required: 1, optional: 1, rest: true }));
}

#[test]
fn test_class_members() {
    let input = r#"
export class Handlers {
  constructor(private db: Db) {}
  add(args) { return 1; }
  private helper() {}
  sub = (args, ctx) => 2;
}
"#;
    let file = parse(input).unwrap();
    let binding = file.bindings().next().unwrap();
    match &binding.value {
        Value::Class(members) => {
            let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, vec!["add", "sub"]);
            assert_eq!(
                members[1].value,
                Value::Function(Arity { required: 2, optional: 0, rest: false })
            );
        }
        other => panic!("Expected class, got {:?}", other),
    }
}

#[test]
fn test_default_export_forms() {
    let file = parse("export default { add, sub: subtract, mul(a, b) { return a * b; } };").unwrap();
    let export = file.default_export().expect("default export");
    match &export.value {
        Value::Object(members) => {
            assert_eq!(members[0].value, Value::Alias("add".to_string()));
            assert_eq!(members[1].name, "sub");
            assert_eq!(members[1].value, Value::Alias("subtract".to_string()));
            assert!(matches!(members[2].value, Value::Function(_)));
        }
        other => panic!("Expected object, got {:?}", other),
    }

    let file = parse("export default class Calc { add(a) {} }").unwrap();
    assert!(file.bindings().any(|b| b.name == "Calc"));
    assert_eq!(
        file.default_export().map(|e| &e.value),
        Some(&Value::Alias("Calc".to_string()))
    );

    let file = parse("const handlers = {};\nexport default handlers;").unwrap();
    assert_eq!(
        file.default_export().map(|e| &e.value),
        Some(&Value::Alias("handlers".to_string()))
    );
}

#[test]
fn test_imports_and_ambient_declarations() {
    let input = r#"
import type { Tool } from "@decl/markers";
import { add as plus, type Ctx } from "./impl";
import * as ops from "./ops";
export declare function search(args: unknown): string;
declare const lookup: (a: string, b: string) => string;
"#;
    let file = parse(input).unwrap();
    let bindings: Vec<_> = file.bindings().collect();
    let names: Vec<_> = bindings.iter().map(|b| b.name.as_str()).collect();

    assert_eq!(names, vec!["plus", "ops", "search", "lookup"]);
    assert_eq!(bindings[0].value, Value::Import { source: "./impl".to_string() });
    assert!(bindings[2].exported);
    assert_eq!(bindings[2].value, Value::Function(Arity { required: 1, optional: 0, rest: false }));
    assert_eq!(bindings[3].value, Value::Function(Arity { required: 2, optional: 0, rest: false }));
}

#[test]
fn test_spans_are_one_based() {
    let file = parse("\n\ninterface A { x: string }").unwrap();
    let shape = file.shapes().next().unwrap();
    assert_eq!(shape.span.line, 3);
    assert_eq!(shape.span.column, 1);
    assert_eq!(shape.name_span.column, 11);
}

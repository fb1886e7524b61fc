/// Lowering from the tree-sitter concrete tree to the declaration AST
///
/// Walks the top level of a TypeScript syntax tree and keeps only shape
/// declarations, value bindings and the default export. Doc comments are
/// attached here: a `/** */` block immediately preceding a statement or a
/// property signature belongs to it.

use tree_sitter::{Node, Tree};

use crate::ast::*;

/// Lower a parsed tree into a [`SourceFile`]
pub(crate) fn lower(tree: &Tree, source: &str) -> SourceFile {
    let mut lowerer = Lowerer {
        src: source,
        items: Vec::new(),
        errors: Vec::new(),
    };
    let root = tree.root_node();
    lowerer.collect_syntax_errors(root);

    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        lowerer.lower_statement(node, node, false);
    }

    SourceFile {
        items: lowerer.items,
        syntax_errors: lowerer.errors,
    }
}

pub(crate) fn span_of(node: Node) -> Span {
    let start = node.start_position();
    Span {
        start: node.start_byte(),
        end: node.end_byte(),
        line: start.row + 1,
        column: start.column + 1,
    }
}

struct Lowerer<'src> {
    src: &'src str,
    items: Vec<Item>,
    errors: Vec<SyntaxError>,
}

impl<'src> Lowerer<'src> {
    fn text(&self, node: Node) -> &'src str {
        node.utf8_text(self.src.as_bytes()).unwrap_or("")
    }

    fn field_text(&self, node: Node, field: &str) -> Option<&'src str> {
        node.child_by_field_name(field).map(|n| self.text(n))
    }

    fn collect_syntax_errors(&mut self, node: Node) {
        if node.is_missing() {
            self.errors.push(SyntaxError {
                message: format!("missing `{}`", node.kind()),
                span: span_of(node),
            });
            return;
        }
        if node.is_error() {
            let snippet: String = self.text(node).chars().take(24).collect();
            self.errors.push(SyntaxError {
                message: format!("unexpected `{}`", snippet.trim()),
                span: span_of(node),
            });
            return;
        }
        if !node.has_error() {
            return;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_syntax_errors(child);
        }
    }

    /// `anchor` is the node doc comments are looked up from; it differs from
    /// `node` when the declaration is wrapped in an export statement.
    fn lower_statement(&mut self, node: Node, anchor: Node, exported: bool) {
        match node.kind() {
            "interface_declaration" => {
                if let Some(shape) = self.lower_interface(node, anchor, exported) {
                    self.items.push(Item::Shape(shape));
                }
            }
            "type_alias_declaration" => {
                if let Some(shape) = self.lower_type_alias(node, anchor, exported) {
                    self.items.push(Item::Shape(shape));
                }
            }
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                if let Some(name) = self.field_text(node, "name") {
                    let arity = self.arity_of(node.child_by_field_name("parameters"));
                    self.push_binding(name, Value::Function(arity), exported, node);
                }
            }
            "class_declaration" | "abstract_class_declaration" => {
                if let Some(name) = self.field_text(node, "name") {
                    let members = self.class_members(node.child_by_field_name("body"));
                    self.push_binding(name, Value::Class(members), exported, node);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut cursor = node.walk();
                for declarator in node.named_children(&mut cursor) {
                    if declarator.kind() == "variable_declarator" {
                        self.lower_declarator(declarator, exported);
                    }
                }
            }
            "ambient_declaration" => {
                let mut cursor = node.walk();
                for inner in node.named_children(&mut cursor) {
                    self.lower_statement(inner, anchor, exported);
                }
            }
            "export_statement" => self.lower_export(node),
            "import_statement" => self.lower_import(node),
            _ => {}
        }
    }

    fn push_binding(&mut self, name: &str, value: Value, exported: bool, node: Node) {
        self.items.push(Item::Binding(Binding {
            name: name.to_string(),
            value,
            exported,
            span: span_of(node),
        }));
    }

    fn lower_export(&mut self, node: Node) {
        let is_default = has_token(node, "default");

        if let Some(decl) = node.child_by_field_name("declaration") {
            self.lower_statement(decl, node, true);
            if is_default {
                // `export default function add() {}` binds `add` and exports it
                let value = match self.field_text(decl, "name") {
                    Some(name) => Value::Alias(name.to_string()),
                    None => self.lower_value(decl),
                };
                self.items.push(Item::DefaultExport(DefaultExport {
                    value,
                    span: span_of(node),
                }));
            }
            return;
        }

        if is_default {
            if let Some(value) = node.child_by_field_name("value") {
                // A named class or function expression still binds its name
                let value = match self.field_text(value, "name") {
                    Some(name) if matches!(value.kind(), "class" | "function_expression" | "function") => {
                        let lowered = self.lower_value(value);
                        self.push_binding(name, lowered, true, value);
                        Value::Alias(name.to_string())
                    }
                    _ => self.lower_value(value),
                };
                self.items.push(Item::DefaultExport(DefaultExport {
                    value,
                    span: span_of(node),
                }));
            }
        }
    }

    fn lower_import(&mut self, node: Node) {
        // `import type { ... }` brings no values into scope
        if has_token(node, "type") {
            return;
        }
        let source = node
            .child_by_field_name("source")
            .map(|s| unquote(self.text(s)))
            .unwrap_or_default();

        let mut cursor = node.walk();
        for clause in node.named_children(&mut cursor) {
            if clause.kind() != "import_clause" {
                continue;
            }
            let mut clause_cursor = clause.walk();
            for part in clause.named_children(&mut clause_cursor) {
                match part.kind() {
                    "identifier" => {
                        let value = Value::Import { source: source.clone() };
                        self.push_binding(self.text(part), value, false, part);
                    }
                    "namespace_import" => {
                        if let Some(ident) = first_named_child_of_kind(part, "identifier") {
                            let value = Value::Import { source: source.clone() };
                            self.push_binding(self.text(ident), value, false, part);
                        }
                    }
                    "named_imports" => {
                        let mut spec_cursor = part.walk();
                        for spec in part.named_children(&mut spec_cursor) {
                            if spec.kind() != "import_specifier" || has_token(spec, "type") {
                                continue;
                            }
                            let local = self
                                .field_text(spec, "alias")
                                .or_else(|| self.field_text(spec, "name"));
                            if let Some(local) = local {
                                let value = Value::Import { source: source.clone() };
                                self.push_binding(local, value, false, spec);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn lower_declarator(&mut self, node: Node, exported: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        // Destructuring declarations bind nothing addressable by name
        if name_node.kind() != "identifier" {
            return;
        }
        let value = match node.child_by_field_name("value") {
            Some(value) => self.lower_value(value),
            None => match node.child_by_field_name("type") {
                Some(annotation) => self.value_from_annotation(annotation),
                None => Value::Opaque,
            },
        };
        self.push_binding(self.text(name_node), value, exported, node);
    }

    /// `declare const add: (a: number) => number;`
    fn value_from_annotation(&self, annotation: Node) -> Value {
        match first_named_child(annotation) {
            Some(ty) if ty.kind() == "function_type" => {
                Value::Function(self.arity_of(ty.child_by_field_name("parameters")))
            }
            _ => Value::Opaque,
        }
    }

    fn lower_value(&self, node: Node) -> Value {
        match node.kind() {
            "arrow_function" => {
                if let Some(params) = node.child_by_field_name("parameters") {
                    Value::Function(self.arity_of(Some(params)))
                } else {
                    // `x => ...`
                    Value::Function(Arity {
                        required: 1,
                        optional: 0,
                        rest: false,
                    })
                }
            }
            "function_expression" | "function" | "generator_function" | "function_declaration"
            | "generator_function_declaration" => {
                Value::Function(self.arity_of(node.child_by_field_name("parameters")))
            }
            "class" | "class_declaration" | "abstract_class_declaration" => {
                Value::Class(self.class_members(node.child_by_field_name("body")))
            }
            "object" => Value::Object(self.object_members(node)),
            "identifier" => Value::Alias(self.text(node).to_string()),
            "parenthesized_expression" | "as_expression" | "satisfies_expression"
            | "non_null_expression" | "type_assertion" => match first_named_child(node) {
                Some(inner) => self.lower_value(inner),
                None => Value::Opaque,
            },
            "string" | "number" | "template_string" | "true" | "false" | "null" | "undefined"
            | "array" | "regex" => Value::Literal,
            _ => Value::Opaque,
        }
    }

    fn arity_of(&self, params: Option<Node>) -> Arity {
        let mut arity = Arity::default();
        let Some(params) = params else {
            return arity;
        };
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            match param.kind() {
                "required_parameter" => {
                    let pattern = param.child_by_field_name("pattern");
                    match pattern.map(|p| p.kind()) {
                        Some("rest_pattern") => arity.rest = true,
                        Some("this") => {}
                        _ if param.child_by_field_name("value").is_some() => arity.optional += 1,
                        _ => arity.required += 1,
                    }
                }
                "optional_parameter" | "assignment_pattern" => arity.optional += 1,
                "rest_pattern" => arity.rest = true,
                "identifier" | "object_pattern" | "array_pattern" => arity.required += 1,
                _ => {}
            }
        }
        arity
    }

    fn class_members(&self, body: Option<Node>) -> Vec<Member> {
        let mut members = Vec::new();
        let Some(body) = body else {
            return members;
        };
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if has_private_modifier(member, self.src) {
                continue;
            }
            let Some(name_node) = member.child_by_field_name("name") else {
                continue;
            };
            let name = self.property_name(name_node);
            let value = match member.kind() {
                "method_definition" | "method_signature" | "abstract_method_signature" => {
                    if name == "constructor" {
                        continue;
                    }
                    Value::Function(self.arity_of(member.child_by_field_name("parameters")))
                }
                "public_field_definition" => match member.child_by_field_name("value") {
                    Some(value) => self.lower_value(value),
                    None => match member.child_by_field_name("type") {
                        Some(annotation) => self.value_from_annotation(annotation),
                        None => Value::Opaque,
                    },
                },
                _ => continue,
            };
            members.push(Member {
                name,
                value,
                span: span_of(member),
            });
        }
        members
    }

    fn object_members(&self, object: Node) -> Vec<Member> {
        let mut members = Vec::new();
        let mut cursor = object.walk();
        for member in object.named_children(&mut cursor) {
            match member.kind() {
                "pair" => {
                    let Some(key) = member.child_by_field_name("key") else {
                        continue;
                    };
                    if key.kind() == "computed_property_name" {
                        continue;
                    }
                    let value = member
                        .child_by_field_name("value")
                        .map(|v| self.lower_value(v))
                        .unwrap_or(Value::Opaque);
                    members.push(Member {
                        name: self.property_name(key),
                        value,
                        span: span_of(member),
                    });
                }
                "shorthand_property_identifier" => {
                    let name = self.text(member).to_string();
                    members.push(Member {
                        value: Value::Alias(name.clone()),
                        name,
                        span: span_of(member),
                    });
                }
                "method_definition" => {
                    if let Some(name_node) = member.child_by_field_name("name") {
                        members.push(Member {
                            name: self.property_name(name_node),
                            value: Value::Function(
                                self.arity_of(member.child_by_field_name("parameters")),
                            ),
                            span: span_of(member),
                        });
                    }
                }
                _ => {}
            }
        }
        members
    }

    fn property_name(&self, node: Node) -> String {
        match node.kind() {
            "string" => unquote(self.text(node)),
            _ => self.text(node).to_string(),
        }
    }

    fn lower_interface(&self, node: Node, anchor: Node, exported: bool) -> Option<ShapeDecl> {
        let name_node = node.child_by_field_name("name")?;

        let mut heritage = Vec::new();
        if let Some(clause) = first_named_child_of_kind(node, "extends_type_clause") {
            let mut cursor = clause.walk();
            for base in clause.named_children(&mut cursor) {
                heritage.push(self.lower_type(base));
            }
        }

        let ty = match node.child_by_field_name("body") {
            Some(body) => self.lower_type(body),
            None => TypeExpr {
                kind: TypeKind::Object(ObjectType::default()),
                span: span_of(node),
            },
        };

        Some(ShapeDecl {
            name: self.text(name_node).to_string(),
            form: ShapeForm::Interface,
            heritage,
            ty,
            doc: self.doc_comment(anchor),
            exported,
            span: span_of(node),
            name_span: span_of(name_node),
        })
    }

    fn lower_type_alias(&self, node: Node, anchor: Node, exported: bool) -> Option<ShapeDecl> {
        let name_node = node.child_by_field_name("name")?;
        let value = node.child_by_field_name("value")?;
        Some(ShapeDecl {
            name: self.text(name_node).to_string(),
            form: ShapeForm::TypeAlias,
            heritage: Vec::new(),
            ty: self.lower_type(value),
            doc: self.doc_comment(anchor),
            exported,
            span: span_of(node),
            name_span: span_of(name_node),
        })
    }

    fn lower_type(&self, node: Node) -> TypeExpr {
        let span = span_of(node);
        let kind = match node.kind() {
            "type_annotation" | "parenthesized_type" | "readonly_type" | "optional_type" => {
                return match first_named_child(node) {
                    Some(inner) => self.lower_type(inner),
                    None => TypeExpr {
                        kind: TypeKind::Other(node.kind().to_string()),
                        span,
                    },
                };
            }
            "predefined_type" => TypeKind::Keyword(self.text(node).to_string()),
            "type_identifier" | "nested_type_identifier" | "identifier" => TypeKind::Reference {
                name: self.text(node).to_string(),
                args: Vec::new(),
            },
            "generic_type" => {
                let name = self.field_text(node, "name").unwrap_or_default().to_string();
                let mut args = Vec::new();
                if let Some(type_args) = node.child_by_field_name("type_arguments") {
                    let mut cursor = type_args.walk();
                    for arg in type_args.named_children(&mut cursor) {
                        args.push(self.lower_type(arg));
                    }
                }
                TypeKind::Reference { name, args }
            }
            "literal_type" => match first_named_child(node) {
                Some(inner) => self.literal_kind(inner),
                None => TypeKind::Other("literal_type".to_string()),
            },
            "string" | "number" | "true" | "false" | "null" | "undefined" | "unary_expression" => {
                self.literal_kind(node)
            }
            "array_type" => match first_named_child(node) {
                Some(element) => TypeKind::Array(Box::new(self.lower_type(element))),
                None => TypeKind::Other("array_type".to_string()),
            },
            "tuple_type" => {
                let mut members = Vec::new();
                let mut cursor = node.walk();
                for member in node.named_children(&mut cursor) {
                    if member.kind() != "comment" {
                        members.push(self.lower_type(member));
                    }
                }
                TypeKind::Tuple(members)
            }
            "object_type" | "interface_body" => TypeKind::Object(self.lower_object(node)),
            "union_type" => {
                let mut members = Vec::new();
                self.flatten(node, "union_type", &mut members);
                TypeKind::Union(members)
            }
            "intersection_type" => {
                let mut members = Vec::new();
                self.flatten(node, "intersection_type", &mut members);
                TypeKind::Intersection(members)
            }
            "function_type" | "constructor_type" => TypeKind::Function,
            other => TypeKind::Other(other.to_string()),
        };
        TypeExpr { kind, span }
    }

    fn flatten(&self, node: Node, kind: &str, out: &mut Vec<TypeExpr>) {
        let mut cursor = node.walk();
        for member in node.named_children(&mut cursor) {
            if member.kind() == kind {
                self.flatten(member, kind, out);
            } else if member.kind() != "comment" {
                out.push(self.lower_type(member));
            }
        }
    }

    fn literal_kind(&self, node: Node) -> TypeKind {
        let literal = match node.kind() {
            "string" => Literal::String(unquote(self.text(node))),
            "number" => Literal::Number(self.text(node).to_string()),
            "unary_expression" => {
                let text: String = self.text(node).split_whitespace().collect();
                Literal::Number(text)
            }
            "true" => Literal::Bool(true),
            "false" => Literal::Bool(false),
            "null" => Literal::Null,
            "undefined" => Literal::Undefined,
            other => return TypeKind::Other(other.to_string()),
        };
        TypeKind::Literal(literal)
    }

    fn lower_object(&self, node: Node) -> ObjectType {
        let mut object = ObjectType::default();
        let mut cursor = node.walk();
        for member in node.named_children(&mut cursor) {
            match member.kind() {
                "property_signature" | "method_signature" => {
                    let Some(name_node) = member.child_by_field_name("name") else {
                        continue;
                    };
                    if matches!(name_node.kind(), "computed_property_name") {
                        object.skipped.push(SkippedMember {
                            syntax: "computed property".to_string(),
                            span: span_of(member),
                        });
                        continue;
                    }
                    let ty = if member.kind() == "method_signature" {
                        Some(TypeExpr {
                            kind: TypeKind::Function,
                            span: span_of(member),
                        })
                    } else {
                        member.child_by_field_name("type").map(|t| self.lower_type(t))
                    };
                    object.fields.push(Field {
                        name: self.property_name(name_node),
                        optional: has_token(member, "?"),
                        readonly: has_token(member, "readonly"),
                        ty,
                        doc: self.doc_comment(member),
                        span: span_of(member),
                    });
                }
                "comment" => {}
                other => object.skipped.push(SkippedMember {
                    syntax: other.replace('_', " "),
                    span: span_of(member),
                }),
            }
        }
        object
    }

    /// Nearest `/** */` comment among the comments directly preceding `node`
    fn doc_comment(&self, node: Node) -> Option<DocComment> {
        let mut prev = node.prev_sibling();
        while let Some(sibling) = prev {
            match sibling.kind() {
                "comment" => {
                    let text = self.text(sibling);
                    if text.starts_with("/**") {
                        return Some(DocComment {
                            text: text.to_string(),
                            span: span_of(sibling),
                        });
                    }
                }
                // separators between object members
                ";" | "," => {}
                _ => return None,
            }
            prev = sibling.prev_sibling();
        }
        None
    }
}

fn has_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == token);
    found
}

fn has_private_modifier(node: Node, src: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).any(|child| {
        child.kind() == "accessibility_modifier"
            && child.utf8_text(src.as_bytes()).map(|t| t != "public").unwrap_or(false)
    });
    found
}

fn first_named_child(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() != "comment");
    found
}

fn first_named_child_of_kind<'tree>(node: Node<'tree>, kind: &str) -> Option<Node<'tree>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

/// Strip quotes from a string literal and resolve its escapes
pub fn unquote(raw: &str) -> String {
    let inner = match raw.chars().next() {
        Some(q @ ('"' | '\'' | '`')) if raw.len() >= 2 && raw.ends_with(q) => &raw[1..raw.len() - 1],
        _ => raw,
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""add""#), "add");
        assert_eq!(unquote("'it\\'s'"), "it's");
        assert_eq!(unquote(r#""a\nb""#), "a\nb");
        assert_eq!(unquote("\"\\u0041\""), "A");
        assert_eq!(unquote("bare"), "bare");
    }
}

/// AST dumping utilities for testing and debugging
///
/// Provides human-readable tree representations of lowered source files.

use crate::ast::*;
use std::fmt::Write as FmtWrite;

/// Dump a lowered file as a pretty-printed tree
pub fn dump_file(file: &SourceFile) -> String {
    let mut out = String::new();
    write_file(&mut out, file, 0).unwrap();
    out
}

fn write_file(out: &mut String, file: &SourceFile, indent: usize) -> std::fmt::Result {
    writeln!(out, "{}SourceFile:", "  ".repeat(indent))?;
    for item in &file.items {
        write_item(out, item, indent + 1)?;
    }
    for error in &file.syntax_errors {
        writeln!(
            out,
            "{}SyntaxError @{}:{}: {}",
            "  ".repeat(indent + 1),
            error.span.line,
            error.span.column,
            error.message
        )?;
    }
    Ok(())
}

fn write_item(out: &mut String, item: &Item, indent: usize) -> std::fmt::Result {
    let prefix = "  ".repeat(indent);
    match item {
        Item::Shape(shape) => {
            let export_prefix = if shape.exported { "export " } else { "" };
            let form = match shape.form {
                ShapeForm::Interface => "Interface",
                ShapeForm::TypeAlias => "TypeAlias",
            };
            writeln!(out, "{}{}{}: {}", prefix, export_prefix, form, shape.name)?;
            if let Some(doc) = &shape.doc {
                writeln!(out, "{}  Doc: {:?}", prefix, doc.text)?;
            }
            if !shape.heritage.is_empty() {
                writeln!(out, "{}  Extends:", prefix)?;
                for base in &shape.heritage {
                    write_type(out, base, indent + 2)?;
                }
            }
            write_type(out, &shape.ty, indent + 1)?;
        }
        Item::Binding(binding) => {
            let export_prefix = if binding.exported { "export " } else { "" };
            writeln!(out, "{}{}Binding: {}", prefix, export_prefix, binding.name)?;
            write_value(out, &binding.value, indent + 1)?;
        }
        Item::DefaultExport(export) => {
            writeln!(out, "{}DefaultExport:", prefix)?;
            write_value(out, &export.value, indent + 1)?;
        }
    }
    Ok(())
}

fn write_value(out: &mut String, value: &Value, indent: usize) -> std::fmt::Result {
    let prefix = "  ".repeat(indent);
    match value {
        Value::Function(arity) => {
            let rest = if arity.rest { " +rest" } else { "" };
            writeln!(
                out,
                "{}Function({} required, {} optional{})",
                prefix, arity.required, arity.optional, rest
            )?;
        }
        Value::Class(members) | Value::Object(members) => {
            let label = if matches!(value, Value::Class(_)) { "Class" } else { "Object" };
            writeln!(out, "{}{}:", prefix, label)?;
            for member in members {
                writeln!(out, "{}  {}:", prefix, member.name)?;
                write_value(out, &member.value, indent + 2)?;
            }
        }
        Value::Alias(name) => writeln!(out, "{}Alias: {}", prefix, name)?,
        Value::Import { source } => writeln!(out, "{}Import from {:?}", prefix, source)?,
        Value::Literal => writeln!(out, "{}Literal", prefix)?,
        Value::Opaque => writeln!(out, "{}Opaque", prefix)?,
    }
    Ok(())
}

fn write_type(out: &mut String, ty: &TypeExpr, indent: usize) -> std::fmt::Result {
    let prefix = "  ".repeat(indent);
    match &ty.kind {
        TypeKind::Keyword(name) => {
            writeln!(out, "{}Keyword: {}", prefix, name)?;
        }
        TypeKind::Literal(lit) => {
            writeln!(out, "{}Literal: {:?}", prefix, lit)?;
        }
        TypeKind::Reference { name, args } => {
            writeln!(out, "{}Ref: {}", prefix, name)?;
            for arg in args {
                write_type(out, arg, indent + 1)?;
            }
        }
        TypeKind::Array(elem) => {
            writeln!(out, "{}ArrayType:", prefix)?;
            write_type(out, elem, indent + 1)?;
        }
        TypeKind::Tuple(members) => {
            writeln!(out, "{}Tuple:", prefix)?;
            for member in members {
                write_type(out, member, indent + 1)?;
            }
        }
        TypeKind::Object(object) => {
            writeln!(out, "{}ObjectType:", prefix)?;
            for field in &object.fields {
                let marker = if field.optional { "?" } else { "" };
                writeln!(out, "{}  {}{}:", prefix, field.name, marker)?;
                if let Some(doc) = &field.doc {
                    writeln!(out, "{}    Doc: {:?}", prefix, doc.text)?;
                }
                match &field.ty {
                    Some(field_ty) => write_type(out, field_ty, indent + 2)?,
                    None => writeln!(out, "{}    (untyped)", prefix)?,
                }
            }
            for skipped in &object.skipped {
                writeln!(out, "{}  (skipped {})", prefix, skipped.syntax)?;
            }
        }
        TypeKind::Union(members) => {
            writeln!(out, "{}Union:", prefix)?;
            for member in members {
                write_type(out, member, indent + 1)?;
            }
        }
        TypeKind::Intersection(members) => {
            writeln!(out, "{}Intersection:", prefix)?;
            for member in members {
                write_type(out, member, indent + 1)?;
            }
        }
        TypeKind::Function => {
            writeln!(out, "{}FunctionType", prefix)?;
        }
        TypeKind::Other(kind) => {
            writeln!(out, "{}Other: {}", prefix, kind)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    #[test]
    fn test_dump_interface() {
        let input = "interface Add extends Tool { name: \"add\"; params: { a?: number } }";
        let file = parse(input).unwrap();
        let dump = dump_file(&file);

        assert!(dump.contains("SourceFile:"));
        assert!(dump.contains("Interface: Add"));
        assert!(dump.contains("Ref: Tool"));
        assert!(dump.contains("a?:"));
        assert!(dump.contains("Keyword: number"));
    }

    #[test]
    fn test_dump_bindings() {
        let input = "export default { add(a, b) { return a + b; }, sub };";
        let file = parse(input).unwrap();
        let dump = dump_file(&file);

        assert!(dump.contains("DefaultExport:"));
        assert!(dump.contains("Function(2 required, 0 optional)"));
        assert!(dump.contains("Alias: sub"));
    }
}

/// Declaration scanner
///
/// Classifies every top-level shape by structural fingerprint: the marker
/// bases it reaches through its heritage, plus the fields it carries after
/// merging ancestors. Produces raw declarations for the later stages and a
/// shape table the translator uses to expand parameter shape references.

use crate::diagnostics::{Code, Diagnostics};
use decl_parser::{Field, ShapeDecl, ShapeForm, SkippedMember, SourceFile, TypeExpr, TypeKind};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Category a shape is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeclarationKind {
    Service,
    Operation,
    Prompt,
    Resource,
    CapabilityGroup,
    ParameterShape,
}

/// Categories in rule-table order
const CATEGORIES: [DeclarationKind; 5] = [
    DeclarationKind::Service,
    DeclarationKind::Operation,
    DeclarationKind::Prompt,
    DeclarationKind::Resource,
    DeclarationKind::CapabilityGroup,
];

impl DeclarationKind {
    /// Marker base names that place a shape in this category
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            DeclarationKind::Service => &["Server", "Service"],
            DeclarationKind::Operation => &["Tool", "Operation"],
            DeclarationKind::Prompt => &["Prompt"],
            DeclarationKind::Resource => &["Resource"],
            DeclarationKind::CapabilityGroup => &["ToolGroup", "CapabilityGroup"],
            DeclarationKind::ParameterShape => &[],
        }
    }

    /// Fields the category gives meaning to
    pub fn recognized_fields(&self) -> &'static [&'static str] {
        match self {
            DeclarationKind::Service => &["name", "version", "description", "auth"],
            DeclarationKind::Operation => &[
                "name",
                "description",
                "params",
                "result",
                "readOnly",
                "destructive",
                "idempotent",
                "openWorld",
                "requiresConfirmation",
            ],
            DeclarationKind::Prompt => &["name", "description", "args", "template", "dynamic"],
            DeclarationKind::Resource => &[
                "uri",
                "name",
                "description",
                "mimeType",
                "data",
                "dynamic",
                "subscribable",
            ],
            DeclarationKind::CapabilityGroup => &["name", "description", "tools"],
            DeclarationKind::ParameterShape => &[],
        }
    }

    /// Field that identifies a concrete declaration of this category
    pub fn identifying_field(&self) -> Option<&'static str> {
        match self {
            DeclarationKind::Resource => Some("uri"),
            DeclarationKind::ParameterShape => None,
            _ => Some("name"),
        }
    }

    pub fn from_marker(name: &str) -> Option<Self> {
        CATEGORIES
            .into_iter()
            .find(|kind| kind.markers().contains(&name))
    }

    /// Whether `fields` carries the key fields of this category, with
    /// identifying fields pinned to string literals
    fn structurally_matches(&self, fields: &[MergedField<'_>]) -> bool {
        let has = |name: &str| fields.iter().any(|f| f.field.name == name);
        let pinned = |name: &str| {
            fields
                .iter()
                .find(|f| f.field.name == name)
                .and_then(|f| f.ty())
                .and_then(TypeExpr::as_string_literal)
                .is_some()
        };
        match self {
            DeclarationKind::Service => pinned("name") && pinned("version"),
            DeclarationKind::Operation => pinned("name") && (has("params") || has("result")),
            DeclarationKind::Prompt => pinned("name") && (has("template") || has("args")),
            DeclarationKind::Resource => pinned("uri"),
            DeclarationKind::CapabilityGroup => pinned("name") && has("tools"),
            DeclarationKind::ParameterShape => false,
        }
    }

    /// Number of this category's fields the shape pins to a literal type
    fn specificity(&self, fields: &[MergedField<'_>]) -> usize {
        let recognized = self.recognized_fields();
        fields
            .iter()
            .filter(|f| recognized.contains(&f.field.name.as_str()))
            .filter(|f| matches!(f.ty().map(|t| &t.kind), Some(TypeKind::Literal(_))))
            .count()
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeclarationKind::Service => "service",
            DeclarationKind::Operation => "operation",
            DeclarationKind::Prompt => "prompt",
            DeclarationKind::Resource => "resource",
            DeclarationKind::CapabilityGroup => "capability group",
            DeclarationKind::ParameterShape => "parameter shape",
        };
        f.write_str(name)
    }
}

/// A field after heritage merging, with the shape that declared it
#[derive(Debug, Clone, Copy)]
pub struct MergedField<'a> {
    pub field: &'a Field,
    pub owner: &'a str,
}

impl<'a> MergedField<'a> {
    pub fn ty(&self) -> Option<&'a TypeExpr> {
        self.field.ty.as_ref()
    }
}

/// A shape with its heritage resolved
#[derive(Debug, Clone)]
pub struct ShapeInfo<'a> {
    pub decl: &'a ShapeDecl,
    /// Markers reached through heritage, in discovery order
    pub markers: Vec<DeclarationKind>,
    pub fields: Vec<MergedField<'a>>,
    pub skipped: Vec<&'a SkippedMember>,
    /// Interfaces, object aliases and intersections of shapes; other aliases
    /// (`type Mode = "a" | "b"`) translate from their aliased type instead
    pub object_like: bool,
    pub kind: DeclarationKind,
}

impl<'a> ShapeInfo<'a> {
    pub fn name(&self) -> &'a str {
        &self.decl.name
    }

    pub fn field(&self, name: &str) -> Option<&MergedField<'a>> {
        self.fields.iter().find(|f| f.field.name == name)
    }
}

/// Every declared shape by name, first declaration wins
#[derive(Debug, Default)]
pub struct ShapeTable<'a> {
    shapes: Vec<ShapeInfo<'a>>,
    by_name: HashMap<&'a str, usize>,
}

impl<'a> ShapeTable<'a> {
    pub fn get(&self, name: &str) -> Option<&ShapeInfo<'a>> {
        self.by_name.get(name).map(|&i| &self.shapes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShapeInfo<'a>> {
        self.shapes.iter()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// A shape classified into a descriptor category
#[derive(Debug, Clone, Copy)]
pub struct Declaration<'a> {
    pub kind: DeclarationKind,
    pub shape: &'a ShapeDecl,
}

#[derive(Debug, Default)]
pub struct ScanOutput<'a> {
    /// Descriptor declarations in source order
    pub declarations: Vec<Declaration<'a>>,
    pub shapes: ShapeTable<'a>,
}

impl<'a> ScanOutput<'a> {
    pub fn of_kind(&self, kind: DeclarationKind) -> impl Iterator<Item = &Declaration<'a>> {
        self.declarations.iter().filter(move |d| d.kind == kind)
    }
}

/// Where a shape's own structure comes from
struct Structure<'a> {
    bases: Vec<&'a TypeExpr>,
    fields: Vec<&'a Field>,
    skipped: Vec<&'a SkippedMember>,
    object_like: bool,
}

fn structure_of<'a>(decl: &'a ShapeDecl, diags: &mut Diagnostics) -> Structure<'a> {
    let mut structure = Structure {
        bases: decl.heritage.iter().collect(),
        fields: Vec::new(),
        skipped: Vec::new(),
        object_like: decl.form == ShapeForm::Interface,
    };
    match &decl.ty.kind {
        TypeKind::Object(object) => {
            structure.fields.extend(object.fields.iter());
            structure.skipped.extend(object.skipped.iter());
            structure.object_like = true;
        }
        TypeKind::Intersection(members) if decl.form == ShapeForm::TypeAlias => {
            structure.object_like = true;
            for member in members {
                match &member.kind {
                    TypeKind::Reference { .. } => structure.bases.push(member),
                    TypeKind::Object(object) => {
                        structure.fields.extend(object.fields.iter());
                        structure.skipped.extend(object.skipped.iter());
                    }
                    _ => diags.report(
                        Code::UnsupportedConstruct,
                        member.span,
                        format!(
                            "only shape references and object types are merged in `{}`; this member is ignored",
                            decl.name
                        ),
                    ),
                }
            }
        }
        // `type Search = ReadOnlyTool` is a plain alias of another shape
        TypeKind::Reference { args, .. }
            if decl.form == ShapeForm::TypeAlias && args.is_empty() =>
        {
            let name = decl.ty.reference_name().unwrap_or_default();
            if DeclarationKind::from_marker(name).is_some() {
                structure.bases.push(&decl.ty);
                structure.object_like = true;
            }
        }
        _ => {}
    }
    structure
}

#[derive(Debug, Clone, Default)]
struct Resolved<'a> {
    markers: Vec<DeclarationKind>,
    fields: Vec<MergedField<'a>>,
}

fn merge_into<'a>(target: &mut Vec<MergedField<'a>>, incoming: &[MergedField<'a>]) {
    for field in incoming {
        match target.iter_mut().find(|f| f.field.name == field.field.name) {
            Some(existing) => *existing = *field,
            None => target.push(*field),
        }
    }
}

struct Scanner<'a, 'd> {
    decls: Vec<&'a ShapeDecl>,
    structures: Vec<Structure<'a>>,
    index: HashMap<&'a str, usize>,
    resolved: HashMap<usize, Resolved<'a>>,
    visiting: HashSet<usize>,
    used_as_base: HashSet<usize>,
    diags: &'d mut Diagnostics,
}

impl<'a, 'd> Scanner<'a, 'd> {
    fn resolve(&mut self, idx: usize) -> Resolved<'a> {
        if let Some(done) = self.resolved.get(&idx) {
            return done.clone();
        }
        self.visiting.insert(idx);

        let decl = self.decls[idx];
        let mut resolved = Resolved::default();
        let bases = self.structures[idx].bases.clone();

        for base in bases {
            let Some(base_name) = base.reference_name() else {
                self.diags.report(
                    Code::UnknownBase,
                    base.span,
                    format!("`{}` extends something that is not a named shape", decl.name),
                );
                continue;
            };

            // Local declarations shadow marker names
            if let Some(&base_idx) = self.index.get(base_name) {
                if self.visiting.contains(&base_idx) {
                    self.diags.report(
                        Code::CyclicHeritage,
                        base.span,
                        format!("cyclic heritage: `{}` extends `{}`, which leads back to it", decl.name, base_name),
                    );
                    continue;
                }
                self.used_as_base.insert(base_idx);
                let inherited = self.resolve(base_idx);
                for marker in inherited.markers {
                    if !resolved.markers.contains(&marker) {
                        resolved.markers.push(marker);
                    }
                }
                merge_into(&mut resolved.fields, &inherited.fields);
            } else if let Some(marker) = DeclarationKind::from_marker(base_name) {
                if !resolved.markers.contains(&marker) {
                    resolved.markers.push(marker);
                }
            } else {
                self.diags.report(
                    Code::UnknownBase,
                    base.span,
                    format!("`{}` extends unknown shape `{}`", decl.name, base_name),
                );
            }
        }

        let own: Vec<MergedField<'a>> = self.structures[idx]
            .fields
            .iter()
            .map(|&field| MergedField {
                field,
                owner: &decl.name,
            })
            .collect();
        merge_into(&mut resolved.fields, &own);

        self.visiting.remove(&idx);
        self.resolved.insert(idx, resolved.clone());
        resolved
    }

    fn classify(&mut self, idx: usize, resolved: &Resolved<'a>) -> Option<DeclarationKind> {
        let decl = self.decls[idx];
        let candidates: Vec<DeclarationKind> = if !resolved.markers.is_empty() {
            resolved.markers.clone()
        } else if self.structures[idx].object_like {
            CATEGORIES
                .into_iter()
                .filter(|kind| kind.structurally_matches(&resolved.fields))
                .collect()
        } else {
            Vec::new()
        };

        let best = candidates
            .iter()
            .map(|kind| kind.specificity(&resolved.fields))
            .max();
        let Some(best) = best else {
            return Some(DeclarationKind::ParameterShape);
        };
        let winners: Vec<DeclarationKind> = candidates
            .into_iter()
            .filter(|kind| kind.specificity(&resolved.fields) == best)
            .collect();

        if winners.len() > 1 {
            let names: Vec<String> = winners.iter().map(|k| k.to_string()).collect();
            self.diags.report(
                Code::AmbiguousCategory,
                decl.name_span,
                format!(
                    "ambiguous declaration category for `{}`: matches {} equally well",
                    decl.name,
                    names.join(" and ")
                ),
            );
            return None;
        }
        winners.first().copied()
    }
}

/// Scan a lowered file and classify its shapes
pub fn scan<'a>(file: &'a SourceFile, diags: &mut Diagnostics) -> ScanOutput<'a> {
    let mut decls = Vec::new();
    let mut index = HashMap::new();
    for shape in file.shapes() {
        if index.contains_key(shape.name.as_str()) {
            diags.report(
                Code::DuplicateName,
                shape.name_span,
                format!("shape `{}` is declared more than once", shape.name),
            );
            continue;
        }
        index.insert(shape.name.as_str(), decls.len());
        decls.push(shape);
    }

    let structures: Vec<Structure<'a>> = decls.iter().map(|&decl| structure_of(decl, diags)).collect();
    let mut scanner = Scanner {
        decls,
        structures,
        index,
        resolved: HashMap::new(),
        visiting: HashSet::new(),
        used_as_base: HashSet::new(),
        diags,
    };

    let all_resolved: Vec<Resolved<'a>> = (0..scanner.decls.len())
        .map(|idx| scanner.resolve(idx))
        .collect();

    let mut output = ScanOutput::default();
    let mut classified = Vec::with_capacity(all_resolved.len());
    for (idx, resolved) in all_resolved.iter().enumerate() {
        classified.push(scanner.classify(idx, resolved));
    }

    for (idx, (resolved, kind)) in all_resolved.into_iter().zip(classified).enumerate() {
        let decl = scanner.decls[idx];
        let structure = &scanner.structures[idx];
        let kind = kind.unwrap_or(DeclarationKind::ParameterShape);

        let abstract_base = scanner.used_as_base.contains(&idx)
            && kind
                .identifying_field()
                .map(|name| {
                    !resolved
                        .fields
                        .iter()
                        .any(|f| f.field.name == name && f.ty().and_then(TypeExpr::as_string_literal).is_some())
                })
                .unwrap_or(false);

        tracing::trace!(shape = %decl.name, %kind, abstract_base, "classified shape");

        if kind != DeclarationKind::ParameterShape && !abstract_base {
            output.declarations.push(Declaration { kind, shape: decl });
        }

        output.shapes.by_name.insert(decl.name.as_str(), output.shapes.shapes.len());
        output.shapes.shapes.push(ShapeInfo {
            decl,
            markers: resolved.markers,
            fields: resolved.fields,
            skipped: structure.skipped.clone(),
            object_like: structure.object_like,
            kind,
        });
    }

    tracing::debug!(
        shapes = output.shapes.len(),
        declarations = output.declarations.len(),
        "scan complete"
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use decl_parser::parse;

    fn kinds(source: &str) -> (Vec<(String, DeclarationKind)>, Vec<String>) {
        let file = parse(source).unwrap();
        let mut diags = Diagnostics::new("test.ts");
        let output = scan(&file, &mut diags);
        let decls = output
            .declarations
            .iter()
            .map(|d| (d.shape.name.clone(), d.kind))
            .collect();
        let codes = diags.iter().map(|d| d.code.to_string()).collect();
        (decls, codes)
    }

    #[test]
    fn test_marker_extension() {
        let (decls, codes) = kinds(
            r#"
interface Calc extends Server { name: "calc"; version: "1.0.0" }
interface Add extends Tool { name: "add"; params: { a: number } }
type Hello = Prompt & { name: "hello"; template: "hi" };
interface Point { x: number; y: number }
"#,
        );
        assert!(codes.is_empty(), "{:?}", codes);
        assert_eq!(
            decls,
            vec![
                ("Calc".to_string(), DeclarationKind::Service),
                ("Add".to_string(), DeclarationKind::Operation),
                ("Hello".to_string(), DeclarationKind::Prompt),
            ]
        );
    }

    #[test]
    fn test_transitive_heritage_and_abstract_base() {
        let (decls, codes) = kinds(
            r#"
interface ReadOnlyTool extends Tool { readOnly: true }
interface Search extends ReadOnlyTool { name: "search"; params: { q: string } }
"#,
        );
        assert!(codes.is_empty(), "{:?}", codes);
        assert_eq!(decls, vec![("Search".to_string(), DeclarationKind::Operation)]);
    }

    #[test]
    fn test_merged_fields_override_in_place() {
        let file = parse(
            r#"
interface Base extends Tool { name: "base"; readOnly: true }
interface Derived extends Base { name: "derived" }
"#,
        )
        .unwrap();
        let mut diags = Diagnostics::new("test.ts");
        let output = scan(&file, &mut diags);
        let derived = output.shapes.get("Derived").unwrap();
        let names: Vec<_> = derived.fields.iter().map(|f| (f.field.name.as_str(), f.owner)).collect();
        assert_eq!(names, vec![("name", "Derived"), ("readOnly", "Base")]);
    }

    #[test]
    fn test_structural_match_without_marker() {
        let (decls, _) = kinds(
            r#"
interface Settings { uri: "config://settings"; name: "settings"; data: { a: 1 } }
interface Loose { name: string; params: { a: number } }
"#,
        );
        assert_eq!(decls, vec![("Settings".to_string(), DeclarationKind::Resource)]);
    }

    #[test]
    fn test_most_pinned_literals_win() {
        let (decls, codes) = kinds(r#"interface Odd { name: "x"; params: {}; template: "t" }"#);
        assert!(codes.is_empty(), "{:?}", codes);
        assert_eq!(decls, vec![("Odd".to_string(), DeclarationKind::Prompt)]);
    }

    #[test]
    fn test_equal_pins_are_ambiguous() {
        let (decls, codes) = kinds(r#"interface Odd { name: "x"; params: {}; args: {} }"#);
        assert!(decls.is_empty());
        assert_eq!(codes, vec!["E0101"]);

        let (decls, codes) = kinds(r#"interface Both extends Tool, Prompt { name: "both"; params: {} }"#);
        assert!(decls.is_empty());
        assert_eq!(codes, vec!["E0101"]);
    }

    #[test]
    fn test_most_specific_marker_wins() {
        let (decls, codes) = kinds(
            r#"interface Both extends Tool, Prompt { name: "both"; params: {}; readOnly: true }"#,
        );
        assert!(codes.is_empty(), "{:?}", codes);
        assert_eq!(decls, vec![("Both".to_string(), DeclarationKind::Operation)]);
    }

    #[test]
    fn test_inherited_override_changes_pin_count() {
        let (decls, codes) = kinds(
            r#"
interface Base extends Tool, Prompt { name: "base"; template: "t" }
interface Derived extends Base { name: "derived"; template: string; readOnly: true }
"#,
        );
        assert!(codes.is_empty(), "{:?}", codes);
        assert_eq!(
            decls,
            vec![
                ("Base".to_string(), DeclarationKind::Prompt),
                ("Derived".to_string(), DeclarationKind::Operation),
            ]
        );
    }

    #[test]
    fn test_cycles_and_unknown_bases() {
        let (_, codes) = kinds(
            r#"
interface A extends B { x: string }
interface B extends A { y: string }
interface C extends Mystery { z: string }
"#,
        );
        assert_eq!(codes, vec!["E0105", "E0104"]);
    }

    #[test]
    fn test_local_shape_shadows_marker() {
        let (decls, _) = kinds(
            r#"
interface Tool { label: string }
interface Hammer extends Tool { label: "hammer" }
"#,
        );
        assert!(decls.is_empty());
    }

    #[test]
    fn test_duplicate_shape_names() {
        let (_, codes) = kinds("interface P { a: string }\ninterface P { b: string }");
        assert_eq!(codes, vec!["E0201"]);
    }
}

/// Declaration-level syntax tree for decl source files
///
/// Only the constructs the compiler interprets are represented: shape
/// declarations (interfaces and type aliases), value bindings, and the
/// default export. Every other statement in the file is dropped while
/// lowering the tree-sitter tree.

/// Byte range plus 1-based line/column of its start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

/// A lowered source file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceFile {
    pub items: Vec<Item>,
    /// ERROR and MISSING nodes reported by the front end
    pub syntax_errors: Vec<SyntaxError>,
}

impl SourceFile {
    /// Iterate over shape declarations in source order
    pub fn shapes(&self) -> impl Iterator<Item = &ShapeDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Shape(shape) => Some(shape),
            _ => None,
        })
    }

    /// Iterate over top-level value bindings in source order
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.items.iter().filter_map(|item| match item {
            Item::Binding(binding) => Some(binding),
            _ => None,
        })
    }

    /// The first `export default` in the file, if any
    pub fn default_export(&self) -> Option<&DefaultExport> {
        self.items.iter().find_map(|item| match item {
            Item::DefaultExport(export) => Some(export),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

/// Top-level item
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Shape(ShapeDecl),
    Binding(Binding),
    DefaultExport(DefaultExport),
}

/// How a shape was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeForm {
    /// `interface Name extends A, B { ... }`
    Interface,
    /// `type Name = ...`
    TypeAlias,
}

/// An `interface` or `type` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDecl {
    pub name: String,
    pub form: ShapeForm,
    /// Types listed in an interface `extends` clause (empty for aliases)
    pub heritage: Vec<TypeExpr>,
    /// Interface body, or the aliased type
    pub ty: TypeExpr,
    pub doc: Option<DocComment>,
    pub exported: bool,
    pub span: Span,
    pub name_span: Span,
}

/// Raw `/** ... */` comment text attached to a declaration or field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocComment {
    pub text: String,
    pub span: Span,
}

/// A type expression with its source span
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Predefined keyword type: `string`, `number`, `boolean`, `any`, ...
    Keyword(String),
    /// Literal type: `"add"`, `42`, `true`, `null`, `undefined`
    Literal(Literal),
    /// Named reference, possibly qualified (`mcp.Tool`) or generic (`Array<T>`)
    Reference { name: String, args: Vec<TypeExpr> },
    /// `T[]`
    Array(Box<TypeExpr>),
    /// `[A, B]`
    Tuple(Vec<TypeExpr>),
    /// `{ a: A; b?: B }`
    Object(ObjectType),
    /// `A | B | C`, flattened
    Union(Vec<TypeExpr>),
    /// `A & B & C`, flattened
    Intersection(Vec<TypeExpr>),
    /// Function or constructor type
    Function,
    /// Any other type syntax, named by its grammar node kind
    Other(String),
}

impl TypeExpr {
    /// Last segment of a reference name (`mcp.Tool` -> `Tool`)
    pub fn reference_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Reference { name, .. } => Some(name.rsplit('.').next().unwrap_or(name)),
            _ => None,
        }
    }

    pub fn as_string_literal(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Literal(Literal::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool_literal(&self) -> Option<bool> {
        match &self.kind {
            TypeKind::Literal(Literal::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    /// Numeric literal text as written, sign included
    Number(String),
    Bool(bool),
    Null,
    Undefined,
}

/// Members of an object type or interface body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectType {
    pub fields: Vec<Field>,
    /// Index, call and construct signatures, and computed keys
    pub skipped: Vec<SkippedMember>,
}

/// A property (or method) signature
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    /// Declared with the `?` optional marker
    pub optional: bool,
    pub readonly: bool,
    /// `None` when written without a type annotation
    pub ty: Option<TypeExpr>,
    pub doc: Option<DocComment>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedMember {
    pub syntax: String,
    pub span: Span,
}

/// A top-level value binding: function, class, variable or import
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: Value,
    pub exported: bool,
    pub span: Span,
}

/// What a binding (or aggregate member) evaluates to, as far as can be
/// told without running the file
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Function(Arity),
    Class(Vec<Member>),
    Object(Vec<Member>),
    /// Another identifier: `const add = sum`, `{ add }`
    Alias(String),
    Import { source: String },
    /// Strings, numbers, arrays and other plainly non-callable values
    Literal,
    /// Calls, member accesses and anything else not statically known
    Opaque,
}

/// Parameter counts of a callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arity {
    pub required: usize,
    pub optional: usize,
    pub rest: bool,
}

/// A member of a class body or object literal
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub value: Value,
    pub span: Span,
}

/// `export default <value>`
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultExport {
    pub value: Value,
    pub span: Span,
}

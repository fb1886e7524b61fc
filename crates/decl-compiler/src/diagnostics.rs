/// Compiler diagnostics
///
/// Every stage reports problems into a [`Diagnostics`] accumulator that is
/// threaded through the pipeline. Nothing is thrown: the pipeline always
/// finishes and hands the caller the partial graph plus everything found.

use decl_parser::Span;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Broad class of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Syntax,
    Structural,
    NamingConflict,
    Constraint,
    Binding,
    GroupReference,
    Template,
    Unsupported,
    Lint,
}

/// Stable diagnostic codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    SyntaxError,

    AmbiguousCategory,
    MissingField,
    NonLiteralField,
    UnknownBase,
    CyclicHeritage,
    DuplicateService,
    InvalidUri,
    ConflictingContent,
    InvalidAuth,
    InvalidFieldType,

    DuplicateName,

    IncompatibleConstraint,
    ContradictoryBounds,
    MalformedTagValue,
    InvalidPattern,
    EnumMismatch,
    DefaultViolation,
    ConflictingFlags,

    MissingImplementation,
    AmbiguousImplementation,
    NotCallable,
    ArityMismatch,

    UnknownGroupMember,
    DuplicateGroupMember,

    UndeclaredPlaceholder,
    UnusedArgument,

    UnsupportedConstruct,
    UnknownTag,
    UnknownField,
    UnknownFormat,
    MissingService,
    DefaultOnRequired,
    IgnoredParameters,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::SyntaxError => "E0001",
            Code::AmbiguousCategory => "E0101",
            Code::MissingField => "E0102",
            Code::NonLiteralField => "E0103",
            Code::UnknownBase => "E0104",
            Code::CyclicHeritage => "E0105",
            Code::DuplicateService => "E0106",
            Code::InvalidUri => "E0108",
            Code::ConflictingContent => "E0109",
            Code::InvalidAuth => "E0110",
            Code::InvalidFieldType => "E0111",
            Code::DuplicateName => "E0201",
            Code::IncompatibleConstraint => "E0301",
            Code::ContradictoryBounds => "E0302",
            Code::MalformedTagValue => "E0303",
            Code::InvalidPattern => "E0304",
            Code::EnumMismatch => "E0305",
            Code::DefaultViolation => "E0306",
            Code::ConflictingFlags => "E0601",
            Code::MissingImplementation => "E0401",
            Code::AmbiguousImplementation => "E0402",
            Code::NotCallable => "E0403",
            Code::ArityMismatch => "E0404",
            Code::UnknownGroupMember => "E0501",
            Code::DuplicateGroupMember => "W0502",
            Code::UndeclaredPlaceholder => "E0701",
            Code::UnusedArgument => "W0702",
            Code::UnsupportedConstruct => "W0801",
            Code::UnknownTag => "W0802",
            Code::UnknownField => "W0803",
            Code::UnknownFormat => "W0804",
            Code::MissingService => "W0805",
            Code::DefaultOnRequired => "W0806",
            Code::IgnoredParameters => "W0807",
        }
    }

    pub fn severity(&self) -> Severity {
        if self.as_str().starts_with('W') {
            Severity::Warning
        } else {
            Severity::Error
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Code::SyntaxError => Category::Syntax,
            Code::AmbiguousCategory
            | Code::MissingField
            | Code::NonLiteralField
            | Code::UnknownBase
            | Code::CyclicHeritage
            | Code::DuplicateService
            | Code::InvalidUri
            | Code::ConflictingContent
            | Code::InvalidAuth
            | Code::InvalidFieldType => Category::Structural,
            Code::DuplicateName => Category::NamingConflict,
            Code::IncompatibleConstraint
            | Code::ContradictoryBounds
            | Code::MalformedTagValue
            | Code::InvalidPattern
            | Code::EnumMismatch
            | Code::DefaultViolation
            | Code::ConflictingFlags => Category::Constraint,
            Code::MissingImplementation
            | Code::AmbiguousImplementation
            | Code::NotCallable
            | Code::ArityMismatch
            | Code::IgnoredParameters => Category::Binding,
            Code::UnknownGroupMember | Code::DuplicateGroupMember => Category::GroupReference,
            Code::UndeclaredPlaceholder | Code::UnusedArgument => Category::Template,
            Code::UnsupportedConstruct => Category::Unsupported,
            Code::UnknownTag
            | Code::UnknownField
            | Code::UnknownFormat
            | Code::MissingService
            | Code::DefaultOnRequired => Category::Lint,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Code {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Where a diagnostic points
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub start: usize,
    pub end: usize,
}

impl Location {
    pub fn new(file: &Path, span: Span) -> Self {
        Self {
            file: file.to_path_buf(),
            line: span.line,
            column: span.column,
            start: span.start,
            end: span.end,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Code,
    pub message: String,
    pub location: Location,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}[{}]: {}",
            self.location, self.severity, self.code, self.message
        )
    }
}

/// Error and warning counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Summary {
    pub errors: usize,
    pub warnings: usize,
}

impl Summary {
    pub fn of(diagnostics: &[Diagnostic]) -> Self {
        let errors = diagnostics.iter().filter(|d| d.is_error()).count();
        Self {
            errors,
            warnings: diagnostics.len() - errors,
        }
    }
}

/// Accumulator threaded through every pipeline stage
#[derive(Debug, Clone)]
pub struct Diagnostics {
    file: PathBuf,
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            items: Vec::new(),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn location(&self, span: Span) -> Location {
        Location::new(&self.file, span)
    }

    /// Record a diagnostic; severity follows from the code
    pub fn report(&mut self, code: Code, span: Span, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: code.severity(),
            code,
            message: message.into(),
            location: self.location(span),
        });
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::trace!(code = %diagnostic.code, line = diagnostic.location.line, "{}", diagnostic.message);
        self.items.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Order by source position. The sort is stable, so diagnostics at the
    /// same position keep the order in which stages reported them.
    pub fn into_sorted(mut self) -> Vec<Diagnostic> {
        self.items
            .sort_by_key(|d| (d.location.line, d.location.column));
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(line: usize, column: usize) -> Span {
        Span {
            start: 0,
            end: 1,
            line,
            column,
        }
    }

    #[test]
    fn test_severity_follows_code() {
        assert_eq!(Code::MissingImplementation.severity(), Severity::Error);
        assert_eq!(Code::UnknownTag.severity(), Severity::Warning);
        assert_eq!(Code::ConflictingFlags.category(), Category::Constraint);
    }

    #[test]
    fn test_sorted_is_stable_by_position() {
        let mut diags = Diagnostics::new("svc.ts");
        diags.report(Code::UnknownTag, span(4, 2), "second stage, later line");
        diags.report(Code::DuplicateName, span(2, 1), "first");
        diags.report(Code::UnknownField, span(2, 1), "same position, reported later");

        let sorted = diags.into_sorted();
        let messages: Vec<_> = sorted.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["first", "same position, reported later", "second stage, later line"]
        );
    }

    #[test]
    fn test_display_format() {
        let mut diags = Diagnostics::new("svc.ts");
        diags.report(Code::MissingField, span(3, 5), "operation `Add` has no `name`");
        let rendered = diags.iter().next().unwrap().to_string();
        assert_eq!(rendered, "svc.ts:3:5: error[E0102]: operation `Add` has no `name`");
        assert_eq!(Summary::of(&diags.into_sorted()), Summary { errors: 1, warnings: 0 });
    }
}

/// Compiler driver that orchestrates the pipeline
///
/// `Load → Scan → Extract → Translate → Bind → Validate → [Emit]`, strictly
/// forward. Problems in the analyzed file end up in the diagnostics of the
/// output; only host failures (I/O, grammar loading) return `Err`.

use crate::annotations;
use crate::binder::{self, BindingOutcome};
use crate::descriptors::DescriptorGraph;
use crate::diagnostics::{Code, Diagnostic, Diagnostics, Summary};
use crate::emit::{self, DEFAULT_MARKER_MODULE};
use crate::error::{CompileError, Result};
use crate::scanner;
use crate::translate;
use crate::validate::{self, ValidationInput};
use decl_parser::SourceFile;
use std::fmt;
use std::path::{Path, PathBuf};

/// Pipeline states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Loaded,
    Scanned,
    Extracted,
    Translated,
    Bound,
    Validated,
    Emitted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loaded => "loaded",
            Stage::Scanned => "scanned",
            Stage::Extracted => "extracted",
            Stage::Translated => "translated",
            Stage::Bound => "bound",
            Stage::Validated => "validated",
            Stage::Emitted => "emitted",
        };
        f.write_str(name)
    }
}

/// Result of analyzing one source text
#[derive(Debug)]
pub struct Analysis {
    pub ast: SourceFile,
    pub graph: DescriptorGraph,
    pub bindings: Vec<BindingOutcome>,
    /// Ordered by source position
    pub diagnostics: Vec<Diagnostic>,
    pub summary: Summary,
}

impl Analysis {
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }
}

/// Run every analysis stage over `source`. `path` only labels diagnostics.
pub fn analyze(source: &str, path: impl AsRef<Path>) -> Result<Analysis> {
    let path = path.as_ref();
    let ast = decl_parser::parse(source).map_err(|e| CompileError::front_end(path, e))?;
    let mut diags = Diagnostics::new(path);
    for error in &ast.syntax_errors {
        diags.report(Code::SyntaxError, error.span, error.message.clone());
    }
    tracing::debug!(stage = %Stage::Loaded, items = ast.items.len(), syntax_errors = ast.syntax_errors.len());

    let scan = scanner::scan(&ast, &mut diags);
    tracing::debug!(stage = %Stage::Scanned, declarations = scan.declarations.len());

    let notes = annotations::extract(&scan, &mut diags);
    tracing::debug!(stage = %Stage::Extracted, annotations = notes.len());

    let mut translation = translate::translate(&scan, &notes, &mut diags);
    tracing::debug!(stage = %Stage::Translated, findings = translation.findings.len());

    let bindings = binder::bind(&ast, &mut translation.graph, &translation.index);
    tracing::debug!(stage = %Stage::Bound, outcomes = bindings.len());

    validate::validate(
        &ValidationInput {
            graph: &translation.graph,
            index: &translation.index,
            findings: &translation.findings,
            bindings: &bindings,
        },
        &mut diags,
    );
    let diagnostics = diags.into_sorted();
    let summary = Summary::of(&diagnostics);
    tracing::debug!(
        stage = %Stage::Validated,
        errors = summary.errors,
        warnings = summary.warnings
    );

    Ok(Analysis {
        ast,
        graph: translation.graph,
        bindings,
        diagnostics,
        summary,
    })
}

/// Compilation output structure
#[derive(Debug)]
pub struct CompileOutput {
    /// Source file that was compiled
    pub source_file: PathBuf,
    pub ast: SourceFile,
    pub graph: DescriptorGraph,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: Summary,
    /// Emitted declaration text, when emitting was requested and the file
    /// had no errors
    pub emitted: Option<String>,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }
}

/// Options for compilation
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Input source file
    pub input: PathBuf,
    /// Where to write the emitted declaration file
    pub emit: Option<PathBuf>,
    /// Module the emitted file imports its markers from
    pub marker_module: String,
    pub verbose: bool,
}

impl CompileOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            emit: None,
            marker_module: DEFAULT_MARKER_MODULE.to_string(),
            verbose: false,
        }
    }

    pub fn emit(mut self, path: impl Into<PathBuf>) -> Self {
        self.emit = Some(path.into());
        self
    }

    pub fn marker_module(mut self, module: impl Into<String>) -> Self {
        self.marker_module = module.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// The decl compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Run the full pipeline over the input file
    pub fn compile(&self) -> Result<CompileOutput> {
        let source = self.read_source()?;
        if self.options.verbose {
            tracing::info!(file = %self.options.input.display(), bytes = source.len(), "compiling");
        }

        let analysis = analyze(&source, &self.options.input)?;
        let emitted = match &self.options.emit {
            Some(path) if !analysis.has_errors() => Some(self.emit(&analysis.graph, path)?),
            Some(path) => {
                tracing::warn!(path = %path.display(), "not emitting: the file has errors");
                None
            }
            None => None,
        };

        if self.options.verbose {
            tracing::info!(
                operations = analysis.graph.operations.len(),
                prompts = analysis.graph.prompts.len(),
                resources = analysis.graph.resources.len(),
                groups = analysis.graph.groups.len(),
                errors = analysis.summary.errors,
                warnings = analysis.summary.warnings,
                "compiled"
            );
        }

        Ok(CompileOutput {
            source_file: self.options.input.clone(),
            ast: analysis.ast,
            graph: analysis.graph,
            diagnostics: analysis.diagnostics,
            summary: analysis.summary,
            emitted,
        })
    }

    fn emit(&self, graph: &DescriptorGraph, path: &Path) -> Result<String> {
        let text = emit::emit(graph, &self.options.marker_module)?;
        std::fs::write(path, &text).map_err(|source| CompileError::Emit {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(stage = %Stage::Emitted, path = %path.display());
        Ok(text)
    }

    /// Read the source file
    fn read_source(&self) -> Result<String> {
        if !self.options.input.exists() {
            return Err(CompileError::FileNotFound(self.options.input.clone()));
        }

        std::fs::read_to_string(&self.options.input).map_err(CompileError::from)
    }
}

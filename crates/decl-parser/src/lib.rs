pub mod ast;
pub mod ast_dump;
mod lower;

#[cfg(test)]
mod lowering_tests;

pub use ast::*;
pub use lower::unquote;

use thiserror::Error;
use tree_sitter::Parser;

/// Failures of the front end itself. Syntax errors in the analyzed file are
/// not among them: they are recorded in [`SourceFile::syntax_errors`].
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to load the TypeScript grammar: {0}")]
    Grammar(String),

    #[error("the parser produced no tree")]
    NoTree,
}

/// Parse a decl source file (TypeScript) into the declaration AST
pub fn parse(input: &str) -> Result<SourceFile, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
        .map_err(|e| ParseError::Grammar(e.to_string()))?;

    let tree = parser.parse(input, None).ok_or(ParseError::NoTree)?;
    let file = lower::lower(&tree, input);

    tracing::trace!(
        items = file.items.len(),
        syntax_errors = file.syntax_errors.len(),
        "lowered source file"
    );
    Ok(file)
}

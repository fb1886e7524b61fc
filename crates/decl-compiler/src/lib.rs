/// decl compiler
///
/// Reads a TypeScript file of service declarations without running it and
/// produces a descriptor graph: operations, prompts, resources, capability
/// groups and service metadata, each bound to its implementation in the file.

pub mod annotations;
pub mod binder;
pub mod descriptors;
pub mod diagnostics;
pub mod driver;
pub mod emit;
pub mod error;
pub mod naming;
pub mod scanner;
pub mod schema;
pub mod translate;
pub mod validate;

pub use descriptors::{
    AuthConfig, CapabilityGroupDescriptor, DescriptorGraph, HandlerRef, OperationDescriptor,
    OperationFlags, PromptArgument, PromptContent, PromptDescriptor, ResourceContent,
    ResourceDescriptor, ServiceDescriptor,
};
pub use diagnostics::{Category, Code, Diagnostic, Location, Severity, Summary};
pub use driver::{Analysis, CompileOptions, CompileOutput, Compiler, Stage, analyze};
pub use emit::{DEFAULT_MARKER_MODULE, emit};
pub use error::{CompileError, Result};
pub use schema::{Constraints, ObjectField, PrimitiveKind, SchemaNode, json_schema};

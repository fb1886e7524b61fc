/// Implementation binder
///
/// Matches every operation, dynamic prompt and dynamic resource to the value
/// in the same file that implements it. Candidates come from top-level value
/// bindings and the members of the default export aggregate, looked up under
/// each naming-convention variant of the descriptor's name. Candidates that
/// resolve to the same implementation (through identifier aliases) count once;
/// distinct implementations are never ranked against each other.

use crate::descriptors::{DescriptorGraph, HandlerRef};
use crate::naming;
use crate::scanner::DeclarationKind;
use crate::translate::SourceIndex;
use decl_parser::{Binding, Member, SourceFile, Span, Value};
use std::collections::HashMap;

/// Parameters a handler may declare: the arguments, then the context
pub const MAX_HANDLER_PARAMS: usize = 2;

/// Alias chains longer than this are treated as unresolved
const MAX_ALIAS_DEPTH: usize = 16;

/// One possible implementation found for a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// `add`, or `default.add` for aggregate members
    pub label: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Bound {
        handler: HandlerRef,
        /// The handler declares no parameters although arguments are passed
        ignores_params: Option<Candidate>,
    },
    Missing { tried: Vec<String> },
    Ambiguous { candidates: Vec<Candidate> },
    NotCallable { candidate: Candidate, what: &'static str },
    TooManyParams { candidate: Candidate, required: usize },
}

/// Binding result for one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingOutcome {
    pub kind: DeclarationKind,
    pub name: String,
    /// Where the descriptor is declared
    pub span: Span,
    pub resolution: Resolution,
}

impl BindingOutcome {
    pub fn is_bound(&self) -> bool {
        matches!(self.resolution, Resolution::Bound { .. })
    }
}

/// What a candidate ultimately refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Identity {
    TopLevel(String),
    Member(String),
}

struct Found<'f> {
    candidate: Candidate,
    identity: Identity,
    /// `None` when an alias leads outside the file
    value: Option<&'f Value>,
}

/// Top-level bindings and default-export members of one file
struct SearchSpace<'f> {
    top: HashMap<&'f str, &'f Binding>,
    members: HashMap<&'f str, &'f Member>,
}

impl<'f> SearchSpace<'f> {
    fn new(file: &'f SourceFile) -> Self {
        let mut top = HashMap::new();
        for binding in file.bindings() {
            top.entry(binding.name.as_str()).or_insert(binding);
        }
        let mut space = Self {
            top,
            members: HashMap::new(),
        };

        let aggregate = file.default_export().and_then(|export| match &export.value {
            Value::Alias(name) => space.resolve(name).1,
            value => Some(value),
        });
        if let Some(Value::Object(members) | Value::Class(members)) = aggregate {
            for member in members {
                space.members.entry(member.name.as_str()).or_insert(member);
            }
        }
        space
    }

    /// Follow identifier aliases between top-level bindings
    fn resolve(&self, name: &str) -> (Identity, Option<&'f Value>) {
        let mut current = name.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            let Some(binding) = self.top.get(current.as_str()) else {
                return (Identity::TopLevel(current), None);
            };
            match &binding.value {
                Value::Alias(next) if next != &current => current = next.clone(),
                value => return (Identity::TopLevel(current), Some(value)),
            }
        }
        (Identity::TopLevel(current), None)
    }

    fn lookup(&self, variant: &str) -> Vec<Found<'f>> {
        let mut found = Vec::new();
        if let Some(binding) = self.top.get(variant) {
            let (identity, value) = self.resolve(variant);
            found.push(Found {
                candidate: Candidate {
                    label: variant.to_string(),
                    span: binding.span,
                },
                identity,
                value,
            });
        }
        if let Some(member) = self.members.get(variant) {
            let (identity, value) = match &member.value {
                Value::Alias(target) => self.resolve(target),
                value => (Identity::Member(member.name.clone()), Some(value)),
            };
            found.push(Found {
                candidate: Candidate {
                    label: format!("default.{}", member.name),
                    span: member.span,
                },
                identity,
                value,
            });
        }
        found
    }

    fn bind(&self, name: &str, takes_params: bool) -> Resolution {
        let tried = naming::variants(name);
        let mut distinct: Vec<Found<'f>> = Vec::new();
        for variant in &tried {
            for found in self.lookup(variant) {
                if !distinct.iter().any(|d| d.identity == found.identity) {
                    distinct.push(found);
                }
            }
        }

        match distinct.len() {
            0 => Resolution::Missing { tried },
            1 => {
                let found = distinct.remove(0);
                check_callable(found, takes_params)
            }
            _ => Resolution::Ambiguous {
                candidates: distinct.into_iter().map(|d| d.candidate).collect(),
            },
        }
    }
}

fn check_callable(found: Found<'_>, takes_params: bool) -> Resolution {
    let handler = HandlerRef {
        symbol: found.candidate.label.clone(),
    };
    match found.value {
        Some(Value::Function(arity)) => {
            if arity.required > MAX_HANDLER_PARAMS {
                return Resolution::TooManyParams {
                    candidate: found.candidate,
                    required: arity.required,
                };
            }
            let declares_none = arity.required + arity.optional == 0 && !arity.rest;
            Resolution::Bound {
                handler,
                ignores_params: (declares_none && takes_params).then_some(found.candidate),
            }
        }
        Some(Value::Class(_)) => Resolution::NotCallable {
            candidate: found.candidate,
            what: "a class",
        },
        Some(Value::Object(_)) => Resolution::NotCallable {
            candidate: found.candidate,
            what: "an object",
        },
        Some(Value::Literal) => Resolution::NotCallable {
            candidate: found.candidate,
            what: "a literal value",
        },
        // Imports, opaque expressions and values from outside the file
        _ => Resolution::Bound {
            handler,
            ignores_params: None,
        },
    }
}

/// Bind every descriptor that needs an implementation, storing handlers in
/// the graph, and return one outcome per such descriptor.
pub fn bind(file: &SourceFile, graph: &mut DescriptorGraph, index: &SourceIndex) -> Vec<BindingOutcome> {
    let space = SearchSpace::new(file);
    let mut outcomes = Vec::new();

    let mut record = |kind: DeclarationKind, name: &str, span: Span, takes_params: bool| {
        let resolution = space.bind(name, takes_params);
        tracing::trace!(%kind, name, bound = matches!(resolution, Resolution::Bound { .. }), "binding");
        let handler = match &resolution {
            Resolution::Bound { handler, .. } => Some(handler.clone()),
            _ => None,
        };
        outcomes.push(BindingOutcome {
            kind,
            name: name.to_string(),
            span,
            resolution,
        });
        handler
    };

    for (i, op) in graph.operations.iter_mut().enumerate() {
        let span = index.operations.get(i).map(|s| s.span).unwrap_or_default();
        let takes_params = op.params.fields().is_some_and(|f| !f.is_empty());
        op.handler = record(DeclarationKind::Operation, &op.name, span, takes_params);
    }
    for (i, prompt) in graph.prompts.iter_mut().enumerate() {
        if !prompt.is_dynamic() {
            continue;
        }
        let span = index.prompts.get(i).map(|s| s.span).unwrap_or_default();
        let takes_params = !prompt.arguments.is_empty();
        prompt.handler = record(DeclarationKind::Prompt, &prompt.name, span, takes_params);
    }
    for (i, resource) in graph.resources.iter_mut().enumerate() {
        if !resource.is_dynamic() {
            continue;
        }
        let span = index.resources.get(i).map(|s| s.span).unwrap_or_default();
        let takes_params = resource.is_template();
        resource.handler = record(DeclarationKind::Resource, &resource.name, span, takes_params);
    }

    tracing::debug!(
        needed = outcomes.len(),
        bound = outcomes.iter().filter(|o| o.is_bound()).count(),
        "binding complete"
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::OperationDescriptor;
    use crate::schema::{ObjectField, PrimitiveKind, SchemaNode};
    use decl_parser::parse;
    use indexmap::IndexMap;

    fn operation(name: &str, with_params: bool) -> OperationDescriptor {
        let mut fields = IndexMap::new();
        if with_params {
            fields.insert(
                "a".to_string(),
                ObjectField::new(SchemaNode::leaf(PrimitiveKind::Number), true),
            );
        }
        OperationDescriptor {
            name: name.to_string(),
            description: None,
            params: SchemaNode::Object { fields },
            result: None,
            flags: Default::default(),
            handler: None,
        }
    }

    fn bind_one(source: &str, name: &str) -> (Resolution, Option<HandlerRef>) {
        let file = parse(source).unwrap();
        let mut graph = DescriptorGraph {
            operations: vec![operation(name, true)],
            ..Default::default()
        };
        let outcomes = bind(&file, &mut graph, &SourceIndex::default());
        (outcomes[0].resolution.clone(), graph.operations[0].handler.clone())
    }

    fn labels(resolution: &Resolution) -> Vec<&str> {
        match resolution {
            Resolution::Ambiguous { candidates } => candidates.iter().map(|c| c.label.as_str()).collect(),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_single_candidate_binds() {
        let (resolution, handler) = bind_one("export function add(args) { return 1; }", "add");
        assert!(matches!(resolution, Resolution::Bound { ignores_params: None, .. }));
        assert_eq!(handler, Some(HandlerRef::top_level("add")));
    }

    #[test]
    fn test_convention_variant_binds() {
        let (_, handler) = bind_one("const getUser = (args, ctx) => null;", "get-user");
        assert_eq!(handler, Some(HandlerRef::top_level("getUser")));
    }

    #[test]
    fn test_distinct_variants_are_ambiguous() {
        let (resolution, handler) = bind_one(
            "function add(a) { return 1; }\nfunction Add(a) { return 2; }",
            "add",
        );
        assert_eq!(labels(&resolution), vec!["add", "Add"]);
        assert_eq!(handler, None);
    }

    #[test]
    fn test_aliases_resolve_to_one_implementation() {
        let (resolution, handler) = bind_one(
            "function add(a) {}\nconst Add = add;\nexport default { add };",
            "add",
        );
        assert!(matches!(resolution, Resolution::Bound { .. }), "{:?}", resolution);
        assert_eq!(handler, Some(HandlerRef::top_level("add")));
    }

    #[test]
    fn test_default_aggregate_members() {
        let (_, handler) = bind_one("export default { add(args, ctx) { return 1; } };", "add");
        assert_eq!(handler, Some(HandlerRef::default_member("add")));

        let (_, handler) = bind_one(
            "class Calc { add(args) { return 1; } }\nexport default Calc;",
            "add",
        );
        assert_eq!(handler, Some(HandlerRef::default_member("add")));

        let (resolution, _) = bind_one(
            "const add = (a) => 1;\nexport default { add: (a) => 2 };",
            "add",
        );
        assert_eq!(labels(&resolution), vec!["add", "default.add"]);
    }

    #[test]
    fn test_callability_checks() {
        let (resolution, handler) = bind_one("class Add {}", "add");
        assert!(matches!(resolution, Resolution::NotCallable { what: "a class", .. }));
        assert_eq!(handler, None);

        let (resolution, _) = bind_one("const add = 42;", "add");
        assert!(matches!(resolution, Resolution::NotCallable { what: "a literal value", .. }));

        let (resolution, _) = bind_one("function add(a, b, c) {}", "add");
        assert!(matches!(resolution, Resolution::TooManyParams { required: 3, .. }));

        let (resolution, handler) = bind_one("function add() {}", "add");
        assert!(matches!(resolution, Resolution::Bound { ignores_params: Some(_), .. }));
        assert!(handler.is_some());

        let (resolution, _) = bind_one("import { add } from \"./impl\";", "add");
        assert!(matches!(resolution, Resolution::Bound { ignores_params: None, .. }));
    }

    #[test]
    fn test_missing_lists_tried_names() {
        let (resolution, _) = bind_one("function subtract() {}", "add");
        assert_eq!(
            resolution,
            Resolution::Missing {
                tried: vec!["add".to_string(), "Add".to_string(), "ADD".to_string()]
            }
        );
    }
}

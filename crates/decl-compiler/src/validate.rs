/// Conflict and completeness checks over the finished graph
///
/// Runs every check in one batch; nothing here stops at the first problem.
/// Constraint findings from the translator and binder outcomes are turned into
/// diagnostics here as well.

use crate::binder::{BindingOutcome, Candidate, Resolution};
use crate::descriptors::{DescriptorGraph, PromptContent};
use crate::diagnostics::{Code, Diagnostics};
use crate::translate::{ConstraintFinding, FindingKind, Site, SourceIndex};
use decl_parser::Span;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\}\}").unwrap();
}

/// Placeholder names of a template, first occurrence order
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for captures in PLACEHOLDER.captures_iter(template) {
        if let Some(name) = captures.get(1).map(|m| m.as_str()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Everything the validator looks at
pub struct ValidationInput<'a> {
    pub graph: &'a DescriptorGraph,
    pub index: &'a SourceIndex,
    pub findings: &'a [ConstraintFinding],
    pub bindings: &'a [BindingOutcome],
}

pub fn validate(input: &ValidationInput<'_>, diags: &mut Diagnostics) {
    let before = diags.len();
    check_duplicates(input.graph, input.index, diags);
    check_flags(input.graph, input.index, diags);
    check_groups(input.graph, input.index, diags);
    check_templates(input.graph, input.index, diags);
    for finding in input.findings {
        report_finding(finding, diags);
    }
    for outcome in input.bindings {
        report_binding(outcome, diags);
    }
    tracing::debug!(reported = diags.len() - before, "validation complete");
}

fn site_span(sites: &[Site], i: usize, field: &str) -> Span {
    sites.get(i).map(|s| s.field(field)).unwrap_or_default()
}

/// Report every name after the first one with the same key
fn duplicates<'g>(
    kind: &str,
    key: &str,
    names: impl Iterator<Item = &'g str>,
    sites: &[Site],
    diags: &mut Diagnostics,
) {
    let mut first: HashMap<&str, usize> = HashMap::new();
    for (i, name) in names.enumerate() {
        match first.get(name) {
            Some(&earlier) => {
                let line = site_span(sites, earlier, key).line;
                diags.report(
                    Code::DuplicateName,
                    site_span(sites, i, key),
                    format!("duplicate {} {} `{}` (first declared on line {})", kind, key, name, line),
                );
            }
            None => {
                first.insert(name, i);
            }
        }
    }
}

fn check_duplicates(graph: &DescriptorGraph, index: &SourceIndex, diags: &mut Diagnostics) {
    duplicates(
        "operation",
        "name",
        graph.operations.iter().map(|o| o.name.as_str()),
        &index.operations,
        diags,
    );
    duplicates(
        "prompt",
        "name",
        graph.prompts.iter().map(|p| p.name.as_str()),
        &index.prompts,
        diags,
    );
    duplicates(
        "resource",
        "name",
        graph.resources.iter().map(|r| r.name.as_str()),
        &index.resources,
        diags,
    );
    duplicates(
        "resource",
        "uri",
        graph.resources.iter().map(|r| r.uri.as_str()),
        &index.resources,
        diags,
    );
    duplicates(
        "capability group",
        "name",
        graph.groups.iter().map(|g| g.name.as_str()),
        &index.groups,
        diags,
    );
}

fn check_flags(graph: &DescriptorGraph, index: &SourceIndex, diags: &mut Diagnostics) {
    for (i, op) in graph.operations.iter().enumerate() {
        if op.flags.read_only && op.flags.destructive {
            diags.report(
                Code::ConflictingFlags,
                site_span(&index.operations, i, "readOnly"),
                format!("operation `{}` cannot be both readOnly and destructive", op.name),
            );
        }
    }
}

fn check_groups(graph: &DescriptorGraph, index: &SourceIndex, diags: &mut Diagnostics) {
    let known: HashSet<&str> = graph.operations.iter().map(|o| o.name.as_str()).collect();
    for (i, group) in graph.groups.iter().enumerate() {
        let site = index.groups.get(i);
        let mut seen = HashSet::new();
        for (j, op) in group.operations.iter().enumerate() {
            let span = site
                .and_then(|s| s.items.get(j).copied().or_else(|| Some(s.field("tools"))))
                .unwrap_or_default();
            if !seen.insert(op.as_str()) {
                diags.report(
                    Code::DuplicateGroupMember,
                    span,
                    format!("`{}` is listed more than once in group `{}`", op, group.name),
                );
            } else if !known.contains(op.as_str()) {
                diags.report(
                    Code::UnknownGroupMember,
                    span,
                    format!("group `{}` references unknown operation `{}`", group.name, op),
                );
            }
        }
    }
}

fn check_templates(graph: &DescriptorGraph, index: &SourceIndex, diags: &mut Diagnostics) {
    for (i, prompt) in graph.prompts.iter().enumerate() {
        let PromptContent::Template(template) = &prompt.content else {
            continue;
        };
        if template.is_empty() {
            continue;
        }
        let used = placeholders(template);
        for name in &used {
            if !prompt.arguments.iter().any(|a| a.name == *name) {
                diags.report(
                    Code::UndeclaredPlaceholder,
                    site_span(&index.prompts, i, "template"),
                    format!(
                        "template of prompt `{}` uses `{{{{{}}}}}` but declares no argument `{}`",
                        prompt.name, name, name
                    ),
                );
            }
        }
        for argument in prompt.arguments.iter().filter(|a| a.required) {
            if !used.contains(&argument.name.as_str()) {
                diags.report(
                    Code::UnusedArgument,
                    site_span(&index.prompts, i, "args"),
                    format!(
                        "required argument `{}` of prompt `{}` is never used by its template",
                        argument.name, prompt.name
                    ),
                );
            }
        }
    }
}

fn report_finding(finding: &ConstraintFinding, diags: &mut Diagnostics) {
    let subject = &finding.subject;
    let (code, message) = match &finding.kind {
        FindingKind::Incompatible { tag, node } => (
            Code::IncompatibleConstraint,
            format!("`@{}` does not apply to {} `{}`; the tag was dropped", tag, node, subject),
        ),
        FindingKind::Contradictory { low, high } => (
            Code::ContradictoryBounds,
            format!("`@{}` is greater than `@{}` on `{}`", low, high, subject),
        ),
        FindingKind::EnumMismatch { declared, tagged } => (
            Code::EnumMismatch,
            format!(
                "`@enum` on `{}` lists [{}] but the type declares [{}]",
                subject,
                tagged.join(", "),
                declared.join(", ")
            ),
        ),
        FindingKind::DefaultViolation { reason } => (
            Code::DefaultViolation,
            format!("default of `{}` is invalid: {}", subject, reason),
        ),
        FindingKind::DefaultOnRequired => (
            Code::DefaultOnRequired,
            format!("`{}` is required, so its `@default` never applies", subject),
        ),
    };
    diags.report(code, finding.span, message);
}

fn describe(candidate: &Candidate) -> String {
    format!("`{}` (line {})", candidate.label, candidate.span.line)
}

fn report_binding(outcome: &BindingOutcome, diags: &mut Diagnostics) {
    let target = format!("{} `{}`", outcome.kind, outcome.name);
    match &outcome.resolution {
        Resolution::Bound { ignores_params, .. } => {
            if let Some(candidate) = ignores_params {
                diags.report(
                    Code::IgnoredParameters,
                    candidate.span,
                    format!(
                        "handler `{}` declares no parameters; the arguments of {} are ignored",
                        candidate.label, target
                    ),
                );
            }
        }
        Resolution::Missing { tried } => {
            let tried: Vec<String> = tried.iter().map(|t| format!("`{}`", t)).collect();
            diags.report(
                Code::MissingImplementation,
                outcome.span,
                format!("no implementation found for {} (tried {})", target, tried.join(", ")),
            );
        }
        Resolution::Ambiguous { candidates } => {
            let named: Vec<String> = candidates.iter().map(describe).collect();
            diags.report(
                Code::AmbiguousImplementation,
                outcome.span,
                format!(
                    "{} has several distinct implementations: {}",
                    target,
                    named.join(", ")
                ),
            );
        }
        Resolution::NotCallable { candidate, what } => diags.report(
            Code::NotCallable,
            outcome.span,
            format!("{} resolves to {}, which is {}", target, describe(candidate), what),
        ),
        Resolution::TooManyParams { candidate, required } => diags.report(
            Code::ArityMismatch,
            outcome.span,
            format!(
                "{} for {} requires {} parameters; a handler takes at most 2 (arguments, context)",
                describe(candidate),
                target,
                required
            ),
        ),
    }
}

/// decl compiler CLI

use anyhow::Context;
use clap::{Parser, ValueEnum};
use decl_compiler::{CompileOptions, CompileOutput, Compiler, DescriptorGraph};
use decl_parser::ast_dump::dump_file;
use std::path::PathBuf;
use std::process;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "declc")]
#[command(about = "decl compiler - reads service declarations and builds their descriptor graph")]
#[command(version)]
struct Args {
    /// Input declaration file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// How to print the descriptor graph
    #[arg(short, long, value_enum, default_value_t = Format::Human)]
    format: Format,

    /// Write the graph back out as a declaration file
    #[arg(long, value_name = "FILE")]
    emit: Option<PathBuf>,

    /// Module the emitted file imports its markers from
    #[arg(long, env = "DECL_MARKER_MODULE", value_name = "MODULE")]
    marker_module: Option<String>,

    /// Fail when there are warnings
    #[arg(long)]
    deny_warnings: bool,

    /// Print the declaration AST and exit (debug mode)
    #[arg(long)]
    dump_ast: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    let directives = std::env::var("DECL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .parse_lossy(directives),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_human(graph: &DescriptorGraph) {
    match &graph.service {
        Some(service) => println!("service {} {}", service.name, service.version),
        None => println!("(no service)"),
    }
    if !graph.operations.is_empty() {
        println!("operations:");
        for op in &graph.operations {
            let handler = op.handler.as_ref().map(|h| h.symbol.as_str()).unwrap_or("-");
            let params = op.params.fields().map(|f| f.len()).unwrap_or(0);
            println!("  {} ({} params) -> {}", op.name, params, handler);
        }
    }
    if !graph.prompts.is_empty() {
        println!("prompts:");
        for prompt in &graph.prompts {
            let kind = if prompt.is_dynamic() { "dynamic" } else { "template" };
            println!("  {} ({}, {} args)", prompt.name, kind, prompt.arguments.len());
        }
    }
    if !graph.resources.is_empty() {
        println!("resources:");
        for resource in &graph.resources {
            println!("  {} {} [{}]", resource.name, resource.uri, resource.mime_type);
        }
    }
    if !graph.groups.is_empty() {
        println!("groups:");
        for group in &graph.groups {
            println!("  {}: {}", group.name, group.operations.join(", "));
        }
    }
}

fn report(output: &CompileOutput, args: &Args) -> anyhow::Result<()> {
    if args.dump_ast {
        println!("{}", dump_file(&output.ast));
        return Ok(());
    }
    match args.format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&output.graph).context("serializing the graph")?;
            println!("{}", json);
        }
        Format::Human => print_human(&output.graph),
    }
    Ok(())
}

fn run(args: &Args) -> anyhow::Result<bool> {
    let mut options = CompileOptions::new(&args.input).verbose(args.verbose);
    if let Some(path) = &args.emit {
        options = options.emit(path);
    }
    if let Some(module) = &args.marker_module {
        options = options.marker_module(module);
    }

    let output = Compiler::new(options)
        .compile()
        .with_context(|| format!("compiling {}", args.input.display()))?;

    for diagnostic in &output.diagnostics {
        eprintln!("{}", diagnostic);
    }
    if !output.diagnostics.is_empty() {
        eprintln!(
            "{} error(s), {} warning(s)",
            output.summary.errors, output.summary.warnings
        );
    }
    report(&output, args)?;

    let failed = output.has_errors() || (args.deny_warnings && output.summary.warnings > 0);
    Ok(!failed)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Compilation failed: {:#}", e);
            process::exit(1);
        }
    }
}

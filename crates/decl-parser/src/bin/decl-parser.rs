use decl_parser::{ast_dump::dump_file, parse};
use std::env;
use std::fs;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <file.ts>", args[0]);
        eprintln!();
        eprintln!("Parse a decl source file and dump its declaration AST");
        process::exit(1);
    }

    let filename = &args[1];

    let input = match fs::read_to_string(filename) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", filename, e);
            process::exit(1);
        }
    };

    let file = match parse(&input) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Parse error in '{}': {}", filename, e);
            process::exit(1);
        }
    };

    println!("{}", dump_file(&file));

    if !file.syntax_errors.is_empty() {
        process::exit(2);
    }
}

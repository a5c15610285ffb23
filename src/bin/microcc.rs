//! The compiler binary: takes a `.c` file and an output format, and prints
//! the corresponding stage of the pipeline to stdout.
//!
//! run with `--help` for more info.

use microc::{compiler, front};

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Run)]
    out: Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// the resulting assembly code
    Asm,
    /// assemble and run, printing the exit value
    Run,
}

fn main() {
    use Output::*;
    let args = Args::parse();

    let input = String::from_utf8(std::fs::read(&args.file).expect("file should be readable"))
        .expect("input characters should be utf8");

    match args.out {
        Tokens => match front::lex::lex_all(&input) {
            Ok(tokens) => {
                for token in tokens {
                    println!("{token}");
                }
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        Ast => match front::parse(&input) {
            Ok(program) => println!("{program:?}"),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        Asm => match compiler::compile(&input) {
            Ok(asm) => println!("{asm}"),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        Run => match compiler::run_source(&input) {
            Ok(exit_value) => println!("{exit_value}"),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
    }
}

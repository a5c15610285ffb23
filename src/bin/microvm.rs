//! The assembler/VM runner binary: takes a `.asm` (mnemonic) file, assembles
//! and runs it, and prints the resulting exit value.
//!
//! run with `--help` for more info.

use microc::asm;
use microc::os;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// also print the assembler's symbol table to stderr
    #[arg(short, long, default_value_t = false)]
    symbols: bool,
}

fn main() {
    let args = Args::parse();

    let input = String::from_utf8(std::fs::read(&args.file).expect("file should be readable"))
        .expect("input characters should be utf8");

    let (instrs, symbols) = match asm::assemble(&input) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if args.symbols {
        for (name, index) in &symbols {
            eprintln!("{name}: {index}");
        }
    }

    match os::run_program(&instrs) {
        Ok(exit_value) => println!("{exit_value}"),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

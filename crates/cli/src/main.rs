#![forbid(unsafe_code)]

mod cli;
mod output;
mod run;

use clap::Parser;

fn main() {
    let args = cli::Cli::parse();
    let code = run::run(args);
    std::process::exit(code);
}

use anyhow::Result;
use argh::FromArgs;

mod builtin;
mod env;
mod external;
mod interpreter;
mod io_adapters;
mod lexer;
mod parser;
#[cfg(test)]
mod test_support;

use interpreter::Interpreter;

#[derive(FromArgs)]
/// An interactive shell with pipelines, redirection and background execution.
struct ShellArgs {}

fn main() -> Result<()> {
    // rejects unexpected arguments with a usage message and a nonzero exit
    let ShellArgs {} = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    Interpreter::default().repl()
}

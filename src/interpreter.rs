//! The read-eval-print loop around the core lex/build/launch pipeline.

use std::env as stdenv;
use std::process;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use crate::env::Environment;
use crate::lexer;
use crate::parser;

/// Shell exit code when the working directory cannot be determined for the
/// prompt.
const EXIT_NO_CWD: i32 = 3;

/// The interactive shell: owns the environment and feeds lines through the
/// lexer and the pipeline builder.
pub struct Interpreter {
    env: Environment,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    /// Prompt, read and evaluate until end of input.
    ///
    /// EOF (ctrl-d) leaves the loop cleanly without launching any pending
    /// partial command. Evaluation errors are reported and the loop
    /// continues.
    pub fn repl(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()?;
        loop {
            match editor.readline(&self.prompt()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if let Err(err) = self.eval(&line) {
                        eprintln!("{err:#}");
                    }
                }
                Err(ReadlineError::Eof) => break,
                Err(ReadlineError::Interrupted) => break,
                Err(err) => {
                    eprintln!("error reading input: {err}");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Lex and execute one line.
    pub fn eval(&mut self, line: &str) -> Result<()> {
        let (tokens, pipe_count) = lexer::split_into_tokens(line);
        debug!(?tokens, pipe_count, "lexed");
        // a lone sentinel means the line held no command at all
        if tokens.len() == 1 {
            return Ok(());
        }
        parser::run_line(&tokens, pipe_count, &mut self.env)
    }

    fn prompt(&self) -> String {
        match stdenv::current_dir() {
            Ok(cwd) => format!("pipesh:{}$ ", cwd.display()),
            Err(err) => {
                eprintln!("getcwd failed: {err}");
                process::exit(EXIT_NO_CWD);
            }
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

use std::env as stdenv;
use std::path::PathBuf;

/// State the shell process carries between commands.
///
/// Launched children inherit the working directory from the shell itself, so
/// `current_dir` tracks what `cd` last set (and feeds the prompt).
#[derive(Debug, Clone)]
pub struct Environment {
    pub current_dir: PathBuf,
}

impl Environment {
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { current_dir }
    }

    /// Look up a variable in the process environment (`PATH`, `HOME`).
    pub fn get_var(&self, key: &str) -> Option<String> {
        stdenv::var(key).ok()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

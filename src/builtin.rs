use crate::env::Environment;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::fs;
use std::path::PathBuf;

pub type ExitCode = i32;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// directly in-process, before any child process is created. Redirections
/// never apply to them.
trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    /// Executes the command against the shell's own state.
    ///
    /// Return value follows shell conventions: 0 for success, non-zero for
    /// error.
    fn execute(self, env: &mut Environment) -> Result<ExitCode>;
}

/// Run `argv` as a builtin if its command name matches one.
///
/// Returns `None` for anything that is not a builtin, so the caller can fall
/// through to process creation.
pub fn try_run(argv: &[String], env: &mut Environment) -> Option<Result<ExitCode>> {
    let name = argv[0].as_str();
    if name == Cd::name() {
        return Some(run_builtin::<Cd>(argv, env));
    }
    if name == Exit::name() {
        return Some(run_builtin::<Exit>(argv, env));
    }
    None
}

fn run_builtin<T: BuiltinCommand>(argv: &[String], env: &mut Environment) -> Result<ExitCode> {
    let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
    match T::from_args(&[T::name()], &args) {
        Ok(cmd) => cmd.execute(env),
        // `--help` and argument errors land here; argh already rendered the text
        Err(EarlyExit { output, status }) => {
            if status.is_err() {
                eprintln!("{output}");
                Ok(1)
            } else {
                println!("{output}");
                Ok(0)
            }
        }
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME
/// environment variable.
struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    /// Defaults to $HOME when omitted.
    target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, env: &mut Environment) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => {
                if let Some(home) = env.get_var("HOME") {
                    PathBuf::from(home)
                } else {
                    return Err(anyhow::anyhow!("cd: no target and HOME not set"));
                }
            }
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        // canonicalize first so a bad target leaves the shell's state untouched
        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: can't canonicalize {}", new_dir.display()))?;

        std::env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell immediately.
struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0
    _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _env: &mut Environment) -> Result<ExitCode> {
        std::process::exit(0)
    }
}

//! The pipeline builder: walking a token sequence and driving launches.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;

use anyhow::{Context, Result, bail};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use tracing::trace;

use crate::env::Environment;
use crate::external;
use crate::io_adapters::{self, IoWiring, PipePair};
use crate::lexer::Token;

/// Permission bits for files created by `>` and `>>`.
const REDIRECT_FILE_MODE: u32 = 0o700;

/// Execute one tokenized line.
///
/// Walks the token sequence once, launching a command at every control
/// operator boundary. Whatever the walk's outcome, the end-of-pass cleanup
/// runs: at most one terminated child is drained and the shell's standard
/// input is re-attached to the terminal.
pub fn run_line(tokens: &[Token], pipe_count: usize, env: &mut Environment) -> Result<()> {
    let result = walk(tokens, pipe_count, env);
    drain_one_child();
    io_adapters::reattach_stdin();
    result
}

/// The cursor state machine over the token sequence.
///
/// State carried across the walk: the argument vector being assembled, the
/// I/O wiring for the command it will become, and the pipe slots. Words
/// accumulate; redirect operators consume their target with one unit of
/// lookahead; `|`, `&` and `;` terminate the current argument vector and
/// hand it to the launcher. An empty argument vector at an operator skips
/// the launch entirely.
fn walk(tokens: &[Token], pipe_count: usize, env: &mut Environment) -> Result<()> {
    // One slot per `|` on the line, acquired up front so a pipe shortage
    // aborts the pass before anything is launched.
    let mut pipe_slots = Vec::with_capacity(pipe_count);
    for _ in 0..pipe_count {
        pipe_slots.push(PipePair::new()?);
    }
    let mut pipe_slots = pipe_slots.into_iter();

    let mut argv: Vec<String> = Vec::new();
    let mut wiring = IoWiring::default();
    let mut pos = 0;

    while pos < tokens.len() {
        match &tokens[pos] {
            Token::Word(w) => {
                argv.push(w.clone());
                pos += 1;
            }
            Token::RedirectRight => {
                let target = redirect_target(tokens, pos)?;
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(REDIRECT_FILE_MODE)
                    .open(target)
                    .with_context(|| format!("error redirecting to {target}"))?;
                wiring.output = Some(file.into());
                pos += 2;
            }
            Token::RedirectAppend => {
                let target = redirect_target(tokens, pos)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .mode(REDIRECT_FILE_MODE)
                    .open(target)
                    .with_context(|| format!("error redirecting to {target}"))?;
                wiring.output = Some(file.into());
                pos += 2;
            }
            Token::RedirectLeft => {
                let target = redirect_target(tokens, pos)?;
                let file = File::open(target)
                    .with_context(|| format!("error redirecting from {target}"))?;
                wiring.input = Some(file.into());
                pos += 2;
            }
            Token::PipeOp => {
                let Some(pipe) = pipe_slots.next() else {
                    bail!("pipe operator without an available pipe slot");
                };
                let current = std::mem::take(&mut wiring);
                let next_input = if argv.is_empty() {
                    // nothing to launch; dropping the write end means the
                    // next stage reads immediate EOF instead of hanging
                    drop(current);
                    drop(pipe.write);
                    Some(pipe.read)
                } else {
                    external::launch(&argv, true, current, Some(pipe), env)?
                };
                // the read end becomes the next command's input
                wiring = IoWiring {
                    input: next_input,
                    output: None,
                };
                argv.clear();
                pos += 1;
            }
            Token::Background => {
                let current = std::mem::take(&mut wiring);
                if !argv.is_empty() {
                    external::launch(&argv, false, current, None, env)?;
                }
                argv.clear();
                pos += 1;
            }
            Token::Seq => {
                let current = std::mem::take(&mut wiring);
                if !argv.is_empty() {
                    external::launch(&argv, true, current, None, env)?;
                }
                argv.clear();
                pos += 1;
            }
        }
    }
    Ok(())
}

fn redirect_target<'a>(tokens: &'a [Token], pos: usize) -> Result<&'a str> {
    match tokens.get(pos + 1) {
        Some(Token::Word(w)) => Ok(w),
        _ => bail!("missing redirection target"),
    }
}

/// The unconditional end-of-parse wait.
///
/// Non-blocking: it reaps at most one already-terminated child (typically a
/// `&` launch that has since exited) without stalling the prompt on one that
/// is still running. Anything beyond the first stays unreaped until a later
/// pass.
fn drain_one_child() {
    if let Ok(status) = waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
        trace!(?status, "drained child");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::split_into_tokens;
    use crate::test_support::process_lock;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    fn run(line: &str, env: &mut Environment) -> Result<()> {
        let (tokens, pipe_count) = split_into_tokens(line);
        run_line(&tokens, pipe_count, env)
    }

    fn temp_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("pipesh_{tag}_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn bare_word_launches_one_command() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let out = temp_path("touch");
        run(&format!("touch {}", out.display()), &mut env).unwrap();
        assert!(out.exists());
        let _ = fs::remove_file(&out);
    }

    #[test]
    fn redirect_creates_and_truncates() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let out = temp_path("trunc");

        run(&format!("echo hello > {}", out.display()), &mut env).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello\n");

        run(&format!("echo shorter > {}", out.display()), &mut env).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "shorter\n");

        let _ = fs::remove_file(&out);
    }

    #[test]
    fn append_adds_instead_of_truncating() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let out = temp_path("append");

        run(&format!("echo one > {}", out.display()), &mut env).unwrap();
        run(&format!("echo two >> {}", out.display()), &mut env).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "one\ntwo\n");

        let _ = fs::remove_file(&out);
    }

    #[test]
    fn redirect_input_feeds_the_child() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let input = temp_path("in");
        let out = temp_path("in_out");
        fs::write(&input, "alpha\nbeta\n").unwrap();

        run(
            &format!("cat < {} > {}", input.display(), out.display()),
            &mut env,
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "alpha\nbeta\n");

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&out);
    }

    #[test]
    fn sequenced_commands_run_in_order() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let out = temp_path("seq");

        let line = format!(
            "echo 1 >> {p} ; echo 2 >> {p} ; echo 3 >> {p}",
            p = out.display()
        );
        run(&line, &mut env).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "1\n2\n3\n");

        let _ = fs::remove_file(&out);
    }

    #[test]
    fn pipeline_connects_stdout_to_stdin() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let out = temp_path("pipe");

        // cat only terminates once every write end is closed, so this also
        // checks the descriptor discipline on both sides
        run(&format!("echo hello | cat > {}", out.display()), &mut env).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello\n");

        let _ = fs::remove_file(&out);
    }

    #[test]
    fn two_stage_pipeline_with_filters() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let input = temp_path("grep_in");
        let out = temp_path("grep_out");
        fs::write(&input, "keep this\ndrop that\nkeep too\n").unwrap();

        run(
            &format!("grep keep < {} | wc -l > {}", input.display(), out.display()),
            &mut env,
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "2");

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&out);
    }

    #[test]
    fn pipe_with_empty_left_side_reads_eof() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let out = temp_path("empty_pipe");

        run(&format!("| cat > {}", out.display()), &mut env).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "");

        let _ = fs::remove_file(&out);
    }

    #[test]
    fn background_launch_returns_immediately() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let started = Instant::now();
        run("sleep 2 &", &mut env).unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "shell blocked on a background child"
        );
    }

    #[test]
    fn foreground_launch_waits_for_completion() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let started = Instant::now();
        run("sleep 1", &mut env).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn redirect_without_target_is_an_error() {
        let _lock = process_lock();
        let mut env = Environment::new();
        assert!(run("echo hi >", &mut env).is_err());
    }

    #[test]
    fn unreadable_input_aborts_before_later_redirections() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let out = temp_path("aborted");

        let line = format!("cat < /nonexistent/pipesh/input > {}", out.display());
        assert!(run(&line, &mut env).is_err());
        // the walk stopped at the failed `<`, so the output target was
        // never created
        assert!(!out.exists());
    }

    #[test]
    fn sentinel_only_line_launches_nothing() {
        let _lock = process_lock();
        let mut env = Environment::new();
        let (tokens, pipe_count) = split_into_tokens("  ");
        assert_eq!(tokens, vec![Token::Seq]);
        run_line(&tokens, pipe_count, &mut env).unwrap();
    }
}

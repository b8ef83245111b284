//! Launching commands: PATH resolution, fork/exec and the wait contract.

use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::process;

use anyhow::Result;
use nix::libc;
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult};
use tracing::debug;

use crate::builtin;
use crate::env::Environment;
use crate::io_adapters::{IoWiring, PipePair};

/// Exit status used by a child whose command could not be resolved or
/// executed.
const EXIT_NOT_EXECUTABLE: i32 = 127;

/// Shell exit code for a failed `fork`: the host cannot support further
/// process creation, so the shell itself gives up.
const EXIT_FORK_FAILED: i32 = 5;

/// Launch one command.
///
/// Builtins run in-process and return immediately. Anything else is forked;
/// the child wires its standard streams from `pipe` and `wiring`, resolves
/// the command and execs it. With `parent_wait` the call blocks until that
/// specific child terminates; otherwise the child is left running,
/// untracked.
///
/// When a pipe was supplied the parent keeps only its read end, which is
/// returned so the builder can feed it to the next pipeline stage. Every
/// other descriptor handed in is closed on the shell side before returning.
pub fn launch(
    argv: &[String],
    parent_wait: bool,
    wiring: IoWiring,
    pipe: Option<PipePair>,
    env: &mut Environment,
) -> Result<Option<OwnedFd>> {
    if argv.is_empty() {
        return Ok(None);
    }
    if let Some(result) = builtin::try_run(argv, env) {
        // builtin failures are reported but never abort the walk
        if let Err(err) = result {
            eprintln!("{err:#}");
        }
        return Ok(None);
    }

    match unsafe { unistd::fork() } {
        Err(err) => {
            eprintln!("fork: {err}");
            process::exit(EXIT_FORK_FAILED);
        }
        Ok(ForkResult::Child) => {
            // reached only when exec fails; never return into shell logic
            let code = exec_child(argv, wiring, pipe, env);
            process::exit(code);
        }
        Ok(ForkResult::Parent { child }) => {
            debug!(pid = child.as_raw(), command = %argv[0], parent_wait, "launched");
            let read_back = pipe.map(|p| {
                drop(p.write);
                p.read
            });
            // close any redirect targets still open on the shell side
            drop(wiring);
            if parent_wait {
                let _ = waitpid(child, None);
            }
            Ok(read_back)
        }
    }
}

/// Child-side setup between `fork` and `exec`; returns an exit code only on
/// failure.
fn exec_child(
    argv: &[String],
    wiring: IoWiring,
    pipe: Option<PipePair>,
    env: &Environment,
) -> i32 {
    // Pipe first, explicit redirection second: `>` on the left side of a
    // pipeline wins over the pipe.
    if let Some(pipe) = pipe {
        if unistd::dup2(pipe.write.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
            eprintln!("{}: cannot attach pipe", argv[0]);
            return 1;
        }
        // both ends must be closed before exec or the downstream reader
        // never sees EOF
        drop(pipe);
    }
    let IoWiring { input, output } = wiring;
    if let Some(input) = input {
        if unistd::dup2(input.as_raw_fd(), libc::STDIN_FILENO).is_err() {
            eprintln!("{}: cannot redirect input", argv[0]);
            return 1;
        }
        drop(input);
    }
    if let Some(output) = output {
        if unistd::dup2(output.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
            eprintln!("{}: cannot redirect output", argv[0]);
            return 1;
        }
        drop(output);
    }

    let search_paths = env.get_var("PATH").unwrap_or_default();
    let resolved = match find_command_path(OsStr::new(&search_paths), Path::new(&argv[0])) {
        Some(path) => path.into_owned(),
        None => {
            eprintln!("{}: command not found", argv[0]);
            return EXIT_NOT_EXECUTABLE;
        }
    };

    let Ok(program) = CString::new(resolved.into_os_string().into_vec()) else {
        eprintln!("{}: invalid path", argv[0]);
        return EXIT_NOT_EXECUTABLE;
    };
    let args: Vec<CString> = match argv.iter().map(|a| CString::new(a.as_str())).collect() {
        Ok(args) => args,
        Err(_) => {
            eprintln!("{}: invalid argument", argv[0]);
            return EXIT_NOT_EXECUTABLE;
        }
    };

    let _ = unistd::execv(&program, &args);
    eprintln!("{}: cannot execute", argv[0]);
    EXIT_NOT_EXECUTABLE
}

/// Resolve a command path the way a typical shell would.
///
/// Absolute and multi-component relative paths are taken as-is when they
/// exist; `./`-prefixed paths resolve against the current directory; a bare
/// single component is searched for in each `search_paths` directory in
/// order. Empty paths never resolve.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if path.is_absolute() {
        return path.exists().then(|| Cow::Borrowed(path));
    }
    if path.starts_with("./") {
        return path.exists().then(|| Cow::Borrowed(path));
    }
    if path.components().count() > 1 {
        return path.exists().then(|| Cow::Borrowed(path));
    }
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.exists())
        .map(Cow::Owned)
}

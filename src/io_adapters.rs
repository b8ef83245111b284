//! Descriptor-level plumbing between the pipeline builder and the launcher.

use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};

use anyhow::{Context, Result};
use nix::libc;
use nix::unistd;

/// The file descriptors one command launch should use.
///
/// `None` means the process's own standard stream. Owned descriptors are
/// closed when the wiring is dropped, which is how the builder resets its
/// state at `;`/`&` boundaries without leaking redirect targets.
#[derive(Default)]
pub struct IoWiring {
    pub input: Option<OwnedFd>,
    pub output: Option<OwnedFd>,
}

/// Both ends of one OS pipe; one pair is created per `|` operator.
///
/// Each end is handed to exactly one side of the pipeline; every other copy
/// has to be closed, or the reading stage never sees EOF.
pub struct PipePair {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl PipePair {
    pub fn new() -> Result<Self> {
        let (read, write) = unistd::pipe().context("error creating pipe")?;
        Ok(Self { read, write })
    }
}

/// Re-associate the shell's standard input with the controlling terminal.
///
/// Guards against a prior redirection or pipe dup leaving fd 0 pointing
/// somewhere else when the next prompt is issued. Best-effort: a no-op when
/// no terminal is attached (tests, scripted use).
pub fn reattach_stdin() {
    if let Ok(tty) = File::open("/dev/tty") {
        let _ = unistd::dup2(tty.as_raw_fd(), libc::STDIN_FILENO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn pipe_pair_carries_data() {
        let pair = PipePair::new().unwrap();
        let mut writer = File::from(pair.write);
        writer.write_all(b"through the pipe").unwrap();
        drop(writer);

        let mut reader = File::from(pair.read);
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "through the pipe");
    }

    #[test]
    fn default_wiring_owns_nothing() {
        let wiring = IoWiring::default();
        assert!(wiring.input.is_none());
        assert!(wiring.output.is_none());
    }
}

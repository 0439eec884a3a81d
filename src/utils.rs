use crate::error::Error;
use std::{
    ffi::OsString,
    io::Read,
    os::fd::AsRawFd,
    path::Path,
    time::{Duration, SystemTime},
};
use subprocess::{ExitStatus, Popen, PopenConfig, Redirection};

/// Joins two file system paths together.
pub fn path_join<A: AsRef<Path>, B: AsRef<Path>>(a: A, b: B) -> Result<String, Error> {
    a.as_ref()
        .join(b.as_ref())
        .to_str()
        .map(String::from)
        .ok_or(Error::from("Could not convert path to a string."))
}

/// Joins two file system paths together and returns the absolute path of the
/// result.
pub fn path_absolute_join<A: AsRef<Path>, B: AsRef<Path>>(a: A, b: B) -> Result<String, Error> {
    std::path::absolute(a.as_ref().join(b.as_ref()))?
        .to_str()
        .map(String::from)
        .ok_or(Error::from("Could not convert path to a string."))
}

/// Returns the absolute parent path of the provided string, which can succeed
/// even if the path doesn't exist.
pub fn path_absolute_parent<P: AsRef<Path>>(path: P) -> Result<String, Error> {
    std::path::absolute(path.as_ref())?
        .parent()
        .map(|e| e.to_owned())
        .and_then(|p| p.to_str().map(String::from))
        .ok_or(Error::from("Internal error: Could not get parent of path."))
}

#[derive(Debug, Clone)]
pub struct CommandLimits {
    pub timeout: Duration,
    pub max_stdout_length: usize,
    pub max_stderr_length: usize,
}

impl Default for CommandLimits {
    fn default() -> Self {
        CommandLimits {
            timeout: Duration::from_secs(60),
            max_stdout_length: 128 * 1024,
            max_stderr_length: 128 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

const STDOUT_TOKEN: mio::Token = mio::Token(1);
const STDERR_TOKEN: mio::Token = mio::Token(2);
const READ_BUFFER_SIZE: usize = 4096;

/// Reads whatever is currently available on `src` into `dst`, failing once
/// more than `limit` bytes have been collected. Returns the number of bytes
/// read, where 0 means end of stream.
fn drain_into<R: Read>(src: &mut R, dst: &mut Vec<u8>, limit: usize) -> Result<usize, Error> {
    let mut read_buf = [0u8; READ_BUFFER_SIZE];
    let l = src.read(read_buf.as_mut_slice())?;
    dst.extend_from_slice(&read_buf[..l]);
    if dst.len() > limit {
        return Err(Error::SyscommandOutputLimitExceededError(limit));
    }
    Ok(l)
}

/// Polls stdout and stderr of the running process until it exits or the
/// deadline passes. `Ok(None)` means that the deadline passed.
fn collect_until_exit(
    handle: &mut Popen,
    buf_stdout: &mut Vec<u8>,
    buf_stderr: &mut Vec<u8>,
    deadline: SystemTime,
    limits: &CommandLimits,
) -> Result<Option<ExitStatus>, Error> {
    let mut poll = mio::Poll::new()?;
    let mut events = mio::Events::with_capacity(64);

    if let Some(f) = &handle.stdout {
        poll.registry().register(
            &mut mio::unix::SourceFd(&f.as_raw_fd()),
            STDOUT_TOKEN,
            mio::Interest::READABLE,
        )?;
    }
    if let Some(f) = &handle.stderr {
        poll.registry().register(
            &mut mio::unix::SourceFd(&f.as_raw_fd()),
            STDERR_TOKEN,
            mio::Interest::READABLE,
        )?;
    }

    let mut stat = None;
    while SystemTime::now() < deadline && stat.is_none() {
        poll.poll(&mut events, Some(Duration::from_millis(100)))?;

        for event in &events {
            match event.token() {
                STDOUT_TOKEN => {
                    if let Some(f) = handle.stdout.as_mut() {
                        drain_into(f, buf_stdout, limits.max_stdout_length)?;
                    }
                }
                STDERR_TOKEN => {
                    if let Some(f) = handle.stderr.as_mut() {
                        drain_into(f, buf_stderr, limits.max_stderr_length)?;
                    }
                }
                _ => {}
            }
        }

        stat = handle.poll();
    }

    // The process is gone, so the pipes hit EOF once the remaining data has
    // been read.
    if stat.is_some() {
        if let Some(f) = handle.stdout.as_mut() {
            while drain_into(f, buf_stdout, limits.max_stdout_length)? > 0 {}
        }
        if let Some(f) = handle.stderr.as_mut() {
            while drain_into(f, buf_stderr, limits.max_stderr_length)? > 0 {}
        }
    }

    Ok(stat)
}

/// Runs a command with a timeout, capturing both stdout and stderr. The
/// command gets a closed stdin.
/// On success, returns code, stdout, and stderr. A non-zero exit code is not
/// an error; callers decide what a failed run means to them.
///
/// ```
/// use chartagent::utils::{run_with_timeout, CommandLimits};
///
/// let ret = run_with_timeout(["echo", "foo"], CommandLimits::default()).unwrap();
/// assert_eq!(ret.stdout, "foo\n");
/// ```
pub fn run_with_timeout<S: AsRef<str>, CmdList: AsRef<[S]>>(
    cmd: CmdList,
    limits: CommandLimits,
) -> Result<CommandOutput, Error> {
    let os_cmd: Vec<OsString> = cmd
        .as_ref()
        .iter()
        .map(|s| OsString::from(s.as_ref()))
        .collect();

    let mut handle = Popen::create(
        &os_cmd,
        PopenConfig {
            stdin: Redirection::Pipe,
            stdout: Redirection::Pipe,
            stderr: Redirection::Pipe,
            ..Default::default()
        },
    )
    .inspect_err(|e| log::warn!("Could not create Popen process: {e}"))?;

    // The child reads EOF on stdin instead of waiting for input.
    drop(handle.stdin.take());

    let mut buf_stdout: Vec<u8> = vec![];
    let mut buf_stderr: Vec<u8> = vec![];

    let deadline = SystemTime::now()
        .checked_add(limits.timeout)
        .unwrap_or_else(SystemTime::now);

    let wait_result = collect_until_exit(
        &mut handle,
        &mut buf_stdout,
        &mut buf_stderr,
        deadline,
        &limits,
    )
    .inspect_err(|e| {
        log::warn!("(Terminating process) Runtime error when waiting for it to finish: {e}");
        handle
            .kill()
            .unwrap_or_else(|e| log::error!("Could not kill process: {e}"));
    })?;

    let stdout = String::from_utf8_lossy(buf_stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(buf_stderr.as_slice()).into_owned();

    match wait_result {
        Some(ExitStatus::Exited(ucode)) => Ok(CommandOutput {
            code: ucode as i32,
            stdout,
            stderr,
        }),
        Some(ExitStatus::Signaled(sig)) => Err(format!("Terminated by signal {sig}").into()),
        Some(ExitStatus::Other(v)) => Err(format!("Unknown exit status {v}").into()),
        Some(ExitStatus::Undetermined) => Err("Undetermined error".into()),
        None => {
            handle
                .kill()
                .unwrap_or_else(|e| log::warn!("Could not kill timed out process: {e}"));
            Err(Error::SyscommandTimeoutError {
                stdout: Some(stdout),
                stderr: Some(stderr),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asserting::prelude::*;

    #[test]
    fn test_path_join() {
        assert_that!(path_join("foo", "bar")).has_value("foo/bar");
        assert_that!(path_join("/foo", "bar")).has_value("/foo/bar");
        assert_that!(path_join("/foo", "/bar")).has_value("/bar");
        assert_that!(path_join("libs", "llama-cli")).has_value("libs/llama-cli");
    }

    #[test]
    fn test_path_absolute_parent() {
        assert_that!(path_absolute_parent("/srv/app/settings.toml")).has_value("/srv/app");
    }

    #[test]
    fn test_run_simple() {
        let ret = run_with_timeout(["echo", "foo"], CommandLimits::default());
        assert_that!(&ret).is_ok();
        assert_that!(&ret)
            .ok()
            .mapping(|s| &s.stdout)
            .is_equal_to("foo\n");
    }

    #[test]
    fn test_run_closes_stdin() {
        let limits = CommandLimits {
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let ret = run_with_timeout(["cat"], limits).unwrap();
        assert_that!(ret.code).is_equal_to(0);
        assert_that!(ret.stdout).is_equal_to("");
    }

    #[test]
    fn test_run_missing_executable() {
        let ret = run_with_timeout(["/nonexistent/llama-cli"], CommandLimits::default());
        assert_that!(&ret)
            .err()
            .satisfies(|e| matches!(e, Error::PopenError(_)));
    }

    #[test]
    fn test_run_captures_stderr_and_code() {
        let ret = run_with_timeout(
            ["bash", "-c", "echo oops 1>&2; exit 3"],
            CommandLimits::default(),
        )
        .unwrap();
        assert_that!(ret.code).is_equal_to(3);
        assert_that!(ret.stderr).is_equal_to("oops\n");
        assert_that!(ret.stdout).is_equal_to("");
    }

    #[test]
    fn test_run_lots_of_output() {
        let ret = run_with_timeout(
            [
                "bash",
                "-c",
                "for i in $(seq 1 400); do echo 0123456789qwerty; done",
            ],
            CommandLimits {
                max_stdout_length: 1024 * 1024,
                ..Default::default()
            },
        );
        assert_that!(&ret)
            .ok()
            .mapping(|s| &s.stdout)
            .is_equal_to(&"0123456789qwerty\n".repeat(400));
    }

    #[test]
    fn test_run_output_limit() {
        let ret = run_with_timeout(
            ["bash", "-c", "for i in $(seq 1 400); do echo 0123456789qwerty; done"],
            CommandLimits {
                max_stdout_length: 100,
                ..Default::default()
            },
        );
        assert_that!(&ret).err().satisfies(|e| match e {
            Error::SyscommandOutputLimitExceededError(100) => true,
            _ => false,
        });
    }

    #[test]
    fn test_run_with_timeout() {
        let ret = run_with_timeout(
            ["sleep", "2"],
            CommandLimits {
                timeout: Duration::from_secs(1),
                ..Default::default()
            },
        );
        assert_that!(&ret).is_err();
        assert_that!(&ret).err().satisfies(|e| match e {
            Error::SyscommandTimeoutError { .. } => true,
            _ => false,
        });
    }
}

use crate::error::Error;
use crate::error::Error::Waitpid;
use nix::sys;
use nix::sys::personality::Persona;
use nix::sys::ptrace::Options;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use os_pipe::{PipeReader, PipeWriter};
use std::marker::PhantomData;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

/// Subordinate process state.
pub trait State {}

/// Process spawned and attached with `ptrace`.
pub struct Installed;

impl State for Installed {}

/// Process prepared for instantiation.
pub struct Template;

impl State for Template {}

/// The subordinate child process.
///
/// Starts life as a `Child<Template>` holding the launch parameters; `install`
/// forks it under trace and yields a `Child<Installed>` stopped at the first
/// exec trap.
pub struct Child<S: State> {
    pub program: PathBuf,
    args: Vec<String>,
    stdout: PipeWriter,
    stderr: PipeWriter,
    pid: Option<Pid>,
    _p: PhantomData<S>,
}

/// Reader ends of the subordinate stdout/stderr pipes, handed to the caller.
pub struct OutputPipes {
    pub stdout: PipeReader,
    pub stderr: PipeReader,
}

impl Child<Template> {
    /// Create a new process template, the process itself is not started.
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(Child<Template>, OutputPipes), Error> {
        let (stdout_reader, stdout_writer) = os_pipe::pipe()?;
        let (stderr_reader, stderr_writer) = os_pipe::pipe()?;
        Ok((
            Child {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
                stdout: stdout_writer,
                stderr: stderr_writer,
                pid: None,
                _p: PhantomData,
            },
            OutputPipes {
                stdout: stdout_reader,
                stderr: stderr_reader,
            },
        ))
    }

    /// Fork the subordinate under trace.
    ///
    /// The child disables address-space randomization, requests tracing and
    /// execs the target; the parent consumes the initial stop and sets the
    /// ptrace event options. On return the subordinate is stopped at the exec
    /// trap.
    pub fn install(self) -> Result<Child<Installed>, Error> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(self.stdout.try_clone()?)
            .stderr(self.stderr.try_clone()?);

        unsafe {
            cmd.pre_exec(move || {
                sys::personality::set(Persona::ADDR_NO_RANDOMIZE)?;
                sys::ptrace::traceme()?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(self.program.clone())
            } else {
                Error::IO(e)
            }
        })?;
        let pid = Pid::from_raw(child.id() as i32);

        // traceme turns the exec into a SIGTRAP stop
        crate::subordinate::claim_adapter_thread();
        waitpid(pid, Some(WaitPidFlag::WSTOPPED)).map_err(Waitpid)?;
        sys::ptrace::setoptions(
            pid,
            Options::PTRACE_O_TRACECLONE
                | Options::PTRACE_O_TRACEFORK
                | Options::PTRACE_O_TRACEVFORK
                | Options::PTRACE_O_TRACEEXEC
                | Options::PTRACE_O_TRACEEXIT,
        )
        .map_err(Error::Ptrace)?;

        Ok(Child {
            program: self.program,
            args: self.args,
            stdout: self.stdout,
            stderr: self.stderr,
            pid: Some(pid),
            _p: PhantomData,
        })
    }
}

impl Child<Installed> {
    /// Return the subordinate main thread pid.
    pub fn pid(&self) -> Pid {
        self.pid.expect("installed child always has a pid")
    }
}

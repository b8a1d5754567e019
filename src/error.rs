use crate::address::FileAddress;
use nix::unistd::Pid;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- configuration errors --------------------------------------
    #[error("invalid binary path: {0}")]
    InvalidBinaryPath(PathBuf),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("file is empty")]
    FileEmpty,
    #[error(transparent)]
    IO(#[from] std::io::Error),

    // --------------------------------- format errors ---------------------------------------------
    #[error("invalid ELF magic")]
    InvalidElfMagic,
    #[error("invalid ELF version")]
    InvalidElfVersion,
    #[error("invalid ELF file: {0}")]
    InvalidElfFile(#[from] object::Error),
    #[error("invalid DWARF information: {0}")]
    InvalidDwarfInfo(#[from] gimli::Error),
    #[error("unsupported DWARF version {0}")]
    InvalidDwarfVersion(u16),
    #[error("no compile unit with a supported language")]
    LanguageUnsupported,

    // --------------------------------- debugger entity not found ---------------------------------
    #[error("section \"{0}\" not found")]
    SectionNotFound(&'static str),
    #[error("source place not found at address {0}")]
    PlaceNotFound(FileAddress),
    #[error("there are no suitable places for this request")]
    NoSuitablePlace,
    #[error("function not found at address {0}")]
    FunctionNotFound(FileAddress),
    #[error("breakpoint {0} not found")]
    BreakpointNotFound(u32),
    #[error("unknown dwarf register {0}")]
    RegisterNotFound(u16),

    // --------------------------------- expression errors -----------------------------------------
    #[error("invalid location expression: {0}")]
    InvalidLocationExpression(&'static str),
    #[error("unexpected value: {0}")]
    UnexpectedValue(&'static str),
    #[error("unexpected empty optional: {0}")]
    UnexpectedOptional(&'static str),

    // --------------------------------- syscall errors --------------------------------------------
    #[error("process {0} does not exist")]
    ProcessDoesNotExist(Pid),
    #[error("waitpid syscall error: {0}")]
    Waitpid(nix::Error),
    #[error("ptrace syscall error: {0}")]
    Ptrace(nix::Error),
    #[error("{0} syscall error: {1}")]
    Syscall(&'static str, nix::Error),

    // --------------------------------- unwind errors ---------------------------------------------
    #[error("unwind: no frame description entry covers the address")]
    UnwindNoFde,
    #[error("unwind: register {0} has no recoverable value")]
    UnwindRegisterUnavailable(u16),

    // --------------------------------- timing errors ---------------------------------------------
    #[error("operation timed out")]
    Timeout,
    #[error("condition was not met before the deadline")]
    ConditionTimeout,
    #[error("maximum iteration count reached")]
    MaxIterationsReached,

    // --------------------------------- controller errors -----------------------------------------
    #[error("symbols are not loaded")]
    TargetNotLoaded,
    #[error("subordinate is not launched")]
    SubordinateNotLaunched,
    #[error("subordinate already launched")]
    SubordinateAlreadyLaunched,
    #[error("subordinate is not paused")]
    SubordinateNotPaused,
    #[error("debugger is shutting down")]
    ShuttingDown,
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "spyglass", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "spyglass", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}

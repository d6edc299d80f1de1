//! Error type.
//!
//! This is the shared error type for the whole crate. GPU resource failures
//! (shader compilation, program linking, incomplete framebuffers) are the
//! only recoverable errors; callers usually treat them as fatal. Violated
//! preconditions are asserted, and GL errors caught between pipeline stages
//! are logged rather than returned.

use std::path::PathBuf;
use std::{error, fmt, io};

use crate::api::types::GLenum;

#[derive(Debug)]
pub enum Error {
    /// A shader source file could not be read.
    ShaderIo { path: PathBuf, error: io::Error },
    /// A shader failed to compile; carries the GL info log.
    ShaderCompile { path: PathBuf, log: String },
    /// A program failed to link; carries the GL info log.
    ProgramLink { log: String },
    /// A framebuffer did not reach completeness; carries the GL status.
    IncompleteFramebuffer(GLenum),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ShaderIo { path, error } => {
                write!(f, "failed to read shader {:?}: {}", path, error)
            }
            Error::ShaderCompile { path, log } => {
                write!(f, "failed to compile shader {:?}: {}", path, log)
            }
            Error::ProgramLink { log } => write!(f, "failed to link program: {}", log),
            Error::IncompleteFramebuffer(status) => {
                write!(f, "framebuffer incomplete (status {:#06x})", status)
            }
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = ::std::result::Result<T, Error>;

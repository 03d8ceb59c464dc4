// ghinstall-core/src/errors.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the repository and filesystem helpers.
///
/// The command runner never returns these: command failures are recorded in
/// [`crate::CommandResult`] instead.
#[derive(Error, Debug)]
pub enum InstallError {
    /// Filesystem error while preparing or reading a checkout.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by libgit2.
    #[error("Git Error: {0}")]
    Git(#[from] git2::Error),

    /// A caller-supplied directory holds something other than the requested repository.
    #[error("Directory {} is not empty and is not a checkout of the requested repository", .0.display())]
    DirectoryOccupied(PathBuf),
}

pub type Result<T, E = InstallError> = std::result::Result<T, E>;

//! Error types for the install pipeline.

use std::io;

use thiserror::Error;

/// Failure of one step of the install pipeline.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The tool name is not configured.
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    /// The release index was unreachable or has no release.
    #[error("Version lookup for {repo} failed: {message}")]
    VersionLookupFailed { repo: String, message: String },

    /// Transport error, non-success response or timeout while downloading.
    #[error("Download of {url} failed: {message}")]
    DownloadFailed { url: String, message: String },

    /// Corrupt or unsupported archive.
    #[error("Extraction failed: {0}")]
    ExtractFailed(String),

    /// The archive does not contain the expected executable.
    #[error("Executable '{0}' not found in release archive")]
    ExecutableNotFound(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl InstallError {
    pub fn version_lookup(repo: impl Into<String>, message: impl ToString) -> Self {
        Self::VersionLookupFailed {
            repo: repo.into(),
            message: message.to_string(),
        }
    }

    pub fn download(url: impl Into<String>, message: impl ToString) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn extract(message: impl ToString) -> Self {
        Self::ExtractFailed(message.to_string())
    }
}

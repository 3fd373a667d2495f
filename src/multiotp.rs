//! Wrapper around the multiOTP command line tool.
//!
//! The tool exits non-zero on success: every command reports its result as an
//! exit code, so "exit status 17" is how `-urllink` says the link was created.
//! Each method below lists the codes it accepts and maps the rest to
//! [`MultiOtpError`].
//!
//! | code | meaning                              |
//! |------|--------------------------------------|
//! | 12   | INFO: User successfully deleted      |
//! | 17   | INFO: UrlLink successfully created   |
//! | 19   | INFO: Requested operation successfully done |
//! | 21   | ERROR: User doesn't exist            |

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use thiserror::Error;
use tokio::{process::Command, time::timeout};
use tracing::{debug, instrument};

pub const EXIT_OK: i32 = 0;
pub const EXIT_USER_DELETED: i32 = 12;
pub const EXIT_URL_LINK_CREATED: i32 = 17;
pub const EXIT_OPERATION_DONE: i32 = 19;
pub const EXIT_USER_NOT_FOUND: i32 = 21;

const ARG_URL_LINK: &str = "-urllink";
const ARG_DELETE: &str = "-delete";
const ARG_LDAP_USERS_SYNC: &str = "-ldap-users-sync";

#[derive(Debug, Error)]
pub enum MultiOtpError {
    #[error("failed to run {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("multiotp {command} timed out after {}s", .timeout.as_secs())]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },
    #[error("multiotp {command} was terminated by a signal")]
    Terminated { command: &'static str },
    #[error("{0} doesn't exist")]
    UserNotFound(String),
    #[error("multiotp {command} exited with status {code}: {stderr}")]
    UnexpectedExit {
        command: &'static str,
        code: i32,
        stderr: String,
    },
    #[error("multiotp output doesn't match '^otpauth:', output: {0}")]
    UnexpectedOutput(String),
    #[error("invalid multiotp user name: {0:?}")]
    InvalidUser(String),
}

/// Result of `-delete`; a missing user is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug)]
struct Completed {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl Completed {
    fn check(&self, command: &'static str, accepted: &[i32]) -> Result<i32, MultiOtpError> {
        match self.code {
            Some(code) if accepted.contains(&code) => Ok(code),
            Some(code) => Err(MultiOtpError::UnexpectedExit {
                command,
                code,
                stderr: self.stderr.clone(),
            }),
            None => Err(MultiOtpError::Terminated { command }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultiOtp {
    bin: PathBuf,
    timeout: Duration,
}

impl MultiOtp {
    #[must_use]
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Whether the configured binary exists on disk.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.bin.is_file()
    }

    /// Get the `otpauth://` URL of the user's token.
    ///
    /// # Errors
    /// Returns [`MultiOtpError::UserNotFound`] on exit code 21, and an error for
    /// any other exit code than 0/17 or output not starting with `otpauth:`.
    #[instrument(skip(self))]
    pub async fn url_link(&self, user: &str) -> Result<String, MultiOtpError> {
        check_user(user)?;

        let completed = self.run(ARG_URL_LINK, &[ARG_URL_LINK, user]).await?;
        if completed.code == Some(EXIT_USER_NOT_FOUND) {
            return Err(MultiOtpError::UserNotFound(user.to_string()));
        }
        completed.check(ARG_URL_LINK, &[EXIT_OK, EXIT_URL_LINK_CREATED])?;

        let url = completed.stdout.trim();
        if !url.starts_with("otpauth:") {
            return Err(MultiOtpError::UnexpectedOutput(url.to_string()));
        }

        Ok(url.to_string())
    }

    /// Delete the user's token.
    ///
    /// # Errors
    /// Returns an error for any exit code other than 0, 12, 19 or 21.
    #[instrument(skip(self))]
    pub async fn delete(&self, user: &str) -> Result<DeleteOutcome, MultiOtpError> {
        check_user(user)?;

        let completed = self.run(ARG_DELETE, &[ARG_DELETE, user]).await?;
        let code = completed.check(
            ARG_DELETE,
            &[
                EXIT_OK,
                EXIT_USER_DELETED,
                EXIT_OPERATION_DONE,
                EXIT_USER_NOT_FOUND,
            ],
        )?;

        if code == EXIT_USER_NOT_FOUND {
            Ok(DeleteOutcome::NotFound)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }

    /// Resynchronise multiOTP users from LDAP.
    ///
    /// # Errors
    /// Returns an error for any exit code other than 0 or 19.
    #[instrument(skip(self))]
    pub async fn sync_ldap_users(&self) -> Result<(), MultiOtpError> {
        let completed = self.run(ARG_LDAP_USERS_SYNC, &[ARG_LDAP_USERS_SYNC]).await?;
        completed.check(ARG_LDAP_USERS_SYNC, &[EXIT_OK, EXIT_OPERATION_DONE])?;
        Ok(())
    }

    /// Reissue the user's token: delete it, then let the LDAP sync create a new
    /// one with a fresh seed.
    ///
    /// # Errors
    /// Returns the first failing step's error.
    pub async fn reissue(&self, user: &str) -> Result<DeleteOutcome, MultiOtpError> {
        let outcome = self.delete(user).await?;
        debug!(user, ?outcome, "multiotp user deleted, resyncing");
        self.sync_ldap_users().await?;
        Ok(outcome)
    }

    async fn run(&self, command: &'static str, args: &[&str]) -> Result<Completed, MultiOtpError> {
        let spawn_error = |source| MultiOtpError::Spawn {
            path: self.bin.display().to_string(),
            source,
        };

        let child = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        // Dropping the child on timeout kills it.
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| MultiOtpError::Timeout {
                command,
                timeout: self.timeout,
            })?
            .map_err(spawn_error)?;

        let completed = Completed {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        debug!(command, code = ?completed.code, "multiotp finished");

        Ok(completed)
    }
}

// A leading dash would be parsed as another multiotp option.
fn check_user(user: &str) -> Result<(), MultiOtpError> {
    if user.trim().is_empty() || user.starts_with('-') {
        return Err(MultiOtpError::InvalidUser(user.to_string()));
    }
    Ok(())
}

//! Error taxonomy, mapped to HTTP status codes.
//!
//! Mirrors the exception hierarchy of the original service one for one:
//! every leaf carries a fixed `code`/`title` pair and a client-supplied
//! message. `code`/`title` are never secret; `message` is hidden behind
//! `debug_mode` for codes 401 and 500 (see `Error::client_message`).

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    // Specs
    #[error("{0}")]
    ActionSpecs(String),
    #[error("{0}")]
    LogSpecs(String),
    #[error("{0}")]
    RepoSpecs(String),
    #[error("{0}")]
    SchemaSpecs(String),
    #[error("{0}")]
    Specs(String),

    // Plugins
    #[error("{0}")]
    Plugin(String),
    #[error("{0}")]
    Action(String),
    #[error("{0}")]
    Log(String),
    #[error("{0}")]
    ActionClient(String),

    // Request
    #[error("{0}")]
    Request(String),
    #[error("{0}")]
    RequestConflict(String),
    #[error("{0}")]
    RequestForbidden(String),
    #[error("{0}")]
    RequestNotFound(String),

    // Repo
    #[error("{0}")]
    Repo(String),
    #[error("{0}")]
    RepoTimeout(String),
    #[error("{0}")]
    RepoClient(String),
    #[error("{0}")]
    RepoConflict(String),
    #[error("{0}")]
    RepoForbidden(String),
    #[error("{0}")]
    RepoNotFound(String),

    // Others
    #[error("{0}")]
    Server(String),
    #[error("{0}")]
    Auth(String),
}

impl Error {
    pub fn code(&self) -> u16 {
        match self {
            Error::ActionSpecs(_)
            | Error::LogSpecs(_)
            | Error::RepoSpecs(_)
            | Error::SchemaSpecs(_)
            | Error::Specs(_)
            | Error::Plugin(_)
            | Error::Action(_)
            | Error::Log(_)
            | Error::Repo(_)
            | Error::RepoTimeout(_)
            | Error::Server(_) => 500,
            Error::ActionClient(_) | Error::Request(_) | Error::RepoClient(_) => 400,
            Error::Auth(_) => 401,
            Error::RequestForbidden(_) | Error::RepoForbidden(_) => 403,
            Error::RequestNotFound(_) | Error::RepoNotFound(_) => 404,
            Error::RequestConflict(_) | Error::RepoConflict(_) => 409,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Error::ActionSpecs(_)
            | Error::LogSpecs(_)
            | Error::RepoSpecs(_)
            | Error::SchemaSpecs(_)
            | Error::Specs(_) => "Error in Specification",
            Error::Plugin(_) => "Error in Plugin",
            Error::Action(_) | Error::ActionClient(_) => "Action could not be executed",
            Error::Log(_) => "Logs could not be loaded",
            Error::Request(_) => "Not Allowed",
            Error::RequestConflict(_) => "Conflict",
            Error::RequestForbidden(_) => "Forbidden",
            Error::RequestNotFound(_) => "Not Found",
            Error::Repo(_) | Error::RepoTimeout(_) => "Accessing Data Repository failed",
            Error::RepoClient(_) => "Not Allowed",
            Error::RepoConflict(_) => "Conflict",
            Error::RepoForbidden(_) => "Forbidden",
            Error::RepoNotFound(_) => "Not Found",
            Error::Server(_) => "Server Error",
            Error::Auth(_) => "Login Failed",
        }
    }

    pub const DEFAULT_MESSAGE: &'static str =
        "Please try again later or contact your administrator if the error does not disappear.";

    /// Message shown to the client: the real message, unless this is a
    /// 401/500 and the service is not running in debug mode.
    pub fn client_message(&self, debug_mode: bool) -> String {
        let code = self.code();
        if debug_mode || (code != 401 && code != 500) {
            self.to_string()
        } else {
            Self::DEFAULT_MESSAGE.to_string()
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.code() == 500
    }

    // Convenience constructors, mirroring the Python subclass call sites.
    pub fn action_specs(msg: impl Into<String>) -> Self {
        Self::ActionSpecs(msg.into())
    }
    pub fn log_specs(msg: impl Into<String>) -> Self {
        Self::LogSpecs(msg.into())
    }
    pub fn repo_specs(msg: impl Into<String>) -> Self {
        Self::RepoSpecs(msg.into())
    }
    pub fn schema_specs(msg: impl Into<String>) -> Self {
        Self::SchemaSpecs(msg.into())
    }
    pub fn specs(msg: impl Into<String>) -> Self {
        Self::Specs(msg.into())
    }
    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::Plugin(msg.into())
    }
    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action(msg.into())
    }
    pub fn action_client(msg: impl Into<String>) -> Self {
        Self::ActionClient(msg.into())
    }
    pub fn log(msg: impl Into<String>) -> Self {
        Self::Log(msg.into())
    }
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }
    pub fn request_conflict(msg: impl Into<String>) -> Self {
        Self::RequestConflict(msg.into())
    }
    pub fn request_forbidden(msg: impl Into<String>) -> Self {
        Self::RequestForbidden(msg.into())
    }
    pub fn request_not_found(msg: impl Into<String>) -> Self {
        Self::RequestNotFound(msg.into())
    }
    pub fn repo(msg: impl Into<String>) -> Self {
        Self::Repo(msg.into())
    }
    pub fn repo_timeout(msg: impl Into<String>) -> Self {
        Self::RepoTimeout(msg.into())
    }
    pub fn repo_client(msg: impl Into<String>) -> Self {
        Self::RepoClient(msg.into())
    }
    pub fn repo_conflict(msg: impl Into<String>) -> Self {
        Self::RepoConflict(msg.into())
    }
    pub fn repo_forbidden(msg: impl Into<String>) -> Self {
        Self::RepoForbidden(msg.into())
    }
    pub fn repo_not_found(msg: impl Into<String>) -> Self {
        Self::RepoNotFound(msg.into())
    }
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(Error::auth("x").code(), 401);
        assert_eq!(Error::request_conflict("x").code(), 409);
        assert_eq!(Error::repo_not_found("x").code(), 404);
        assert_eq!(Error::repo_client("x").code(), 400);
        assert_eq!(Error::server("x").code(), 500);
    }

    #[test]
    fn debug_mode_gates_message() {
        let err = Error::server("secret detail");
        assert_eq!(err.client_message(false), Error::DEFAULT_MESSAGE);
        assert_eq!(err.client_message(true), "secret detail");

        let err = Error::request_not_found("entity missing");
        assert_eq!(err.client_message(false), "entity missing");
    }
}

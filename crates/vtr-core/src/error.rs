use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("--testdir is required")]
    MissingTestDir,

    #[error("malformed --interpreter mapping '{0}': expected ext:script")]
    InvalidInterpreterMapping(String),

    #[error("bad regex '{pattern}': {source}")]
    BadRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read directory '{path}': {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create output directory '{path}': {source}")]
    OutdirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fork test child: {0}")]
    ForkFailed(#[source] std::io::Error),

    #[error("failed to install signal handlers: {0}")]
    SignalSetup(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_missing_testdir() {
        assert_eq!(
            RunnerError::MissingTestDir.to_string(),
            "--testdir is required"
        );
    }

    #[test]
    fn test_display_invalid_interpreter_mapping() {
        let err = RunnerError::InvalidInterpreterMapping("py".into());
        assert_eq!(
            err.to_string(),
            "malformed --interpreter mapping 'py': expected ext:script"
        );
    }

    #[test]
    fn test_display_directory_read() {
        let err = RunnerError::DirectoryRead {
            path: PathBuf::from("/no/such/dir"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().starts_with("failed to read directory"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RunnerError>();
    }
}

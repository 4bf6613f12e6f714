use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),

    #[error("Unknown mirror: '{0}'. Run with --list to see available mirrors.")]
    UnknownMirror(String),

    #[error("Invalid index url: '{0}'")]
    InvalidUrl(String),

    #[error("Probe of {target} timed out after {secs}s")]
    ProbeTimeout { target: String, secs: u64 },

    #[error("{tool} is not installed. {hint}")]
    ToolNotInstalled {
        tool: &'static str,
        hint: &'static str,
    },

    #[error("{path:?} already exists with a different mirror. Rerun with -y to replace it.")]
    ConfigBlocked { path: PathBuf },

    #[error("Permission denied while writing {path:?}. Try again with: {retry}")]
    WritePermission { path: PathBuf, retry: String },

    #[error("Command `{command}` failed with exit code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("Invalid mirror catalog: {0}")]
    Catalog(String),

    #[error("No backup of {0:?} found.")]
    NoBackup(PathBuf),

    #[error("{0} keeps its settings in its own store; there is no file to restore.")]
    RestoreUnsupported(&'static str),
}

impl MirrorError {
    /// 对应的进程退出码，子命令的退出码原样传递
    pub fn exit_code(&self) -> u8 {
        match self {
            MirrorError::CommandFailed { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(1),
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let failed = MirrorError::CommandFailed {
            command: "pip config set".to_string(),
            code: 2,
        };
        assert_eq!(failed.exit_code(), 2);

        let signalled = MirrorError::CommandFailed {
            command: "pip".to_string(),
            code: -1,
        };
        assert_eq!(signalled.exit_code(), 1);

        assert_eq!(MirrorError::UnknownMirror("x".into()).exit_code(), 1);
    }
}

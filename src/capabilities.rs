//! 运行环境探测
//!
//! 与版本和平台相关的判断都在这里做一次，写入模块只看结果标志

use crate::utils::command_output;
use directories::BaseDirs;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// pip 10.1 开始支持 `pip config set`
const PIP_CONFIG_COMMAND_SINCE: (u32, u32, u32) = (10, 1, 0);

/// poetry 的 `config.toml` 所在目录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDirTemplate {
    /// `$XDG_CONFIG_HOME/pypoetry` 或 `~/.config/pypoetry`
    Xdg,
    /// `~/Library/Preferences/pypoetry` (macOS 上的 poetry 1.x)
    MacPreferences,
    /// `~/Library/Application Support/pypoetry` (macOS 上的 poetry 2.x)
    MacApplicationSupport,
    /// `%APPDATA%\pypoetry`
    WindowsAppData,
}

impl ConfigDirTemplate {
    pub fn resolve(self, dirs: &BaseDirs) -> PathBuf {
        let home = dirs.home_dir();
        match self {
            ConfigDirTemplate::Xdg => xdg_config_home(home).join("pypoetry"),
            ConfigDirTemplate::MacPreferences => {
                home.join("Library").join("Preferences").join("pypoetry")
            }
            ConfigDirTemplate::MacApplicationSupport => home
                .join("Library")
                .join("Application Support")
                .join("pypoetry"),
            ConfigDirTemplate::WindowsAppData => dirs.config_dir().join("pypoetry"),
        }
    }
}

/// `$XDG_CONFIG_HOME`，未设置时为 `~/.config`
pub fn xdg_config_home(home: &Path) -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(|| home.join(".config"))
}

#[derive(Debug, Clone)]
pub struct Capabilities {
    pub is_windows: bool,
    pub is_root: bool,
    /// CI 或容器环境：通常不允许 raw ICMP
    pub restricted_network: bool,
    pub supports_direct_config_command: bool,
    pub poetry_dir: ConfigDirTemplate,
}

impl Capabilities {
    pub async fn detect() -> Self {
        let is_windows = cfg!(target_os = "windows");
        let is_macos = cfg!(target_os = "macos");

        let pip_version = command_output(&["pip", "--version"])
            .await
            .and_then(|s| parse_pip_version(&s));
        let poetry_major = command_output(&["poetry", "--version"])
            .await
            .and_then(|s| parse_poetry_major(&s));
        let is_root = !is_windows
            && command_output(&["id", "-u"]).await.as_deref().map(str::trim) == Some("0");

        let caps = Self {
            is_windows,
            is_root,
            restricted_network: is_restricted_network(),
            supports_direct_config_command: pip_version
                .is_some_and(|v| v >= PIP_CONFIG_COMMAND_SINCE),
            poetry_dir: poetry_dir_template(is_windows, is_macos, poetry_major),
        };
        debug!(?caps, ?pip_version, ?poetry_major, "detected capabilities");
        caps
    }
}

pub fn poetry_dir_template(
    is_windows: bool,
    is_macos: bool,
    poetry_major: Option<u32>,
) -> ConfigDirTemplate {
    if is_windows {
        ConfigDirTemplate::WindowsAppData
    } else if is_macos {
        // 新安装的都是 2.x，版本未知时按 2.x 处理
        match poetry_major {
            Some(major) if major < 2 => ConfigDirTemplate::MacPreferences,
            _ => ConfigDirTemplate::MacApplicationSupport,
        }
    } else {
        ConfigDirTemplate::Xdg
    }
}

/// 解析 `pip 23.3.1 from /usr/lib/python3/dist-packages/pip (python 3.12)`
pub fn parse_pip_version(output: &str) -> Option<(u32, u32, u32)> {
    let re = Regex::new(r"(?m)^pip (\d+)\.(\d+)(?:\.(\d+))?").ok()?;
    let caps = re.captures(output)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok());
    Some((part(1)?, part(2)?, part(3).unwrap_or(0)))
}

/// 解析 `Poetry (version 1.8.3)` 或旧版的 `Poetry version 1.1.13`
pub fn parse_poetry_major(output: &str) -> Option<u32> {
    let re = Regex::new(r"(?i)poetry.*?(\d+)\.\d+").ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

fn is_restricted_network() -> bool {
    ["CI", "GITHUB_ACTIONS", "GITLAB_CI"]
        .iter()
        .any(|v| std::env::var_os(v).is_some())
        || Path::new("/.dockerenv").exists()
        || Path::new("/run/.containerenv").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pip_version() {
        assert_eq!(
            parse_pip_version("pip 23.3.1 from /usr/lib/python3/dist-packages/pip (python 3.12)"),
            Some((23, 3, 1))
        );
        assert_eq!(parse_pip_version("pip 24.0 from /x (python 3.11)"), Some((24, 0, 0)));
        assert_eq!(parse_pip_version("command not found"), None);
    }

    #[test]
    fn test_config_command_gate() {
        let gate = |s: &str| parse_pip_version(s).is_some_and(|v| v >= PIP_CONFIG_COMMAND_SINCE);
        assert!(!gate("pip 9.0.3 from /x"));
        assert!(!gate("pip 10.0.1 from /x"));
        assert!(gate("pip 10.1 from /x"));
        assert!(gate("pip 24.2 from /x"));
    }

    #[test]
    fn test_parse_poetry_major() {
        assert_eq!(parse_poetry_major("Poetry (version 1.8.3)"), Some(1));
        assert_eq!(parse_poetry_major("Poetry (version 2.1.2)\n"), Some(2));
        assert_eq!(parse_poetry_major("Poetry version 1.1.13"), Some(1));
        assert_eq!(parse_poetry_major(""), None);
    }

    #[test]
    fn test_poetry_dir_template() {
        assert_eq!(poetry_dir_template(true, false, Some(1)), ConfigDirTemplate::WindowsAppData);
        assert_eq!(poetry_dir_template(false, true, Some(1)), ConfigDirTemplate::MacPreferences);
        assert_eq!(
            poetry_dir_template(false, true, Some(2)),
            ConfigDirTemplate::MacApplicationSupport
        );
        assert_eq!(
            poetry_dir_template(false, true, None),
            ConfigDirTemplate::MacApplicationSupport
        );
        assert_eq!(poetry_dir_template(false, false, Some(1)), ConfigDirTemplate::Xdg);
    }
}

use crate::document::{ConfigDocument, Lines};
use crate::error::Result;
use crate::sources::Scope;
use crate::traits::ConfigWriter;
use crate::types::{ApplyOutcome, ExtraIndexEntry, ResolvedUrl, ToolTarget};
use async_trait::async_trait;
use directories::BaseDirs;
use std::path::PathBuf;

const GLOBAL: &str = "[global]";
const INSTALL: &str = "[install]";

/// Writes `pip.conf` / `pip.ini` directly, for pip versions without `pip config`.
pub struct PipIniWriter {
    scope: Scope,
    is_windows: bool,
    dry_run: bool,
    custom_path: Option<PathBuf>,
}

impl PipIniWriter {
    pub fn new(scope: Scope, is_windows: bool, dry_run: bool) -> Self {
        Self {
            scope,
            is_windows,
            dry_run,
            custom_path: None,
        }
    }

    #[cfg(test)]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            scope: Scope::User,
            is_windows: false,
            dry_run: false,
            custom_path: Some(path),
        }
    }

    fn path(&self) -> PathBuf {
        if let Some(ref path) = self.custom_path {
            return path.clone();
        }

        let home = BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        if self.is_windows {
            // Windows: %USERPROFILE%\pip\pip.ini
            home.join("pip").join("pip.ini")
        } else if self.scope == Scope::System {
            PathBuf::from("/etc").join("pip.conf")
        } else {
            home.join(".pip").join("pip.conf")
        }
    }
}

fn trusted_hosts(url: &ResolvedUrl, extra: Option<&ExtraIndexEntry>) -> Vec<String> {
    std::iter::once(url.host.as_str())
        .chain(extra.filter(|e| e.insecure).map(|e| e.host.as_str()))
        .map(String::from)
        .collect()
}

/// Existing trusted hosts followed by any wanted ones still missing.
fn merge_hosts(existing: Option<&str>, hosts: Vec<String>) -> String {
    let mut merged: Vec<String> = existing
        .map(|v| v.split_whitespace().map(String::from).collect())
        .unwrap_or_default();
    for host in hosts {
        if !merged.contains(&host) {
            merged.push(host);
        }
    }
    merged.join(" ")
}

/// Content for a fresh file.
///
/// ```text
/// [global]
/// index-url = https://mirrors.cloud.tencent.com/pypi/simple/
/// [install]
/// trusted-host = mirrors.cloud.tencent.com
/// ```
pub fn render(url: &ResolvedUrl, extra: Option<&ExtraIndexEntry>) -> String {
    let mut text = format!("{}\nindex-url = {}\n", GLOBAL, url);
    if let Some(extra) = extra {
        text.push_str(&format!("extra-index-url = {}\n", extra.url));
    }
    text.push_str(&format!(
        "{}\ntrusted-host = {}\n",
        INSTALL,
        trusted_hosts(url, extra).join(" ")
    ));
    text
}

/// Set the mirror keys in existing content, leaving everything else alone.
pub fn patch(text: &str, url: &ResolvedUrl, extra: Option<&ExtraIndexEntry>) -> Result<String> {
    let mut lines = Lines::parse(text);

    let mut global = vec![("index-url", format!("index-url = {}", url))];
    if let Some(extra) = extra {
        global.push(("extra-index-url", format!("extra-index-url = {}", extra.url)));
    }
    let existing_hosts = match lines.section(INSTALL) {
        Some(range) => lines.value(range, "trusted-host")?,
        None => None,
    };
    let install = vec![(
        "trusted-host",
        format!(
            "trusted-host = {}",
            merge_hosts(existing_hosts.as_deref(), trusted_hosts(url, extra))
        ),
    )];

    for (header, entries) in [(GLOBAL, global), (INSTALL, install)] {
        for (key, line) in entries {
            match lines.section(header) {
                Some(range) => lines.set(range, key, &line)?,
                None => lines.append_block(&[header, &line]),
            }
        }
    }
    Ok(lines.render())
}

fn global_value(text: &str, key: &str) -> Result<Option<String>> {
    let lines = Lines::parse(text);
    match lines.section(GLOBAL) {
        Some(range) => lines.value(range, key),
        None => Ok(None),
    }
}

fn current_index(text: &str) -> Result<Option<String>> {
    global_value(text, "index-url")
}

/// A different index-url or extra-index-url is already configured.
fn conflicts(text: &str, url: &ResolvedUrl, extra: Option<&ExtraIndexEntry>) -> Result<bool> {
    let wanted = url.to_string();
    if current_index(text)?.is_some_and(|c| c != wanted) {
        return Ok(true);
    }
    let Some(extra) = extra else {
        return Ok(false);
    };
    let wanted_extra = extra.url.to_string();
    Ok(global_value(text, "extra-index-url")?.is_some_and(|c| c != wanted_extra))
}

#[async_trait]
impl ConfigWriter for PipIniWriter {
    fn tool(&self) -> ToolTarget {
        ToolTarget::Pip
    }

    fn requires_sudo(&self) -> bool {
        self.scope == Scope::System && !self.is_windows
    }

    fn is_installed(&self) -> bool {
        which::which("pip").is_ok()
    }

    fn config_path(&self) -> Option<PathBuf> {
        Some(self.path())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        let doc = ConfigDocument::read(&self.path()).await?;
        current_index(doc.text())
    }

    async fn apply(
        &self,
        url: &ResolvedUrl,
        extra: Option<&ExtraIndexEntry>,
        replace: bool,
    ) -> Result<ApplyOutcome> {
        let path = self.path();
        let doc = ConfigDocument::read(&path).await?;

        let new_text = match &doc {
            ConfigDocument::Absent => render(url, extra),
            ConfigDocument::Present(text) => {
                if !replace && conflicts(text, url, extra)? {
                    return Ok(ApplyOutcome::Blocked {
                        existing: text.clone(),
                    });
                }
                patch(text, url, extra)?
            }
        };

        doc.persist(&path, &new_text, self.dry_run).await
    }
}

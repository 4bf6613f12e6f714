use crate::capabilities::Capabilities;
use crate::error::{MirrorError, Result};
use crate::sources::Scope;
use crate::traits::ConfigWriter;
use crate::types::{ApplyOutcome, ExtraIndexEntry, ResolvedUrl, ToolTarget};
use crate::utils;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Writes the mirror through the tool's own `config` command.
///
/// The tool owns its store, so a differing value is simply overwritten; the
/// only no-op case is every key already holding the wanted value.
pub struct CommandWriter {
    tool: ToolTarget,
    program: String,
    scope: Scope,
    sudo: bool,
    dry_run: bool,
}

impl CommandWriter {
    pub fn pip(scope: Scope, caps: &Capabilities, dry_run: bool) -> Self {
        Self {
            tool: ToolTarget::Pip,
            program: ToolTarget::Pip.name().to_string(),
            scope,
            sudo: scope == Scope::System && !caps.is_windows && !caps.is_root,
            dry_run,
        }
    }

    pub fn pdm(dry_run: bool) -> Self {
        Self {
            tool: ToolTarget::Pdm,
            program: ToolTarget::Pdm.name().to_string(),
            scope: Scope::User,
            sudo: false,
            dry_run,
        }
    }

    #[cfg(test)]
    pub fn with_program(self, program: String) -> Self {
        Self { program, ..self }
    }

    fn index_key(&self) -> &'static str {
        match self.tool {
            ToolTarget::Pdm => "pypi.url",
            _ => "global.index-url",
        }
    }

    /// Key/value pairs that make up the mirror setting.
    fn settings(&self, url: &ResolvedUrl, extra: Option<&ExtraIndexEntry>) -> Vec<(String, String)> {
        let mut settings = vec![(self.index_key().to_string(), url.to_string())];

        match self.tool {
            ToolTarget::Pdm => {
                if !url.is_secure() {
                    settings.push(("pypi.verify_ssl".into(), "false".into()));
                }
                if let Some(extra) = extra {
                    settings.push(("pypi.extra.url".into(), extra.url.to_string()));
                    if extra.insecure {
                        settings.push(("pypi.extra.verify_ssl".into(), "false".into()));
                    }
                }
            }
            _ => {
                if let Some(extra) = extra {
                    settings.push(("global.extra-index-url".into(), extra.url.to_string()));
                }
                let trusted: Vec<&str> = std::iter::once(url)
                    .filter(|u| !u.is_secure())
                    .map(|u| u.host.as_str())
                    .chain(extra.filter(|e| e.insecure).map(|e| e.host.as_str()))
                    .collect();
                if !trusted.is_empty() {
                    settings.push(("install.trusted-host".into(), trusted.join(" ")));
                }
            }
        }
        settings
    }

    fn base(&self) -> Vec<String> {
        let mut argv: Vec<String> = vec![self.program.clone(), "config".into()];
        if self.tool == ToolTarget::Pip && self.scope == Scope::System {
            argv.push("--global".into());
        }
        argv
    }

    fn set_command(&self, key: &str, value: &str) -> Vec<String> {
        let mut argv = Vec::new();
        if self.sudo {
            argv.push("sudo".to_string());
        }
        argv.extend(self.base());
        if self.tool == ToolTarget::Pip {
            argv.push("set".into());
        }
        argv.push(key.into());
        argv.push(value.into());
        argv
    }

    fn get_command(&self, key: &str) -> Vec<String> {
        let mut argv = self.base();
        if self.tool == ToolTarget::Pip {
            argv.push("get".into());
        }
        argv.push(key.into());
        argv
    }

    async fn get(&self, key: &str) -> Option<String> {
        utils::command_output(&self.get_command(key))
            .await
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl ConfigWriter for CommandWriter {
    fn tool(&self) -> ToolTarget {
        self.tool
    }

    fn requires_sudo(&self) -> bool {
        self.sudo
    }

    fn is_installed(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn config_path(&self) -> Option<PathBuf> {
        None
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.get(self.index_key()).await)
    }

    async fn apply(
        &self,
        url: &ResolvedUrl,
        extra: Option<&ExtraIndexEntry>,
        _replace: bool,
    ) -> Result<ApplyOutcome> {
        let settings = self.settings(url, extra);

        if self.dry_run {
            for (key, value) in &settings {
                println!("--> {}", utils::render_command(&self.set_command(key, value)));
            }
            return Ok(ApplyOutcome::Planned);
        }

        if !self.is_installed() {
            return Err(MirrorError::ToolNotInstalled {
                tool: self.tool.name(),
                hint: self.tool.install_hint(),
            });
        }

        let mut changed = false;
        for (key, value) in &settings {
            if self.get(key).await.as_deref() == Some(value.as_str()) {
                debug!(tool = %self.tool, %key, "already set");
                continue;
            }
            utils::run_command(&self.set_command(key, value)).await?;
            changed = true;
        }

        Ok(if changed {
            ApplyOutcome::Done
        } else {
            ApplyOutcome::Skipped
        })
    }
}

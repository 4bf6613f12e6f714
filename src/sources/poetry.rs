use crate::capabilities::ConfigDirTemplate;
use crate::document::{toml_string, ConfigDocument};
use crate::error::{MirrorError, Result};
use crate::traits::ConfigWriter;
use crate::types::{ApplyOutcome, ExtraIndexEntry, ResolvedUrl, ToolTarget};
use crate::utils;
use async_trait::async_trait;
use directories::BaseDirs;
use std::path::PathBuf;
use tracing::debug;

pub const PLUGIN: &str = "poetry-plugin-pypi-mirror";
const SECTION: &str = "[plugins.pypi_mirror]";

/// Poetry has no global index setting of its own; the mirror goes through
/// `poetry-plugin-pypi-mirror`, which reads `[plugins.pypi_mirror]` from
/// poetry's `config.toml`.
pub struct PoetryPluginWriter {
    program: String,
    dir_template: ConfigDirTemplate,
    dry_run: bool,
    custom_path: Option<PathBuf>,
}

impl PoetryPluginWriter {
    pub fn new(dir_template: ConfigDirTemplate, dry_run: bool) -> Self {
        Self {
            program: "poetry".to_string(),
            dir_template,
            dry_run,
            custom_path: None,
        }
    }

    #[cfg(test)]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            program: "poetry".to_string(),
            dir_template: ConfigDirTemplate::Xdg,
            dry_run: false,
            custom_path: Some(path),
        }
    }

    #[cfg(test)]
    pub fn with_program(path: PathBuf, program: String) -> Self {
        Self {
            program,
            ..Self::with_path(path)
        }
    }

    fn path(&self) -> PathBuf {
        if let Some(ref path) = self.custom_path {
            return path.clone();
        }
        // poetry itself honours POETRY_CONFIG_DIR before the platform default
        let dir = std::env::var_os("POETRY_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| BaseDirs::new().map(|dirs| self.dir_template.resolve(&dirs)))
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join("config.toml")
    }

    async fn ensure_plugin(&self) -> Result<()> {
        let program = self.program.as_str();
        let listed = utils::command_output(&[program, "self", "show", "plugins"])
            .await
            .unwrap_or_default();
        if listed.contains(PLUGIN) {
            debug!("{} already installed", PLUGIN);
            return Ok(());
        }

        let install = [program, "self", "add", PLUGIN];
        if self.dry_run {
            println!("--> {}", utils::render_command(&install));
            return Ok(());
        }
        utils::run_command(&install).await
    }

    async fn write_config(&self, url: &ResolvedUrl, replace: bool) -> Result<ApplyOutcome> {
        let path = self.path();
        let doc = ConfigDocument::read(&path).await?;
        let wanted = url.to_string();
        let line = format!("url = {}", toml_string(&wanted));

        let mut lines = doc.lines();
        match lines.section(SECTION) {
            Some(range) => {
                let current = lines.value(range.clone(), "url")?;
                if !replace && current.is_some_and(|c| c != wanted) {
                    return Ok(ApplyOutcome::Blocked {
                        existing: doc.text().to_string(),
                    });
                }
                lines.set(range, "url", &line)?;
            }
            None => lines.append_block(&[SECTION, &line]),
        }

        doc.persist(&path, &lines.render(), self.dry_run).await
    }
}

#[async_trait]
impl ConfigWriter for PoetryPluginWriter {
    fn tool(&self) -> ToolTarget {
        ToolTarget::Poetry
    }

    fn requires_sudo(&self) -> bool {
        false
    }

    fn is_installed(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn config_path(&self) -> Option<PathBuf> {
        Some(self.path())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        let lines = ConfigDocument::read(&self.path()).await?.lines();
        match lines.section(SECTION) {
            Some(range) => lines.value(range, "url"),
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        url: &ResolvedUrl,
        extra: Option<&ExtraIndexEntry>,
        replace: bool,
    ) -> Result<ApplyOutcome> {
        if !self.dry_run && !self.is_installed() {
            return Err(MirrorError::ToolNotInstalled {
                tool: ToolTarget::Poetry.name(),
                hint: ToolTarget::Poetry.install_hint(),
            });
        }
        if let Some(extra) = extra {
            // the plugin only knows a single mirror url
            debug!(extra = %extra.url, "poetry: extra index not supported, ignoring");
        }

        self.ensure_plugin().await?;
        self.write_config(url, replace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::fs;

    fn url(raw: &str) -> ResolvedUrl {
        ResolvedUrl::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_creates_plugin_section() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("pypoetry").join("config.toml");
        let writer = PoetryPluginWriter::with_path(config_path.clone());

        assert!(writer.current_url().await?.is_none());

        let tx = url("https://mirrors.cloud.tencent.com/pypi/simple/");
        assert_eq!(writer.write_config(&tx, false).await?, ApplyOutcome::Done);
        assert_eq!(
            fs::read_to_string(&config_path).await?,
            "[plugins.pypi_mirror]\nurl = \"https://mirrors.cloud.tencent.com/pypi/simple/\"\n"
        );
        assert_eq!(writer.current_url().await?, Some(tx.to_string()));

        assert_eq!(writer.write_config(&tx, false).await?, ApplyOutcome::Skipped);
        Ok(())
    }

    #[tokio::test]
    async fn test_keeps_existing_settings() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[virtualenvs]\nin-project = true\n").await?;
        let writer = PoetryPluginWriter::with_path(config_path.clone());

        let tx = url("https://mirrors.cloud.tencent.com/pypi/simple/");
        writer.write_config(&tx, false).await?;
        assert_eq!(
            fs::read_to_string(&config_path).await?,
            "[virtualenvs]\nin-project = true\n\n\
             [plugins.pypi_mirror]\nurl = \"https://mirrors.cloud.tencent.com/pypi/simple/\"\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_different_url_needs_replace() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.toml");
        let original = "[plugins.pypi_mirror]\nurl = \"https://pypi.douban.com/simple/\"\n\n\
                        [virtualenvs]\ncreate = false\n";
        fs::write(&config_path, original).await?;
        let writer = PoetryPluginWriter::with_path(config_path.clone());
        let ali = url("https://mirrors.aliyun.com/pypi/simple/");

        let outcome = writer.write_config(&ali, false).await?;
        assert!(matches!(outcome, ApplyOutcome::Blocked { .. }));
        assert_eq!(fs::read_to_string(&config_path).await?, original);

        assert_eq!(writer.write_config(&ali, true).await?, ApplyOutcome::Done);
        assert_eq!(
            fs::read_to_string(&config_path).await?,
            "[plugins.pypi_mirror]\nurl = \"https://mirrors.aliyun.com/pypi/simple/\"\n\n\
             [virtualenvs]\ncreate = false\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_section_without_url_is_filled() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[plugins.pypi_mirror]\n").await?;
        let writer = PoetryPluginWriter::with_path(config_path.clone());

        let hw = url("https://repo.huaweicloud.com/repository/pypi/simple/");
        assert_eq!(writer.write_config(&hw, false).await?, ApplyOutcome::Done);
        assert_eq!(writer.current_url().await?, Some(hw.to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_commented_header_is_reused() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[plugins.pypi_mirror]  # mirror\nurl = \"https://pypi.douban.com/simple/\"\n",
        )
        .await?;
        let writer = PoetryPluginWriter::with_path(config_path.clone());
        let tx = url("https://mirrors.cloud.tencent.com/pypi/simple/");

        assert!(matches!(
            writer.write_config(&tx, false).await?,
            ApplyOutcome::Blocked { .. }
        ));
        assert_eq!(writer.write_config(&tx, true).await?, ApplyOutcome::Done);
        assert_eq!(
            fs::read_to_string(&config_path).await?,
            "[plugins.pypi_mirror]  # mirror\nurl = \"https://mirrors.cloud.tencent.com/pypi/simple/\"\n"
        );
        Ok(())
    }

    #[cfg(unix)]
    mod plugin {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        /// Fake poetry that logs its args and lists the plugin once `self add` ran.
        fn fake_poetry(dir: &Path) -> PathBuf {
            let script = dir.join("poetry");
            let body = format!(
                "#!/bin/sh\n\
                 echo \"$*\" >> '{log}'\n\
                 case \"$*\" in\n\
                   'self show plugins') [ -f '{marker}' ] && echo '  - {plugin} (0.4.2)' ;;\n\
                   'self add {plugin}') touch '{marker}' ;;\n\
                 esac\n\
                 exit 0\n",
                log = dir.join("calls.log").display(),
                marker = dir.join("installed").display(),
                plugin = PLUGIN,
            );
            std::fs::write(&script, body).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        #[tokio::test]
        async fn test_plugin_installed_once() -> Result<()> {
            let dir = tempdir()?;
            let program = fake_poetry(dir.path()).display().to_string();
            let writer =
                PoetryPluginWriter::with_program(dir.path().join("config.toml"), program);
            assert!(writer.is_installed());

            let tx = url("https://mirrors.cloud.tencent.com/pypi/simple/");
            assert_eq!(writer.apply(&tx, None, false).await?, ApplyOutcome::Done);
            assert_eq!(writer.apply(&tx, None, false).await?, ApplyOutcome::Skipped);

            let calls = fs::read_to_string(dir.path().join("calls.log")).await?;
            let adds = calls.lines().filter(|l| l.starts_with("self add")).count();
            assert_eq!(adds, 1);
            assert_eq!(
                calls.lines().filter(|l| *l == "self show plugins").count(),
                2
            );
            Ok(())
        }
    }
}

use crate::error::{MirrorError, Result};
use crate::types::{ApplyOutcome, ExtraIndexEntry, ResolvedUrl, ToolTarget};
use crate::utils;
use async_trait::async_trait;
use std::path::PathBuf;

/// ConfigWriter: 每个工具的配置写入模块必须实现的接口
#[async_trait]
pub trait ConfigWriter: Sync + Send {
    fn tool(&self) -> ToolTarget;

    /// 是否需要 Root 权限 (如写入 /etc/pip.conf)
    fn requires_sudo(&self) -> bool;

    /// 工具的可执行文件是否在 PATH 中
    fn is_installed(&self) -> bool;

    /// 配置文件路径；配置由工具自己的命令管理时为 `None`
    fn config_path(&self) -> Option<PathBuf>;

    /// 获取当前正在使用的源 URL
    /// 返回 Option: 如果未配置或无法解析，则返回 None (视为默认)
    async fn current_url(&self) -> Result<Option<String>>;

    /// 应用新的镜像源
    /// 实现中必须保证:
    /// 1. 重复执行结果不变
    /// 2. 镜像相关键以外的配置保持不变
    /// 3. 已配置其他镜像时，只有 `replace` 为真才覆盖，否则返回 `ApplyOutcome::Blocked`
    async fn apply(
        &self,
        url: &ResolvedUrl,
        extra: Option<&ExtraIndexEntry>,
        replace: bool,
    ) -> Result<ApplyOutcome>;

    /// 从最近的备份恢复 (`<file>.bak.<ts>`)
    async fn restore(&self) -> Result<PathBuf> {
        match self.config_path() {
            Some(path) => utils::restore_latest_backup(&path).await,
            None => Err(MirrorError::RestoreUnsupported(self.tool().name())),
        }
    }
}

use crate::error::{MirrorError, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// 备份文件 (如果有)
/// 文件名格式: pip.conf -> pip.conf.bak.TIMESTAMP
pub async fn backup_file(path: &Path) -> Result<()> {
    if fs::try_exists(path).await.unwrap_or(false) {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        let backup_name = format!("{}.bak.{}", file_name, timestamp);
        let backup_path = path.with_file_name(backup_name);

        fs::copy(path, &backup_path).await?;
        println!("Backup created at: {:?}", backup_path);
    }
    Ok(())
}

/// 恢复到最近的备份
pub async fn restore_latest_backup(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let prefix = format!("{}.bak.", file_name);

    if !fs::try_exists(parent).await.unwrap_or(false) {
        return Err(MirrorError::NoBackup(path.to_path_buf()));
    }

    // (时间戳, 路径)；按数字排序，999 排在 1000 前面
    let mut latest: Option<(u64, PathBuf)> = None;
    let mut entries = fs::read_dir(parent).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(ts) = name.strip_prefix(&prefix).and_then(|t| t.parse::<u64>().ok()) else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| ts > *best) {
            latest = Some((ts, entry.path()));
        }
    }

    let Some((_, backup)) = latest else {
        return Err(MirrorError::NoBackup(path.to_path_buf()));
    };

    println!("Restoring from backup: {:?}", backup);
    fs::copy(&backup, path).await?;
    Ok(backup)
}

/// 转义后的命令行，用于回显
pub fn render_command<S: AsRef<str>>(argv: &[S]) -> String {
    shlex::try_join(argv.iter().map(|s| s.as_ref())).unwrap_or_else(|_| {
        argv.iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// 当前进程的启动命令，前面加上 sudo
pub fn privileged_retry() -> String {
    let argv: Vec<String> = std::env::args().collect();
    format!("sudo {}", render_command(&argv))
}

/// 回显并执行命令，退出码非 0 时返回错误
pub async fn run_command<S: AsRef<str>>(argv: &[S]) -> Result<()> {
    let command = render_command(argv);
    println!("--> {}", command);

    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let status = Command::new(program.as_ref())
        .args(args.iter().map(|a| a.as_ref()))
        .status()
        .await?;

    if !status.success() {
        return Err(MirrorError::CommandFailed {
            command,
            code: status.code().unwrap_or(1),
        });
    }
    Ok(())
}

/// 命令成功时的标准输出；命令不存在或失败时返回 `None`
pub async fn command_output<S: AsRef<str>>(argv: &[S]) -> Option<String> {
    let (program, args) = argv.split_first()?;
    let program = which::which(program.as_ref()).ok()?;
    let output = Command::new(program)
        .args(args.iter().map(|a| a.as_ref()))
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        debug!(command = %render_command(argv), "command exited with {}", output.status);
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

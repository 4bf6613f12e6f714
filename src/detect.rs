use crate::types::ToolTarget;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

const LOCK_FILES: [(&str, ToolTarget); 3] = [
    ("poetry.lock", ToolTarget::Poetry),
    ("pdm.lock", ToolTarget::Pdm),
    ("uv.lock", ToolTarget::Uv),
];

fn backend_tool(backend: &str) -> Option<ToolTarget> {
    let module = backend.split('.').next().unwrap_or(backend);
    match module {
        "poetry" => Some(ToolTarget::Poetry),
        "pdm" => Some(ToolTarget::Pdm),
        "uv_build" => Some(ToolTarget::Uv),
        _ => None,
    }
}

async fn pyproject_backend(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("pyproject.toml")).await.ok()?;
    let table = match toml::from_str::<toml::Table>(&content) {
        Ok(table) => table,
        Err(e) => {
            warn!("cannot parse pyproject.toml: {}", e);
            return None;
        }
    };
    table
        .get("build-system")?
        .get("build-backend")?
        .as_str()
        .map(String::from)
}

/// 判断 `dir` 中的项目使用哪个包管理器
///
/// 依据 lock 文件和 `pyproject.toml` 中的 `build-backend`：
/// 只指向一个工具时用它，没有线索或线索冲突时用 pip
pub async fn detect_tool(dir: &Path) -> ToolTarget {
    let mut found = BTreeSet::new();

    for (file, tool) in LOCK_FILES {
        if fs::try_exists(dir.join(file)).await.unwrap_or(false) {
            debug!(file, %tool, "lock file found");
            found.insert(tool);
        }
    }
    if let Some(backend) = pyproject_backend(dir).await {
        if let Some(tool) = backend_tool(&backend) {
            debug!(%backend, %tool, "build backend found");
            found.insert(tool);
        }
    }

    match found.len() {
        1 => found.into_iter().next().unwrap_or(ToolTarget::Pip),
        _ => ToolTarget::Pip,
    }
}

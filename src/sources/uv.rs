//! uv reads its indexes from `[[index]]` tables in `uv.toml`.
//!
//! The block marked `default = true` is the primary mirror. Blocks with a
//! `name` belong to the user (pytorch wheels, private registries) and are
//! never touched unless they carry the default mark.

use crate::capabilities::xdg_config_home;
use crate::document::{toml_string, ConfigDocument, Lines};
use crate::error::Result;
use crate::traits::ConfigWriter;
use crate::types::{ApplyOutcome, ExtraIndexEntry, ResolvedUrl, ToolTarget};
use async_trait::async_trait;
use directories::BaseDirs;
use std::path::PathBuf;
use tracing::warn;

const INDEX: &str = "index";
const INDEX_HEADER: &str = "[[index]]";
const DEFAULT_LINE: &str = "default = true";

pub struct UvIndexWriter {
    is_windows: bool,
    python_mirror: Option<String>,
    dry_run: bool,
    custom_path: Option<PathBuf>,
}

impl UvIndexWriter {
    pub fn new(is_windows: bool, python_mirror: Option<String>, dry_run: bool) -> Self {
        Self {
            is_windows,
            python_mirror,
            dry_run,
            custom_path: None,
        }
    }

    #[cfg(test)]
    pub fn with_path(path: PathBuf, python_mirror: Option<String>) -> Self {
        Self {
            is_windows: false,
            python_mirror,
            dry_run: false,
            custom_path: Some(path),
        }
    }

    fn path(&self) -> PathBuf {
        if let Some(ref path) = self.custom_path {
            return path.clone();
        }
        let Some(dirs) = BaseDirs::new() else {
            return PathBuf::from("uv.toml");
        };
        let base = if self.is_windows {
            // %APPDATA%\uv\uv.toml
            dirs.config_dir().to_path_buf()
        } else {
            xdg_config_home(dirs.home_dir())
        };
        base.join("uv").join("uv.toml")
    }
}

struct IndexBlock {
    header: usize,
    url: Option<String>,
    named: bool,
    default: bool,
}

impl IndexBlock {
    fn managed(&self) -> bool {
        !self.named || self.default
    }
}

fn index_blocks(lines: &Lines) -> Result<Vec<IndexBlock>> {
    lines
        .array_tables(INDEX)
        .into_iter()
        .map(|body| {
            Ok(IndexBlock {
                header: body.start - 1,
                url: lines.value(body.clone(), "url")?,
                named: lines.find_key(body.clone(), "name")?.is_some(),
                default: lines.value(body, "default")?.as_deref() == Some("true"),
            })
        })
        .collect()
}

fn url_line(url: &str) -> String {
    format!("url = {}", toml_string(url))
}

/// Add a table after the body of the table at `header`.
fn insert_after(lines: &mut Lines, header: usize, block: &[&str]) {
    let body = lines.body(header);
    let at = body
        .clone()
        .rev()
        .find(|&i| !lines.line(i).trim().is_empty())
        .map_or(body.start, |i| i + 1);

    let mut new = vec![""];
    new.extend_from_slice(block);
    if at < lines.len() && !lines.line(at).trim().is_empty() {
        new.push("");
    }
    lines.insert(at, &new);
}

/// Merge http hosts into the top-level `allow-insecure-host` array.
fn merge_insecure_hosts(lines: &mut Lines, hosts: &[&str]) -> Result<()> {
    if hosts.is_empty() {
        return Ok(());
    }

    let mut merged: Vec<String> = Vec::new();
    if let Some(i) = lines.find_key(lines.top_level(), "allow-insecure-host")? {
        let table = match toml::from_str::<toml::Table>(lines.line(i)) {
            Ok(table) => table,
            Err(e) => {
                warn!("leaving allow-insecure-host as is, cannot parse it: {}", e);
                return Ok(());
            }
        };
        match table.get("allow-insecure-host") {
            Some(toml::Value::Array(items)) => {
                merged.extend(items.iter().filter_map(|v| v.as_str()).map(String::from))
            }
            Some(toml::Value::String(host)) => merged.push(host.clone()),
            _ => {}
        }
        if hosts.iter().all(|h| merged.iter().any(|m| m == h)) {
            return Ok(());
        }
    }

    for host in hosts {
        if !merged.iter().any(|m| m == host) {
            merged.push(host.to_string());
        }
    }
    let rendered: Vec<String> = merged.iter().map(|h| toml_string(h)).collect();
    lines.set_top_level(
        "allow-insecure-host",
        &format!("allow-insecure-host = [{}]", rendered.join(", ")),
    )
}

/// Patch `text` so uv uses `url` as its default index.
///
/// Returns `None` when a different default index is configured and
/// `replace` is off.
///
/// When the file has as many managed blocks as there are indexes to write,
/// only their values change. Otherwise the primary block is inserted before
/// the existing index tables and the extra one after them.
pub fn patch(
    text: &str,
    url: &ResolvedUrl,
    extra: Option<&ExtraIndexEntry>,
    python_mirror: Option<&str>,
    replace: bool,
) -> Result<Option<String>> {
    let mut lines = Lines::parse(text);
    let blocks = index_blocks(&lines)?;
    let wanted = url.to_string();

    let desired = if extra.is_some() { 2 } else { 1 };
    let managed: Vec<&IndexBlock> = blocks.iter().filter(|b| b.managed()).collect();
    let positional = managed.len() == desired;

    let primary = blocks
        .iter()
        .find(|b| b.default)
        .or_else(|| positional.then(|| managed[0]));

    if let Some(p) = primary {
        if !replace && p.url.as_deref().is_some_and(|u| u != wanted) {
            return Ok(None);
        }
    }

    let mut substitutions: Vec<(usize, Vec<(&str, String)>)> = Vec::new();
    let mut append_extra = None;

    if let Some(extra) = extra {
        let extra_url = extra.url.to_string();
        let present = blocks
            .iter()
            .any(|b| b.url.as_deref() == Some(extra_url.as_str()));
        if !present {
            let slot = managed
                .iter()
                .filter(|_| positional)
                .find(|b| Some(b.header) != primary.map(|p| p.header));
            match slot {
                // the second block is the user's own index; only -y overwrites it
                Some(b) if !replace && b.url.is_some() => return Ok(None),
                Some(b) => substitutions.push((b.header, vec![("url", url_line(&extra_url))])),
                None => append_extra = Some(url_line(&extra_url)),
            }
        }
    }

    if let Some(p) = primary {
        substitutions.push((
            p.header,
            vec![("url", url_line(&wanted)), ("default", DEFAULT_LINE.to_string())],
        ));
    }

    // bottom-up, so earlier header indexes stay valid
    if let Some(line) = append_extra {
        match blocks.last() {
            Some(last) => insert_after(&mut lines, last.header, &[INDEX_HEADER, &line]),
            None => lines.append_block(&[INDEX_HEADER, &line]),
        }
    }
    substitutions.sort_by(|a, b| b.0.cmp(&a.0));
    for (header, entries) in substitutions {
        for (key, line) in entries {
            let body = lines.body(header);
            lines.set(body, key, &line)?;
        }
    }
    if primary.is_none() {
        let line = url_line(&wanted);
        match index_blocks(&lines)?.first() {
            Some(first) => lines.insert(first.header, &[INDEX_HEADER, &line, DEFAULT_LINE, ""]),
            None => lines.append_block(&[INDEX_HEADER, &line, DEFAULT_LINE]),
        }
    }

    if let Some(mirror) = python_mirror {
        lines.set_top_level(
            "python-install-mirror",
            &format!("python-install-mirror = {}", toml_string(mirror)),
        )?;
    }
    let insecure: Vec<&str> = std::iter::once(url)
        .filter(|u| !u.is_secure())
        .map(|u| u.host.as_str())
        .chain(extra.filter(|e| e.insecure).map(|e| e.host.as_str()))
        .collect();
    merge_insecure_hosts(&mut lines, &insecure)?;

    Ok(Some(lines.render()))
}

fn default_url(text: &str) -> Result<Option<String>> {
    let lines = Lines::parse(text);
    let blocks = index_blocks(&lines)?;
    let chosen = blocks
        .iter()
        .find(|b| b.default)
        .or_else(|| blocks.iter().find(|b| b.managed()));
    Ok(chosen.and_then(|b| b.url.clone()))
}

#[async_trait]
impl ConfigWriter for UvIndexWriter {
    fn tool(&self) -> ToolTarget {
        ToolTarget::Uv
    }

    fn requires_sudo(&self) -> bool {
        false
    }

    fn is_installed(&self) -> bool {
        which::which("uv").is_ok()
    }

    fn config_path(&self) -> Option<PathBuf> {
        Some(self.path())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        let doc = ConfigDocument::read(&self.path()).await?;
        default_url(doc.text())
    }

    async fn apply(
        &self,
        url: &ResolvedUrl,
        extra: Option<&ExtraIndexEntry>,
        replace: bool,
    ) -> Result<ApplyOutcome> {
        if !self.is_installed() {
            // uv.toml is plain config; it is picked up once uv is installed
            warn!("uv not found on PATH, writing its config anyway");
        }

        let path = self.path();
        let doc = ConfigDocument::read(&path).await?;
        let patched = patch(
            doc.text(),
            url,
            extra,
            self.python_mirror.as_deref(),
            replace,
        )?;

        match patched {
            Some(new_text) => doc.persist(&path, &new_text, self.dry_run).await,
            None => Ok(ApplyOutcome::Blocked {
                existing: doc.text().to_string(),
            }),
        }
    }
}

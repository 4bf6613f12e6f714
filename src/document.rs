//! 按行读写 INI / TOML 配置文件
//!
//! 镜像配置都在很小的扁平文件里，所以直接按行修改，不经过完整的解析器。
//! 没有改动的行逐字节保留，包括注释和换行符。

use crate::error::{MirrorError, Result};
use crate::types::ApplyOutcome;
use crate::utils;
use regex::Regex;
use similar::TextDiff;
use std::io::ErrorKind;
use std::ops::Range;
use std::path::Path;
use tokio::fs;

/// 工具配置文件的现有内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDocument {
    Absent,
    Present(String),
}

impl ConfigDocument {
    pub async fn read(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(ConfigDocument::Absent);
        }
        Ok(ConfigDocument::Present(fs::read_to_string(path).await?))
    }

    pub fn text(&self) -> &str {
        match self {
            ConfigDocument::Absent => "",
            ConfigDocument::Present(text) => text,
        }
    }

    pub fn lines(&self) -> Lines {
        Lines::parse(self.text())
    }

    /// 写入 `new_text`，内容相同时跳过
    ///
    /// 写入前先备份原文件；`dry_run` 时只打印 diff
    pub async fn persist(&self, path: &Path, new_text: &str, dry_run: bool) -> Result<ApplyOutcome> {
        if let ConfigDocument::Present(old) = self {
            if old == new_text {
                return Ok(ApplyOutcome::Skipped);
            }
        }

        if dry_run {
            print_diff(path, self.text(), new_text);
            return Ok(ApplyOutcome::Planned);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(path, e))?;
        }
        if !self.text().is_empty() {
            utils::backup_file(path).await?;
        }
        fs::write(path, new_text)
            .await
            .map_err(|e| write_error(path, e))?;

        println!("Write lines to {:?}", path);
        Ok(ApplyOutcome::Done)
    }
}

fn write_error(path: &Path, e: std::io::Error) -> MirrorError {
    if e.kind() == ErrorKind::PermissionDenied {
        MirrorError::WritePermission {
            path: path.to_path_buf(),
            retry: utils::privileged_retry(),
        }
    } else {
        MirrorError::Io(e)
    }
}

fn print_diff(path: &Path, old: &str, new: &str) {
    let name = path.display().to_string();
    let diff = TextDiff::from_lines(old, new);
    print!("{}", diff.unified_diff().header(&name, &name));
}

/// 去掉行尾 `#` 注释后的表头文本
fn header_text(line: &str) -> &str {
    line.split('#').next().unwrap_or("").trim()
}

fn is_header(line: &str) -> bool {
    let t = header_text(line);
    t.starts_with('[') && t.ends_with(']')
}

fn key_regex(key: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(r"^\s*{}\s*=", regex::escape(key)))?)
}

/// `key = value` 行中的值，去掉引号
pub fn parse_value(line: &str) -> String {
    let raw = line.split_once('=').map(|(_, v)| v.trim()).unwrap_or("");
    for quote in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(quote) {
            if let Some(end) = rest.find(quote) {
                return rest[..end].to_string();
            }
        }
    }
    raw.to_string()
}

/// TOML 基本字符串字面量
pub fn toml_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// 按行拆分的配置文件，每行保留自己的换行符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lines {
    lines: Vec<String>,
}

impl Lines {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.split_inclusive('\n').map(String::from).collect(),
        }
    }

    pub fn render(&self) -> String {
        self.lines.concat()
    }

    pub fn line(&self, i: usize) -> &str {
        &self.lines[i]
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    fn next_header(&self, from: usize) -> usize {
        self.lines[from..]
            .iter()
            .position(|l| is_header(l))
            .map_or(self.lines.len(), |p| from + p)
    }

    /// 第一个表头之前的行
    pub fn top_level(&self) -> Range<usize> {
        0..self.next_header(0)
    }

    /// 表头为 `header` 的第一个 section 的内容范围
    pub fn section(&self, header: &str) -> Option<Range<usize>> {
        let h = self.lines.iter().position(|l| header_text(l) == header)?;
        Some(self.body(h))
    }

    /// 第 `header` 行表头之后、下一个表头之前的行
    pub fn body(&self, header: usize) -> Range<usize> {
        header + 1..self.next_header(header + 1)
    }

    /// 所有 `[[name]]` 表数组条目的内容范围，按文件顺序
    pub fn array_tables(&self, name: &str) -> Vec<Range<usize>> {
        let header = format!("[[{}]]", name);
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| header_text(l) == header)
            .map(|(i, _)| self.body(i))
            .collect()
    }

    pub fn find_key(&self, range: Range<usize>, key: &str) -> Result<Option<usize>> {
        let re = key_regex(key)?;
        Ok(range.into_iter().find(|&i| re.is_match(&self.lines[i])))
    }

    pub fn value(&self, range: Range<usize>, key: &str) -> Result<Option<String>> {
        Ok(self
            .find_key(range, key)?
            .map(|i| parse_value(&self.lines[i])))
    }

    /// 替换 `range` 中的 `key` 行；没有则加在范围内最后一个非空行之后
    pub fn set(&mut self, range: Range<usize>, key: &str, line: &str) -> Result<()> {
        match self.find_key(range.clone(), key)? {
            Some(i) => self.replace(i, line),
            None => {
                let at = range
                    .clone()
                    .rev()
                    .find(|&i| !self.lines[i].trim().is_empty())
                    .map_or(range.start, |i| i + 1);
                self.insert(at, &[line]);
            }
        }
        Ok(())
    }

    /// 设置必须位于所有表头之前的键
    pub fn set_top_level(&mut self, key: &str, line: &str) -> Result<()> {
        let range = self.top_level();
        let preamble_empty = self.lines[range.clone()]
            .iter()
            .all(|l| l.trim().is_empty());

        if self.find_key(range.clone(), key)?.is_none()
            && preamble_empty
            && range.end < self.lines.len()
        {
            // 新键和第一个表之间留一个空行
            self.insert(0, &[line, ""]);
            return Ok(());
        }
        self.set(range, key, line)
    }

    fn replace(&mut self, i: usize, line: &str) {
        let old = &self.lines[i];
        let ending = if old.ends_with("\r\n") {
            "\r\n"
        } else if old.ends_with('\n') {
            "\n"
        } else {
            ""
        };
        self.lines[i] = format!("{}{}", line, ending);
    }

    fn terminate(&mut self, i: usize) {
        if let Some(line) = self.lines.get_mut(i) {
            if !line.ends_with('\n') {
                line.push('\n');
            }
        }
    }

    pub fn insert(&mut self, at: usize, new: &[&str]) {
        if at > 0 {
            self.terminate(at - 1);
        }
        let new = new.iter().map(|l| format!("{}\n", l));
        self.lines.splice(at..at, new);
    }

    /// 在末尾追加一个 section，前面空一行
    pub fn append_block(&mut self, block: &[&str]) {
        if let Some(last) = self.lines.len().checked_sub(1) {
            self.terminate(last);
            if !self.lines[last].trim().is_empty() {
                self.lines.push("\n".to_string());
            }
        }
        self.lines.extend(block.iter().map(|l| format!("{}\n", l)));
    }
}

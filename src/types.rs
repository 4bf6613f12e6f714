use crate::error::{MirrorError, Result};
use serde::Deserialize;
use std::fmt;

/// 镜像源定义
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorSpec {
    pub alias: String, // 例如: "tx"
    pub host: String,  // 例如: "mirrors.cloud.tencent.com/pypi"
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// 同一厂商的云内网镜像别名 (如果有)
    #[serde(default)]
    pub inner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// 具体的 index url，拆分后方便取出 host
///
/// `Display` 原样拼回解析前的文本，用户给的 url 会逐字节写回
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub scheme: Scheme,
    pub host: String,
    pub path: String,
}

impl ResolvedUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = raw.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = raw.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            return Err(MirrorError::InvalidUrl(raw.to_string()));
        };

        let (host, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(MirrorError::InvalidUrl(raw.to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// 去掉 `:port` 的主机名，用于 DNS 解析
    pub fn dns_host(&self) -> &str {
        self.host.split(':').next().unwrap_or(&self.host)
    }

    pub fn port(&self) -> u16 {
        self.host
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse().ok())
            .unwrap_or(match self.scheme {
                Scheme::Http => 80,
                Scheme::Https => 443,
            })
    }
}

impl fmt::Display for ResolvedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.host, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Dns,
    Icmp,
    HttpHead,
    PackageDryRun,
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProbeMethod::Dns => "dns",
            ProbeMethod::Icmp => "icmp",
            ProbeMethod::HttpHead => "http-head",
            ProbeMethod::PackageDryRun => "package-dry-run",
        })
    }
}

/// 探测结果
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: String,
    pub reachable: bool,
    /// 给出结论的探测方式
    pub method: ProbeMethod,
}

/// 选源结果
#[derive(Debug, Clone)]
pub struct Selection {
    pub url: ResolvedUrl,
    /// 对应的目录别名；用户直接给出的 url 为 `None`
    pub alias: Option<String>,
    /// 在内网和公网之间做出选择的探测结果 (如果探测过)
    pub probe: Option<ProbeResult>,
}

/// 主镜像之后的附加源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraIndexEntry {
    pub host: String,
    pub url: ResolvedUrl,
    /// url 为 http 时置位，写入时还要把 host 标记为可信
    pub insecure: bool,
}

impl ExtraIndexEntry {
    pub fn new(url: ResolvedUrl) -> Self {
        Self {
            host: url.host.clone(),
            insecure: !url.is_secure(),
            url,
        }
    }
}

/// 写入配置的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 已写入新配置
    Done,
    /// 配置已一致，未写入
    Skipped,
    /// 已配置其他镜像，且未允许替换
    Blocked { existing: String },
    /// `--dry-run`: 只打印改动，不写入
    Planned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum ToolTarget {
    Pip,
    Poetry,
    Pdm,
    Uv,
}

impl ToolTarget {
    pub const ALL: [ToolTarget; 4] = [
        ToolTarget::Pip,
        ToolTarget::Poetry,
        ToolTarget::Pdm,
        ToolTarget::Uv,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolTarget::Pip => "pip",
            ToolTarget::Poetry => "poetry",
            ToolTarget::Pdm => "pdm",
            ToolTarget::Uv => "uv",
        }
    }

    pub fn install_hint(self) -> &'static str {
        match self {
            ToolTarget::Pip => "Install it with: python -m ensurepip --upgrade",
            ToolTarget::Poetry => "Install it with: pipx install poetry",
            ToolTarget::Pdm => "Install it with: pipx install pdm",
            ToolTarget::Uv => "Install it with: pip install uv",
        }
    }
}

impl fmt::Display for ToolTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

use crate::error::Result;
use crate::types::{ResolvedUrl, Scheme};

/// PEP 503 simple index 的路径后缀
pub const SIMPLE_SUFFIX: &str = "/simple/";

/// 根据目录中的 host 构造 index url
///
/// `host` 可以是域名 (`pypi.org`)、带路径前缀的域名 (`mirrors.aliyun.com/pypi`)
/// 或完整 url。云内网镜像只提供 http，`inner` 为真时强制使用 http。
pub fn build_index_url(host: &str, inner: bool) -> Result<ResolvedUrl> {
    let mut url = if host.starts_with("http") {
        ResolvedUrl::parse(host)?
    } else {
        let host = host.trim_end_matches('/');
        let base = host.trim_end_matches(SIMPLE_SUFFIX.trim_end_matches('/'));
        ResolvedUrl::parse(&format!("https://{}{}", base, SIMPLE_SUFFIX))?
    };

    if inner {
        url.scheme = Scheme::Http;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_hosts_use_https() {
        let url = build_index_url("mirrors.cloud.tencent.com/pypi", false).unwrap();
        assert_eq!(url.to_string(), "https://mirrors.cloud.tencent.com/pypi/simple/");
        assert_eq!(url.host, "mirrors.cloud.tencent.com");

        let url = build_index_url("pypi.org", false).unwrap();
        assert_eq!(url.to_string(), "https://pypi.org/simple/");
    }

    #[test]
    fn test_inner_hosts_use_http() {
        let url = build_index_url("mirrors.tencentyun.com/pypi", true).unwrap();
        assert_eq!(url.to_string(), "http://mirrors.tencentyun.com/pypi/simple/");
        assert!(!url.is_secure());
    }

    #[test]
    fn test_suffix_not_doubled() {
        let url = build_index_url("pypi.example.com/simple/", false).unwrap();
        assert_eq!(url.to_string(), "https://pypi.example.com/simple/");
    }

    #[test]
    fn test_full_url_host_kept() {
        let url = build_index_url("https://devpi.example.com/root/pypi/+simple/", false).unwrap();
        assert_eq!(url.to_string(), "https://devpi.example.com/root/pypi/+simple/");

        let url = build_index_url("https://devpi.example.com/root/pypi/+simple/", true).unwrap();
        assert_eq!(url.to_string(), "http://devpi.example.com/root/pypi/+simple/");
    }
}

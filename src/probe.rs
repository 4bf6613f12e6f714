use crate::capabilities::Capabilities;
use crate::error::{MirrorError, Result};
use crate::types::{ProbeMethod, ProbeResult, ResolvedUrl};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

// 每个探测步骤的超时，防止不可达的源阻塞整个流程
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// 所有镜像都有的小包，没有依赖
const DRY_RUN_PACKAGE: &str = "six";

/// 判断 index 是否可达
#[async_trait]
pub trait Probe: Send + Sync {
    /// 完整的可达性检查
    async fn probe(&self, url: &ResolvedUrl) -> ProbeResult;

    /// 只做 DNS 解析
    async fn resolves(&self, host: &str) -> bool;
}

/// 探测链中的一步
///
/// `Ok(Some(_))` 为确定结论，`Ok(None)` 交给下一步
#[async_trait]
pub trait ProbeStrategy: Send + Sync {
    fn method(&self) -> ProbeMethod;
    async fn attempt(&self, url: &ResolvedUrl) -> Result<Option<bool>>;
}

/// 分层探测: DNS、包下载试运行、HTTP HEAD，最后 ICMP
pub struct NetworkProbe {
    strategies: Vec<Box<dyn ProbeStrategy>>,
    timeout: Duration,
    memo: Mutex<HashMap<String, ProbeResult>>,
}

impl NetworkProbe {
    pub fn new(caps: &Capabilities) -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        let strategies = strategy_chain(
            caps,
            which::which("pip").ok(),
            which::which("ping").ok(),
            client,
        );
        Self::with_strategies(strategies, PROBE_TIMEOUT)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ProbeStrategy>>, timeout: Duration) -> Self {
        Self {
            strategies,
            timeout,
            memo: Mutex::new(HashMap::new()),
        }
    }

    async fn run_chain(&self, url: &ResolvedUrl) -> ProbeResult {
        let target = url.to_string();
        let mut last = ProbeMethod::Dns;

        for strategy in &self.strategies {
            last = strategy.method();
            let verdict = match tokio::time::timeout(self.timeout, strategy.attempt(url)).await {
                Ok(v) => v,
                Err(_) => Err(MirrorError::ProbeTimeout {
                    target: target.clone(),
                    secs: self.timeout.as_secs(),
                }),
            };

            match verdict {
                Ok(Some(reachable)) => {
                    debug!(%target, method = %last, reachable, "probe concluded");
                    return ProbeResult {
                        target,
                        reachable,
                        method: last,
                    };
                }
                Ok(None) => debug!(%target, method = %last, "probe inconclusive"),
                Err(e) => debug!(%target, method = %last, "probe failed: {}", e),
            }
        }

        ProbeResult {
            target,
            reachable: false,
            method: last,
        }
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    async fn probe(&self, url: &ResolvedUrl) -> ProbeResult {
        let key = url.to_string();
        if let Some(hit) = self.memo.lock().ok().and_then(|m| m.get(&key).cloned()) {
            return hit;
        }

        let result = self.run_chain(url).await;
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(key, result.clone());
        }
        result
    }

    async fn resolves(&self, host: &str) -> bool {
        match tokio::time::timeout(self.timeout, lookup(host, 443)).await {
            Ok(found) => found,
            Err(_) => {
                warn!(
                    "{}",
                    MirrorError::ProbeTimeout {
                        target: host.to_string(),
                        secs: self.timeout.as_secs(),
                    }
                );
                false
            }
        }
    }
}

/// 按优先级组装探测步骤，找不到的工具对应的步骤直接跳过
fn strategy_chain(
    caps: &Capabilities,
    pip: Option<PathBuf>,
    ping: Option<PathBuf>,
    client: Client,
) -> Vec<Box<dyn ProbeStrategy>> {
    let mut strategies: Vec<Box<dyn ProbeStrategy>> = vec![Box::new(DnsStrategy)];
    if let Some(pip) = pip {
        strategies.push(Box::new(PackageDryRunStrategy::new(pip)));
    }
    strategies.push(Box::new(HttpHeadStrategy::new(client, PROBE_TIMEOUT)));

    // Windows 和 CI/容器里没有 raw socket 权限，ping 失败说明不了什么
    if !caps.is_windows && !caps.restricted_network {
        if let Some(ping) = ping {
            strategies.push(Box::new(IcmpStrategy::new(ping)));
        }
    }
    strategies
}

async fn lookup(host: &str, port: u16) -> bool {
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(e) => {
            debug!(host, "name resolution failed: {}", e);
            false
        }
    }
}

/// 解析不到即不可达；能解析还需要后续步骤确认
pub struct DnsStrategy;

#[async_trait]
impl ProbeStrategy for DnsStrategy {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::Dns
    }

    async fn attempt(&self, url: &ResolvedUrl) -> Result<Option<bool>> {
        if lookup(url.dns_host(), url.port()).await {
            Ok(None)
        } else {
            Ok(Some(false))
        }
    }
}

/// 用 pip 从 index 下载一个小包
///
/// 下载目录是本次尝试持有的 `TempDir`，无论正常返回、出错还是超时被丢弃都会删除
pub struct PackageDryRunStrategy {
    pip: PathBuf,
}

impl PackageDryRunStrategy {
    pub fn new(pip: PathBuf) -> Self {
        Self { pip }
    }
}

#[async_trait]
impl ProbeStrategy for PackageDryRunStrategy {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::PackageDryRun
    }

    async fn attempt(&self, url: &ResolvedUrl) -> Result<Option<bool>> {
        let dest = tempfile::tempdir()?;
        let index = url.to_string();

        let mut cmd = Command::new(&self.pip);
        cmd.args([
            "download",
            "--isolated",
            "--no-deps",
            "--disable-pip-version-check",
            "--quiet",
            "--timeout",
            "5",
            "-d",
        ])
        .arg(dest.path())
        .args(["-i", index.as_str()]);
        if !url.is_secure() {
            cmd.args(["--trusted-host", url.host.as_str()]);
        }
        cmd.arg(DRY_RUN_PACKAGE)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = cmd.status().await?;
        Ok(status.success().then_some(true))
    }
}

/// 对 index 发 HEAD 请求，2xx 即可达
pub struct HttpHeadStrategy {
    client: Client,
    timeout: Duration,
}

impl HttpHeadStrategy {
    /// `timeout` 应与 `client` 上设置的超时一致，仅用于报错信息
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ProbeStrategy for HttpHeadStrategy {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::HttpHead
    }

    async fn attempt(&self, url: &ResolvedUrl) -> Result<Option<bool>> {
        // 使用 HEAD 请求而不是 GET，只获取元数据，速度更快且省流量
        match self.client.head(url.to_string()).send().await {
            Ok(resp) if resp.status().is_success() => Ok(Some(true)),
            Ok(resp) => {
                debug!(status = %resp.status(), "HEAD answered without success");
                Ok(None)
            }
            Err(e) if e.is_timeout() => Err(MirrorError::ProbeTimeout {
                target: url.to_string(),
                secs: self.timeout.as_secs(),
            }),
            Err(e) => {
                debug!("HEAD failed: {}", e);
                Ok(None)
            }
        }
    }
}

/// 单次 ping，最后手段
pub struct IcmpStrategy {
    ping: PathBuf,
}

impl IcmpStrategy {
    pub fn new(ping: PathBuf) -> Self {
        Self { ping }
    }
}

#[async_trait]
impl ProbeStrategy for IcmpStrategy {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::Icmp
    }

    async fn attempt(&self, url: &ResolvedUrl) -> Result<Option<bool>> {
        let secs = PROBE_TIMEOUT.as_secs().to_string();
        // BSD ping 用 -t 指定总超时，Linux 用 -W (单次应答)
        let deadline_flag = if cfg!(target_os = "macos") { "-t" } else { "-W" };

        let status = Command::new(&self.ping)
            .args(["-c", "1", deadline_flag, secs.as_str(), url.dns_host()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(s) => Ok(Some(s.success())),
            Err(e) => {
                debug!("could not run ping: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        method: ProbeMethod,
        answer: Option<bool>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn boxed(
            method: ProbeMethod,
            answer: Option<bool>,
            calls: &Arc<AtomicUsize>,
        ) -> Box<dyn ProbeStrategy> {
            Box::new(Self {
                method,
                answer,
                delay: Duration::ZERO,
                calls: calls.clone(),
            })
        }
    }

    #[async_trait]
    impl ProbeStrategy for Scripted {
        fn method(&self) -> ProbeMethod {
            self.method
        }

        async fn attempt(&self, _url: &ResolvedUrl) -> Result<Option<bool>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.answer)
        }
    }

    fn url() -> ResolvedUrl {
        ResolvedUrl::parse("http://mirrors.example.com/pypi/simple/").unwrap()
    }

    #[tokio::test]
    async fn test_stops_at_first_conclusive_answer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = NetworkProbe::with_strategies(
            vec![
                Scripted::boxed(ProbeMethod::Dns, None, &calls),
                Scripted::boxed(ProbeMethod::HttpHead, Some(true), &calls),
                Scripted::boxed(ProbeMethod::Icmp, Some(false), &calls),
            ],
            PROBE_TIMEOUT,
        );

        let result = probe.probe(&url()).await;
        assert!(result.reachable);
        assert_eq!(result.method, ProbeMethod::HttpHead);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dns_failure_is_final() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = NetworkProbe::with_strategies(
            vec![
                Scripted::boxed(ProbeMethod::Dns, Some(false), &calls),
                Scripted::boxed(ProbeMethod::HttpHead, Some(true), &calls),
            ],
            PROBE_TIMEOUT,
        );

        let result = probe.probe(&url()).await;
        assert!(!result.reachable);
        assert_eq!(result.method, ProbeMethod::Dns);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inconclusive_chain_is_unreachable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = NetworkProbe::with_strategies(
            vec![
                Scripted::boxed(ProbeMethod::Dns, None, &calls),
                Scripted::boxed(ProbeMethod::HttpHead, None, &calls),
            ],
            PROBE_TIMEOUT,
        );

        let result = probe.probe(&url()).await;
        assert!(!result.reachable);
        assert_eq!(result.method, ProbeMethod::HttpHead);
    }

    #[tokio::test]
    async fn test_timeout_falls_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow: Box<dyn ProbeStrategy> = Box::new(Scripted {
            method: ProbeMethod::PackageDryRun,
            answer: Some(true),
            delay: Duration::from_secs(30),
            calls: calls.clone(),
        });
        let probe = NetworkProbe::with_strategies(
            vec![slow, Scripted::boxed(ProbeMethod::HttpHead, Some(true), &calls)],
            Duration::from_millis(50),
        );

        let result = probe.probe(&url()).await;
        assert!(result.reachable);
        assert_eq!(result.method, ProbeMethod::HttpHead);
    }

    #[tokio::test]
    async fn test_results_memoised() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = NetworkProbe::with_strategies(
            vec![Scripted::boxed(ProbeMethod::HttpHead, Some(true), &calls)],
            PROBE_TIMEOUT,
        );

        probe.probe(&url()).await;
        probe.probe(&url()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_localhost_resolves() {
        let probe = NetworkProbe::with_strategies(Vec::new(), PROBE_TIMEOUT);
        assert!(probe.resolves("localhost").await);
    }

    fn caps(is_windows: bool, restricted_network: bool) -> Capabilities {
        Capabilities {
            is_windows,
            is_root: false,
            restricted_network,
            supports_direct_config_command: true,
            poetry_dir: crate::capabilities::ConfigDirTemplate::Xdg,
        }
    }

    fn methods(caps: &Capabilities) -> Vec<ProbeMethod> {
        strategy_chain(
            caps,
            Some(PathBuf::from("/usr/bin/pip")),
            Some(PathBuf::from("/bin/ping")),
            Client::new(),
        )
        .iter()
        .map(|s| s.method())
        .collect()
    }

    #[test]
    fn test_chain_order() {
        assert_eq!(
            methods(&caps(false, false)),
            vec![
                ProbeMethod::Dns,
                ProbeMethod::PackageDryRun,
                ProbeMethod::HttpHead,
                ProbeMethod::Icmp
            ]
        );
    }

    #[test]
    fn test_no_ping_on_windows_or_restricted_network() {
        for caps in [caps(true, false), caps(false, true)] {
            assert!(!methods(&caps).contains(&ProbeMethod::Icmp));
        }
    }

    #[test]
    fn test_chain_without_pip() {
        let chain = strategy_chain(&caps(false, false), None, None, Client::new());
        let methods: Vec<ProbeMethod> = chain.iter().map(|s| s.method()).collect();
        assert_eq!(methods, vec![ProbeMethod::Dns, ProbeMethod::HttpHead]);
    }

    #[tokio::test]
    async fn test_head_timeout_reports_client_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // 接受连接但从不应答
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(1))
            .no_proxy()
            .build()
            .unwrap();
        let strategy = HttpHeadStrategy::new(client, Duration::from_secs(1));
        let target = ResolvedUrl::parse(&format!("http://{}/simple/", addr)).unwrap();

        match strategy.attempt(&target).await {
            Err(MirrorError::ProbeTimeout { secs, .. }) => assert_eq!(secs, 1),
            other => panic!("expected a timeout, got {:?}", other),
        }
        server.abort();
    }

    #[cfg(unix)]
    mod dry_run {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        /// 假的 pip：往 `-d` 目录放一个 wheel，并记录目录位置
        fn fake_pip(dir: &Path, exit_code: i32) -> PathBuf {
            let marker = dir.join("dest.txt");
            let script = dir.join("pip");
            let body = format!(
                "#!/bin/sh\n\
                 while [ $# -gt 0 ]; do\n\
                   if [ \"$1\" = \"-d\" ]; then echo \"$2\" > '{}'; touch \"$2/six-1.16.0-py2.py3-none-any.whl\"; fi\n\
                   shift\n\
                 done\n\
                 exit {}\n",
                marker.display(),
                exit_code
            );
            std::fs::write(&script, body).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        fn recorded_dest(dir: &Path) -> PathBuf {
            let text = std::fs::read_to_string(dir.join("dest.txt")).unwrap();
            PathBuf::from(text.trim())
        }

        #[tokio::test]
        async fn test_download_dir_removed_on_success() {
            let dir = tempfile::tempdir().unwrap();
            let strategy = PackageDryRunStrategy::new(fake_pip(dir.path(), 0));

            let verdict = strategy.attempt(&url()).await.unwrap();
            assert_eq!(verdict, Some(true));
            assert!(!recorded_dest(dir.path()).exists());
        }

        #[tokio::test]
        async fn test_download_dir_removed_on_failure() {
            let dir = tempfile::tempdir().unwrap();
            let strategy = PackageDryRunStrategy::new(fake_pip(dir.path(), 1));

            let verdict = strategy.attempt(&url()).await.unwrap();
            assert_eq!(verdict, None);
            assert!(!recorded_dest(dir.path()).exists());
        }
    }
}

use crate::catalog::MirrorCatalog;
use crate::error::Result;
use crate::probe::Probe;
use crate::types::{MirrorSpec, ProbeResult, ResolvedUrl, Selection};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{debug, info};

/// 决定最终写入哪个 index url
pub struct SourceSelector<'a> {
    catalog: &'a MirrorCatalog,
    probe: &'a dyn Probe,
    strict: bool,
}

impl<'a> SourceSelector<'a> {
    pub fn new(catalog: &'a MirrorCatalog, probe: &'a dyn Probe, strict: bool) -> Self {
        Self {
            catalog,
            probe,
            strict,
        }
    }

    /// 选择镜像 url
    ///
    /// 逻辑:
    /// 1. 完整 url 原样返回，不探测
    /// 2. `force` 直接使用目录中的条目，不探测
    /// 3. 指定别名时只探测它自己的内网版本
    /// 4. 未指定别名时按优先级探测所有内网镜像，都不可达则使用默认公网镜像
    pub async fn select(
        &self,
        requested: Option<&str>,
        force: bool,
        verbose: bool,
    ) -> Result<Selection> {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());

        match requested {
            Some(raw) if raw.starts_with("http") => Ok(Selection {
                url: self.catalog.resolve(raw, self.strict)?,
                alias: None,
                probe: None,
            }),
            Some(name) if force => {
                let spec = self.catalog.lookup_or_default(name, self.strict)?;
                Ok(Selection {
                    url: self.catalog.resolve(&spec.alias, true)?,
                    alias: Some(spec.alias.clone()),
                    probe: None,
                })
            }
            Some(name) => {
                let spec = self.catalog.lookup_or_default(name, self.strict)?;
                self.select_alias(spec, verbose).await
            }
            None if force => self.public(self.catalog.default_spec(), None),
            None => self.select_any_inner(verbose).await,
        }
    }

    async fn select_alias(&self, spec: &MirrorSpec, verbose: bool) -> Result<Selection> {
        let Some(inner) = self.catalog.inner_of(spec) else {
            return self.public(spec, None);
        };

        let url = self.catalog.url_of(inner)?;
        let result = self.probe.probe(&url).await;
        report(&inner.alias, &result, verbose);

        if result.reachable {
            Ok(Selection {
                url,
                alias: Some(inner.alias.clone()),
                probe: Some(result),
            })
        } else {
            self.public(spec, Some(result))
        }
    }

    async fn select_any_inner(&self, verbose: bool) -> Result<Selection> {
        let candidates = self
            .catalog
            .inner_candidates()
            .into_iter()
            .map(|spec| self.catalog.url_of(spec).map(|url| (spec, url)))
            .collect::<Result<Vec<_>>>()?;

        let spinner = if verbose || candidates.is_empty() {
            ProgressBar::hidden()
        } else {
            spinner()
        };
        let winner = first_reachable(self.probe, &candidates, verbose).await;
        spinner.finish_and_clear();

        match winner {
            Some((index, result)) => {
                let (spec, url) = &candidates[index];
                Ok(Selection {
                    url: url.clone(),
                    alias: Some(spec.alias.clone()),
                    probe: Some(result),
                })
            }
            None => {
                debug!("no cloud-internal mirror reachable, using default");
                self.public(self.catalog.default_spec(), None)
            }
        }
    }

    fn public(&self, spec: &MirrorSpec, probe: Option<ProbeResult>) -> Result<Selection> {
        Ok(Selection {
            url: self.catalog.url_of(spec)?,
            alias: Some(spec.alias.clone()),
            probe,
        })
    }
}

/// 并发探测所有候选，返回优先级最高的可达项
///
/// 某个候选可达、且排在它前面的都已确认不可达时立即返回，剩下的探测直接丢弃
async fn first_reachable(
    probe: &dyn Probe,
    candidates: &[(&MirrorSpec, ResolvedUrl)],
    verbose: bool,
) -> Option<(usize, ProbeResult)> {
    let mut pending: FuturesUnordered<_> = candidates
        .iter()
        .enumerate()
        .map(|(i, (_, url))| async move { (i, probe.probe(url).await) })
        .collect();
    let mut results: Vec<Option<ProbeResult>> = vec![None; candidates.len()];

    while let Some((i, result)) = pending.next().await {
        report(&candidates[i].0.alias, &result, verbose);
        results[i] = Some(result);

        // 排在最前、尚未确认不可达的候选
        let leader = results
            .iter()
            .position(|r| r.as_ref().map_or(true, |r| r.reachable))?;
        if results[leader].is_some() {
            return results[leader].take().map(|r| (leader, r));
        }
    }
    None
}

fn report(alias: &str, result: &ProbeResult, verbose: bool) {
    let state = if result.reachable { "reachable" } else { "unreachable" };
    if verbose {
        println!(
            "{} ({}) is {} [{} probe]",
            alias, result.target, state, result.method
        );
    }
    info!(alias, target = %result.target, reachable = result.reachable, method = %result.method, "probe");
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Detecting cloud network...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

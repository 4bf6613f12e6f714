use crate::catalog::MirrorCatalog;
use crate::probe::Probe;
use crate::types::{ExtraIndexEntry, ResolvedUrl};
use tracing::{debug, warn};

/// 查找与主镜像配对的附加源
///
/// 尽力而为：出错一律返回 `None`，不影响主镜像的配置
pub struct ExtraIndexResolver<'a> {
    catalog: &'a MirrorCatalog,
    probe: &'a dyn Probe,
}

impl<'a> ExtraIndexResolver<'a> {
    pub fn new(catalog: &'a MirrorCatalog, probe: &'a dyn Probe) -> Self {
        Self { catalog, probe }
    }

    pub async fn resolve(&self, primary_host: &str, force: bool) -> Option<ExtraIndexEntry> {
        let pairing = self.catalog.extra_for(primary_host)?;
        let url = match ResolvedUrl::parse(&pairing.url) {
            Ok(url) => url,
            Err(e) => {
                warn!("ignoring extra index for {}: {}", primary_host, e);
                return None;
            }
        };

        if !force && !self.probe.resolves(url.dns_host()).await {
            debug!(extra = %url, "extra index does not resolve, skipping");
            return None;
        }
        Some(ExtraIndexEntry::new(url))
    }
}

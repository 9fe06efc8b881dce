use std::sync::Arc;

use tracing::debug;

use super::core::Mapper;
use crate::container::{Container, ContainerKind};
use crate::server::Request;

/// Router-level mapper: resolves the target Host from the request's
/// declared virtual-host name.
///
/// A request without a virtual-host name gets the router's configured
/// default host substituted (and, with writeback, recorded back onto the
/// request). Host names compare case-insensitively.
pub struct HostMapper;

impl Mapper for HostMapper {
    fn map(
        &self,
        router: &Arc<Container>,
        request: &mut Request,
        writeback: bool,
    ) -> anyhow::Result<Option<Arc<Container>>> {
        let declared = request.vhost.clone();
        let name = match declared {
            Some(name) => name,
            None => {
                let default = router
                    .router_state()
                    .map(|s| s.default_host.clone())
                    .unwrap_or_default();
                if default.is_empty() {
                    return Ok(None);
                }
                if writeback {
                    request.vhost = Some(default.clone());
                }
                default
            }
        };
        let host = router.find_children().into_iter().find(|c| {
            matches!(c.kind(), ContainerKind::Host(_)) && c.name().eq_ignore_ascii_case(&name)
        });
        if host.is_none() {
            debug!(request_id = %request.id, vhost = %name, "No host matched");
        }
        if let (true, Some(host)) = (writeback, &host) {
            request.host = Some(Arc::clone(host));
        }
        Ok(host)
    }
}

use std::sync::Arc;

use tracing::debug;

use super::core::{decode_target, Mapper};
use crate::container::Container;
use crate::server::Request;

/// Host-level mapper: resolves the Application by longest matching
/// contextPath prefix over the host's registry.
///
/// The raw target is percent-decoded first; a decode failure is an error
/// (the checkpoint surfaces it as bad-request). With writeback the matched
/// contextPath — or the empty string when nothing matched — is recorded on
/// the request, along with the decoded path.
pub struct AppMapper;

impl Mapper for AppMapper {
    fn map(
        &self,
        host: &Arc<Container>,
        request: &mut Request,
        writeback: bool,
    ) -> anyhow::Result<Option<Arc<Container>>> {
        let decoded = decode_target(request)?;

        // Longest prefix wins: try the whole path, then strip one trailing
        // segment at a time, ending at "" (the root application).
        let mut matched: Option<(String, Arc<Container>)> = None;
        let mut candidate = decoded.as_str();
        loop {
            if let Some(app) = host.find_app(candidate) {
                matched = Some((candidate.to_string(), app));
                break;
            }
            match candidate.rfind('/') {
                Some(idx) => candidate = &candidate[..idx],
                None => break,
            }
        }

        if writeback {
            request.decoded_path = Some(decoded);
            match &matched {
                Some((context_path, app)) => {
                    request.context_path = context_path.clone();
                    request.application = Some(Arc::clone(app));
                }
                None => request.context_path = String::new(),
            }
        }
        if matched.is_none() {
            debug!(request_id = %request.id, path = %request.raw_path(), "No application matched");
        }
        Ok(matched.map(|(_, app)| app))
    }
}

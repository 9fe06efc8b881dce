use std::sync::Arc;

use anyhow::Context;

use crate::container::Container;
use crate::server::Request;

/// Resolves a request to a child container at one hierarchy level.
///
/// `writeback` controls whether match metadata is recorded onto the
/// request; with `writeback = false` a mapper is a pure probe and must not
/// mutate the request (dry-run mode).
///
/// `Ok(None)` is "no match" (a routing failure, surfaced as not-found by
/// the calling checkpoint); `Err` is reserved for malformed input such as
/// an undecodable target.
pub trait Mapper: Send + Sync {
    fn map(
        &self,
        container: &Arc<Container>,
        request: &mut Request,
        writeback: bool,
    ) -> anyhow::Result<Option<Arc<Container>>>;
}

/// Percent-decode the request's raw target path.
pub(crate) fn decode_target(request: &Request) -> anyhow::Result<String> {
    let raw = request.raw_path();
    let decoded = urlencoding::decode(raw)
        .with_context(|| format!("decoding request target '{raw}'"))?;
    Ok(decoded.into_owned())
}

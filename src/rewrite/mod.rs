pub mod css;
pub mod html;
pub mod inject;

pub use css::rewrite_css;
pub use html::rewrite_html;

use url::Url;

use crate::{codec, resolve};

/// Turn one document reference into its gateway path, or `None` when the
/// reference must stay as-is: non-proxyable scheme, malformed, or already
/// pointing back at us (rewriting again would double-encode it).
pub(crate) fn proxy_target(reference: &str, base: &Url) -> Option<String> {
    let reference = reference.trim();
    if reference.starts_with("/proxy/") {
        return None;
    }
    let absolute = resolve::resolve(reference, base)?;
    Some(format!("/proxy/{}", codec::encode(&absolute)))
}

use std::cell::{Cell, RefCell};

use lol_html::html_content::{ContentType, Element};
use lol_html::{element, text, HtmlRewriter, Settings};
use tracing::debug;
use url::Url;

use super::{css::rewrite_css, inject, proxy_target};

/// Frame-escape targets stripped from every element.
const ESCAPING_TARGETS: &[&str] = &["_top", "_parent", "_blank"];

/// Rewrite a fetched document so every navigable or loadable reference routes
/// back through the gateway, then arm it with the anti-detection script.
///
/// Best-effort by contract: references that don't resolve stay as they are,
/// and if the rewriter itself fails the original markup is returned rather
/// than nothing.
pub fn rewrite_html(html: &str, base: &Url) -> String {
    let injected = Cell::new(false);
    let style_buf = RefCell::new(String::new());
    let mut output = Vec::with_capacity(html.len() + inject::FRAME_SHIELD_JS.len());

    let result = {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    // <base> would fight our proxy-relative paths.
                    element!("base", |el| {
                        el.remove();
                        Ok(())
                    }),
                    element!("[target]", |el| {
                        if let Some(target) = el.get_attribute("target") {
                            if ESCAPING_TARGETS
                                .iter()
                                .any(|t| target.eq_ignore_ascii_case(t))
                            {
                                el.remove_attribute("target");
                            }
                        }
                        Ok(())
                    }),
                    element!("[onclick]", |el| {
                        if let Some(handler) = el.get_attribute("onclick") {
                            if handler.contains("top.")
                                || handler.contains("parent.")
                                || handler.contains("window.open")
                            {
                                el.remove_attribute("onclick");
                            }
                        }
                        Ok(())
                    }),
                    element!("a[href], area[href]", |el| {
                        rewrite_attr(el, "href", base);
                        Ok(())
                    }),
                    element!("form[action]", |el| {
                        rewrite_attr(el, "action", base);
                        Ok(())
                    }),
                    element!(
                        "img[src], script[src], iframe[src], embed[src], source[src], \
                         audio[src], video[src], input[src], track[src]",
                        |el| {
                            rewrite_attr(el, "src", base);
                            Ok(())
                        }
                    ),
                    element!("link[href]", |el| {
                        rewrite_attr(el, "href", base);
                        Ok(())
                    }),
                    element!("video[poster]", |el| {
                        rewrite_attr(el, "poster", base);
                        Ok(())
                    }),
                    element!("object[data]", |el| {
                        rewrite_attr(el, "data", base);
                        Ok(())
                    }),
                    element!("img[srcset], source[srcset]", |el| {
                        if let Some(srcset) = el.get_attribute("srcset") {
                            el.set_attribute("srcset", &rewrite_srcset(&srcset, base))
                                .ok();
                        }
                        Ok(())
                    }),
                    element!("[style]", |el| {
                        if let Some(style) = el.get_attribute("style") {
                            el.set_attribute("style", &rewrite_css(&style, base)).ok();
                        }
                        Ok(())
                    }),
                    // CSP / frame-ancestors meta tags would reject the
                    // injected script or the embedding frame itself.
                    element!("meta[http-equiv]", |el| {
                        if let Some(equiv) = el.get_attribute("http-equiv") {
                            if equiv.eq_ignore_ascii_case("content-security-policy")
                                || equiv.eq_ignore_ascii_case("x-frame-options")
                            {
                                el.remove();
                            }
                        }
                        Ok(())
                    }),
                    element!("head", |el| {
                        if !injected.get() {
                            el.prepend(&inject::script_tag(), ContentType::Html);
                            injected.set(true);
                        }
                        Ok(())
                    }),
                    // Style text arrives in chunks; buffer until the node ends
                    // so url() calls can't be split mid-rewrite.
                    text!("style", |chunk| {
                        style_buf.borrow_mut().push_str(chunk.as_str());
                        if chunk.last_in_text_node() {
                            let rewritten = rewrite_css(&style_buf.borrow(), base);
                            style_buf.borrow_mut().clear();
                            chunk.replace(&rewritten, ContentType::Html);
                        } else {
                            chunk.remove();
                        }
                        Ok(())
                    }),
                ],
                ..Settings::default()
            },
            |c: &[u8]| output.extend_from_slice(c),
        );

        rewriter.write(html.as_bytes()).and_then(|_| rewriter.end())
    };

    if let Err(e) = result {
        debug!(error = %e, "html rewrite failed, serving original markup");
        return html.to_string();
    }

    let mut out = String::from_utf8_lossy(&output).into_owned();
    if !injected.get() {
        // No <head> in the document; the shield still has to run first.
        out.insert_str(0, &inject::script_tag());
    }
    out
}

fn rewrite_attr(el: &mut Element, attr: &str, base: &Url) {
    if let Some(value) = el.get_attribute(attr) {
        if let Some(proxied) = proxy_target(&value, base) {
            el.set_attribute(attr, &proxied).ok();
        }
    }
}

/// Rewrite each srcset candidate URL independently, keeping its descriptor.
fn rewrite_srcset(srcset: &str, base: &Url) -> String {
    srcset
        .split(',')
        .map(|candidate| {
            let candidate = candidate.trim();
            let mut parts = candidate.splitn(2, char::is_whitespace);
            let url_part = parts.next().unwrap_or("");
            let descriptor = parts.next().map(str::trim);
            let rewritten =
                proxy_target(url_part, base).unwrap_or_else(|| url_part.to_string());
            match descriptor {
                Some(d) => format!("{rewritten} {d}"),
                None => rewritten,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

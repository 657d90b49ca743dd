//! URL canonicalisation, platform detection and tag normalisation.
//!
//! Two shares of the same post must collapse onto one `(platform,
//! canonical_url)` key, so everything that varies between share buttons
//! (tracking parameters, mobile hosts, fragments) is stripped here.

use crate::error::{AppError, AppResult};
use std::collections::HashSet;
use url::Url;

/// Platform name for hosts that no dedicated parser handles.
pub const UNIVERSAL_PLATFORM: &str = "universal";

/// Query parameters dropped during canonicalisation.
const TRACKING_PARAMS: &[&str] = &[
    "spm",
    "spm_id_from",
    "from_spmid",
    "share_source",
    "share_medium",
    "share_plat",
    "share_session_id",
    "share_tag",
    "share_from",
    "si",
    "fbclid",
    "gclid",
    "igshid",
    "vd_source",
    "ref_src",
    "unique_k",
    "bbid",
    "ts",
    "xsec_source",
];

/// Host suffix to platform name.
const PLATFORM_HOSTS: &[(&str, &str)] = &[
    ("twitter.com", "twitter"),
    ("x.com", "twitter"),
    ("bilibili.com", "bilibili"),
    ("b23.tv", "bilibili"),
    ("weibo.com", "weibo"),
    ("weibo.cn", "weibo"),
    ("xiaohongshu.com", "xiaohongshu"),
    ("xhslink.com", "xiaohongshu"),
    ("zhihu.com", "zhihu"),
    ("douyin.com", "douyin"),
    ("iesdouyin.com", "douyin"),
    ("youtube.com", "youtube"),
    ("youtu.be", "youtube"),
    ("t.me", "telegram"),
    ("telegram.me", "telegram"),
];

/// A canonicalised share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLink {
    /// Detected platform name.
    pub platform: String,
    /// Canonical URL, stable across share variants.
    pub canonical_url: String,
}

/// Canonicalise a shared URL and detect its platform.
///
/// Only `http` and `https` URLs are accepted.
pub fn canonicalize_url(raw: &str) -> AppResult<CanonicalLink> {
    let url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("url has no host".to_string()))?
        .to_lowercase();
    let host = strip_host_prefix(&host);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort();

    let mut canonical = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        canonical.push_str(&format!(":{port}"));
    }
    canonical.push_str(url.path().trim_end_matches('/'));
    if !params.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        canonical.push('?');
        canonical.push_str(&query);
    }

    Ok(CanonicalLink {
        platform: detect_platform(host).to_string(),
        canonical_url: canonical,
    })
}

/// Detect the platform from a host name.
#[must_use]
pub fn detect_platform(host: &str) -> &'static str {
    let host = strip_host_prefix(host);
    PLATFORM_HOSTS
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{domain}")))
        .map_or(UNIVERSAL_PLATFORM, |(_, platform)| *platform)
}

/// Trim tags, drop empty ones and de-duplicate case-insensitively.
///
/// The first spelling of a tag wins.
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter_map(|tag| {
            let tag = tag.as_ref().trim();
            (!tag.is_empty() && seen.insert(tag.to_lowercase())).then(|| tag.to_string())
        })
        .collect()
}

fn strip_host_prefix(host: &str) -> &str {
    host.strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(host)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

// src/fetch/resolve.rs
// Pure descriptor-to-feed-URL resolution. One strategy per source kind;
// anything that matches no known shape fails before the network is touched.

use crate::source::{Source, SourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError(pub String);

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unresolvable source url: {}", self.0)
    }
}

/// First path/query segment after `marker`, with trailing `/...` and `?...`
/// stripped. Empty segments resolve to None.
fn segment_after<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let rest = url.split(marker).nth(1)?;
    let seg = rest
        .split('/')
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default();
    (!seg.is_empty()).then_some(seg)
}

fn resolve_youtube(url: &str) -> Result<String, ResolveError> {
    if let Some(channel_id) = segment_after(url, "youtube.com/channel/") {
        return Ok(format!(
            "https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}"
        ));
    }
    if let Some(handle) = segment_after(url, "youtube.com/@") {
        return Ok(format!(
            "https://www.youtube.com/feeds/videos.xml?user={handle}"
        ));
    }
    if let Some(user) = segment_after(url, "youtube.com/user/") {
        return Ok(format!(
            "https://www.youtube.com/feeds/videos.xml?user={user}"
        ));
    }
    if let Some(name) = segment_after(url, "youtube.com/c/") {
        return Ok(format!(
            "https://www.youtube.com/feeds/videos.xml?user={name}"
        ));
    }
    if url.contains("list=") {
        let playlist_id = url
            .split("list=")
            .nth(1)
            .unwrap_or_default()
            .split('&')
            .next()
            .unwrap_or_default();
        if !playlist_id.is_empty() {
            return Ok(format!(
                "https://www.youtube.com/feeds/videos.xml?playlist_id={playlist_id}"
            ));
        }
    }
    Err(ResolveError(url.to_string()))
}

fn resolve_social(url: &str, hub_base: &str) -> Result<String, ResolveError> {
    let base = hub_base.trim_end_matches('/');
    if let Some(page) = segment_after(url, "facebook.com/") {
        return Ok(format!("{base}/facebook/page/{page}"));
    }
    if let Some(user) = segment_after(url, "instagram.com/") {
        return Ok(format!("{base}/instagram/user/{user}"));
    }
    if let Some(user) = segment_after(url, "tiktok.com/@") {
        return Ok(format!("{base}/tiktok/user/{user}"));
    }
    Err(ResolveError(url.to_string()))
}

/// Resolve a source descriptor to the concrete feed URL to retrieve.
pub fn resolve_feed_url(source: &Source, hub_base: &str) -> Result<String, ResolveError> {
    let url = source.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ResolveError(url.to_string()));
    }
    match source.kind {
        SourceKind::Web => Ok(url.to_string()),
        SourceKind::Youtube => resolve_youtube(url),
        SourceKind::Social => resolve_social(url, hub_base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    const HUB: &str = "https://rsshub.app/";

    fn src(kind: SourceKind, url: &str) -> Source {
        Source {
            kind,
            url: url.to_string(),
            ..Source::default()
        }
    }

    #[test]
    fn youtube_shapes_map_to_feed_urls() {
        let cases = [
            (
                "https://www.youtube.com/channel/UCabc123/videos",
                "https://www.youtube.com/feeds/videos.xml?channel_id=UCabc123",
            ),
            (
                "https://www.youtube.com/@somehandle?tab=videos",
                "https://www.youtube.com/feeds/videos.xml?user=somehandle",
            ),
            (
                "https://www.youtube.com/user/legacyname",
                "https://www.youtube.com/feeds/videos.xml?user=legacyname",
            ),
            (
                "https://www.youtube.com/c/CustomName/featured",
                "https://www.youtube.com/feeds/videos.xml?user=CustomName",
            ),
            (
                "https://www.youtube.com/playlist?list=PL123&index=1",
                "https://www.youtube.com/feeds/videos.xml?playlist_id=PL123",
            ),
        ];
        for (input, expected) in cases {
            let got = resolve_feed_url(&src(SourceKind::Youtube, input), HUB).unwrap();
            assert_eq!(got, expected, "for {input}");
        }
    }

    #[test]
    fn social_shapes_route_through_hub() {
        let got =
            resolve_feed_url(&src(SourceKind::Social, "https://facebook.com/somepage"), HUB)
                .unwrap();
        assert_eq!(got, "https://rsshub.app/facebook/page/somepage");

        let got = resolve_feed_url(
            &src(SourceKind::Social, "https://www.instagram.com/someuser/"),
            HUB,
        )
        .unwrap();
        assert_eq!(got, "https://rsshub.app/instagram/user/someuser");

        let got = resolve_feed_url(
            &src(SourceKind::Social, "https://www.tiktok.com/@someone?lang=en"),
            HUB,
        )
        .unwrap();
        assert_eq!(got, "https://rsshub.app/tiktok/user/someone");
    }

    #[test]
    fn unresolvable_descriptors_fail_without_network() {
        assert!(resolve_feed_url(&src(SourceKind::Youtube, "https://example.org/"), HUB).is_err());
        assert!(resolve_feed_url(&src(SourceKind::Social, "https://example.org/"), HUB).is_err());
        assert!(resolve_feed_url(&src(SourceKind::Web, "ftp://example.org/feed"), HUB).is_err());
        assert!(resolve_feed_url(&src(SourceKind::Web, ""), HUB).is_err());
    }

    #[test]
    fn web_passes_through() {
        let got =
            resolve_feed_url(&src(SourceKind::Web, "https://example.org/rss.xml"), HUB).unwrap();
        assert_eq!(got, "https://example.org/rss.xml");
    }
}

//! Streaming platform detection and track/album ID extraction from share URLs.
//!
//! Detection is purely host based; no request is made. Both functions return
//! `None` for input that does not parse as an absolute URL.

use crate::error::{LinkError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// A platform the lookup service returns links for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    Spotify,
    Itunes,
    AppleMusic,
    Youtube,
    YoutubeMusic,
    Google,
    GoogleStore,
    Pandora,
    Deezer,
    Tidal,
    AmazonStore,
    AmazonMusic,
    Soundcloud,
    Napster,
    Yandex,
    Spinrilla,
}

impl Platform {
    pub const ALL: [Platform; 16] = [
        Platform::Spotify,
        Platform::Itunes,
        Platform::AppleMusic,
        Platform::Youtube,
        Platform::YoutubeMusic,
        Platform::Google,
        Platform::GoogleStore,
        Platform::Pandora,
        Platform::Deezer,
        Platform::Tidal,
        Platform::AmazonStore,
        Platform::AmazonMusic,
        Platform::Soundcloud,
        Platform::Napster,
        Platform::Yandex,
        Platform::Spinrilla,
    ];

    /// Name used by the lookup service (`linksByPlatform` keys, `platform=`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::Itunes => "itunes",
            Platform::AppleMusic => "appleMusic",
            Platform::Youtube => "youtube",
            Platform::YoutubeMusic => "youtubeMusic",
            Platform::Google => "google",
            Platform::GoogleStore => "googleStore",
            Platform::Pandora => "pandora",
            Platform::Deezer => "deezer",
            Platform::Tidal => "tidal",
            Platform::AmazonStore => "amazonStore",
            Platform::AmazonMusic => "amazonMusic",
            Platform::Soundcloud => "soundcloud",
            Platform::Napster => "napster",
            Platform::Yandex => "yandex",
            Platform::Spinrilla => "spinrilla",
        }
    }

    /// Case-insensitive lookup by service name.
    pub fn from_name_ignore_case(name: &str) -> Option<Platform> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| LinkError::validation(format!("Unsupported platform: {}", s)))
    }
}

static TRACK_OR_ALBUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?:track|album)/([^/?#]+)").expect("valid regex"));

static APPLE_NUMERIC_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:id)?(\d+)$").expect("valid regex"));

fn parse(url: &str) -> Option<(Url, String)> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some((parsed, host))
}

/// `host` is `domain` or one of its subdomains.
fn host_is(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn detect_host(url: &Url, host: &str) -> Option<Platform> {
    let labels: Vec<&str> = host.split('.').collect();
    let has_label = |label: &str| labels.iter().any(|l| *l == label);

    let platform = if host_is(host, "music.apple.com") {
        Platform::AppleMusic
    } else if host_is(host, "itunes.apple.com") {
        Platform::Itunes
    } else if host_is(host, "music.youtube.com") {
        Platform::YoutubeMusic
    } else if host_is(host, "youtube.com") || host_is(host, "youtu.be") {
        Platform::Youtube
    } else if host_is(host, "play.google.com") {
        if url.path().starts_with("/store") {
            Platform::GoogleStore
        } else {
            Platform::Google
        }
    } else if host_is(host, "spotify.com") || host == "spotify.link" {
        Platform::Spotify
    } else if host_is(host, "pandora.com") {
        Platform::Pandora
    } else if host_is(host, "deezer.com") || host_is(host, "deezer.page.link") {
        Platform::Deezer
    } else if host_is(host, "tidal.com") {
        Platform::Tidal
    } else if has_label("amazon") {
        if labels.first() == Some(&"music") {
            Platform::AmazonMusic
        } else {
            Platform::AmazonStore
        }
    } else if host_is(host, "soundcloud.com") {
        Platform::Soundcloud
    } else if host_is(host, "napster.com") {
        Platform::Napster
    } else if has_label("yandex") {
        Platform::Yandex
    } else if host_is(host, "spinrilla.com") {
        Platform::Spinrilla
    } else {
        return None;
    };

    Some(platform)
}

/// Detect which platform a share URL belongs to.
///
/// ```
/// use core_links::platform::{detect_platform, Platform};
///
/// assert_eq!(
///     detect_platform("https://open.spotify.com/track/4Km5HrUvYTaSUfiSGPJeQR"),
///     Some(Platform::Spotify)
/// );
/// assert_eq!(detect_platform("not a url"), None);
/// ```
pub fn detect_platform(url: &str) -> Option<Platform> {
    let (parsed, host) = parse(url)?;
    detect_host(&parsed, &host)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Extract the platform specific track or album ID from a share URL.
pub fn extract_id(url: &str) -> Option<String> {
    let (parsed, host) = parse(url)?;

    match detect_host(&parsed, &host) {
        Some(Platform::Spotify | Platform::Deezer | Platform::Tidal | Platform::Napster) => {
            TRACK_OR_ALBUM
                .captures_iter(parsed.path())
                .last()
                .map(|caps| caps[1].to_string())
                .or_else(|| last_segment(&parsed))
        }
        Some(Platform::AppleMusic | Platform::Itunes) => query_param(&parsed, "i").or_else(|| {
            parsed.path_segments()?.rev().find_map(|segment| {
                APPLE_NUMERIC_SEGMENT
                    .captures(segment)
                    .map(|caps| caps[1].to_string())
            })
        }),
        Some(Platform::Youtube | Platform::YoutubeMusic) => {
            query_param(&parsed, "v").or_else(|| {
                if host_is(&host, "youtu.be") {
                    last_segment(&parsed)
                } else {
                    None
                }
            })
        }
        _ => last_segment(&parsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_names_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
            let json = serde_json::to_value(platform).unwrap();
            assert_eq!(json, platform.as_str());
        }
        assert_eq!(
            "tiktok".parse::<Platform>().unwrap_err().to_string(),
            "Unsupported platform: tiktok"
        );
        assert_eq!(
            Platform::from_name_ignore_case("APPLEMUSIC"),
            Some(Platform::AppleMusic)
        );
    }

    #[test]
    fn test_detect_platform() {
        let cases = [
            ("https://open.spotify.com/track/4Km5HrUvYTaSUfiSGPJeQR", Platform::Spotify),
            ("https://music.apple.com/us/album/x/1493120897", Platform::AppleMusic),
            ("https://itunes.apple.com/us/album/x/1493120897", Platform::Itunes),
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Platform::Youtube),
            ("https://youtu.be/dQw4w9WgXcQ", Platform::Youtube),
            ("https://music.youtube.com/watch?v=abc", Platform::YoutubeMusic),
            ("https://play.google.com/music/m/T123", Platform::Google),
            ("https://play.google.com/store/music/album?id=B1", Platform::GoogleStore),
            ("https://www.pandora.com/artist/x/y/TR123", Platform::Pandora),
            ("https://www.deezer.com/track/3135556", Platform::Deezer),
            ("https://deezer.page.link/abc", Platform::Deezer),
            ("https://listen.tidal.com/track/1234", Platform::Tidal),
            ("https://music.amazon.com/albums/B01", Platform::AmazonMusic),
            ("https://www.amazon.co.uk/dp/B01", Platform::AmazonStore),
            ("https://soundcloud.com/artist/track", Platform::Soundcloud),
            ("https://us.napster.com/artist/x/album/y/track/z", Platform::Napster),
            ("https://music.yandex.ru/album/1/track/2", Platform::Yandex),
            ("https://spinrilla.com/songs/123-x", Platform::Spinrilla),
        ];

        for (url, expected) in cases {
            assert_eq!(detect_platform(url), Some(expected), "{}", url);
        }
    }

    #[test]
    fn test_detect_rejects_unknown_and_invalid() {
        assert_eq!(detect_platform("https://example.com/track/1"), None);
        assert_eq!(detect_platform("https://notspotify.com/track/1"), None);
        assert_eq!(detect_platform("invalid-url"), None);
        assert_eq!(detect_platform(""), None);
    }

    #[test]
    fn test_extract_track_and_album_ids() {
        assert_eq!(
            extract_id("https://open.spotify.com/track/4Km5HrUvYTaSUfiSGPJeQR?si=abc").as_deref(),
            Some("4Km5HrUvYTaSUfiSGPJeQR")
        );
        assert_eq!(
            extract_id("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3").as_deref(),
            Some("1DFixLWuPkv3KT3TnV35m3")
        );
        assert_eq!(
            extract_id("https://www.deezer.com/en/track/3135556").as_deref(),
            Some("3135556")
        );
        assert_eq!(
            extract_id("https://us.napster.com/artist/a/album/b/track/tra.262370").as_deref(),
            Some("tra.262370")
        );
    }

    #[test]
    fn test_extract_apple_ids() {
        assert_eq!(
            extract_id("https://music.apple.com/us/album/blinding-lights/1493120897?i=1493120900")
                .as_deref(),
            Some("1493120900")
        );
        assert_eq!(
            extract_id("https://itunes.apple.com/us/album/watermelon-sugar/1493120898").as_deref(),
            Some("1493120898")
        );
        assert_eq!(
            extract_id("https://itunes.apple.com/us/album/x/id987654321").as_deref(),
            Some("987654321")
        );
        assert_eq!(extract_id("https://music.apple.com/us/browse"), None);
    }

    #[test]
    fn test_extract_youtube_ids() {
        assert_eq!(
            extract_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_id("https://youtu.be/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(extract_id("https://www.youtube.com/feed/trending"), None);
    }

    #[test]
    fn test_extract_falls_back_to_last_segment() {
        assert_eq!(
            extract_id("https://soundcloud.com/artist/some-track/").as_deref(),
            Some("some-track")
        );
        assert_eq!(extract_id("invalid-url"), None);
    }
}

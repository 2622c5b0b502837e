//! Destination platforms and RTMP ingest URL resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::{RestreamDestination, SavedConfig};

/// Where the user wants the stream to end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Watch in the control panel only; always managed, never relayed.
    #[default]
    Here,
    Youtube,
    Twitch,
    Instagram,
    /// User-supplied RTMP URL.
    Other,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Here,
        Platform::Youtube,
        Platform::Twitch,
        Platform::Instagram,
        Platform::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Here => "here",
            Platform::Youtube => "youtube",
            Platform::Twitch => "twitch",
            Platform::Instagram => "instagram",
            Platform::Other => "other",
        }
    }

    /// RTMP ingest base for the well-known platforms.
    pub fn ingest_base(&self) -> Option<&'static str> {
        match self {
            Platform::Youtube => Some("rtmps://a.rtmps.youtube.com/live2"),
            Platform::Twitch => Some("rtmps://live.twitch.tv/app"),
            Platform::Instagram => Some("rtmps://live-upload.instagram.com:443/rtmp"),
            Platform::Here | Platform::Other => None,
        }
    }

    /// Whether this platform takes a stream key (vs. a full custom URL).
    pub fn needs_stream_key(&self) -> bool {
        self.ingest_base().is_some()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown platform: {}", s))
    }
}

/// Resolve the RTMP URL a configuration points at: the custom URL for
/// "other", `{base}/{key}` for the well-known platforms, nothing for "here"
/// or when the key/URL is blank.
pub fn resolve_rtmp_url(config: &SavedConfig) -> Option<String> {
    match config.platform {
        Platform::Here => None,
        Platform::Other => {
            let url = config.custom_rtmp_url.trim();
            (!url.is_empty()).then(|| url.to_string())
        }
        platform => {
            let key = config.stream_key.trim();
            let base = platform.ingest_base()?;
            (!key.is_empty()).then(|| format!("{}/{}", base, key))
        }
    }
}

/// Relay target for a managed stream, labelled with the platform name.
pub fn restream_destination(config: &SavedConfig) -> Option<RestreamDestination> {
    resolve_rtmp_url(config).map(|url| RestreamDestination {
        url,
        name: config.platform.as_str().to_string(),
    })
}

/// Destinations for an explicit list of relay URLs.
pub fn numbered_destinations(urls: &[String]) -> Vec<RestreamDestination> {
    urls.iter()
        .enumerate()
        .map(|(i, url)| RestreamDestination {
            url: url.clone(),
            name: format!("destination-{}", i + 1),
        })
        .collect()
}

/// Hide the stream key (last path segment) of an RTMP URL for display.
pub fn mask_stream_key(url: &str) -> String {
    let path_start = url.find("://").map_or(0, |i| i + 3);
    match url[path_start..].rfind('/') {
        Some(idx) => format!("{}/****", &url[..path_start + idx]),
        None => url.to_string(),
    }
}

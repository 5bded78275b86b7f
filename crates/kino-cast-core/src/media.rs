//! Cast media descriptions
//!
//! Content-type sniffing for the stream URL and the load request handed to a
//! Cast receiver.

use serde::{Deserialize, Serialize};
use url::Url;

/// Hosts whose page URLs are cast as progressive MP4
const VIDEO_HOSTS: [&str; 2] = ["youtube.com", "youtu.be"];

/// Content type announced to the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamContentType {
    #[serde(rename = "application/vnd.apple.mpegurl")]
    Hls,
    #[serde(rename = "application/dash+xml")]
    Dash,
    #[serde(rename = "video/mp4")]
    Mp4,
}

impl StreamContentType {
    /// MIME type string
    pub fn mime(&self) -> &'static str {
        match self {
            StreamContentType::Hls => "application/vnd.apple.mpegurl",
            StreamContentType::Dash => "application/dash+xml",
            StreamContentType::Mp4 => "video/mp4",
        }
    }
}

impl std::fmt::Display for StreamContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime())
    }
}

/// Detect the content type of a stream URL
///
/// Absolute URLs are judged by path extension, then by host. Anything that
/// does not parse falls back to a substring check on the raw text. Unknown
/// streams default to HLS.
pub fn detect_content_type(stream_url: &str) -> StreamContentType {
    if let Ok(url) = Url::parse(stream_url) {
        let path = url.path().to_lowercase();
        if let Some(content_type) = by_extension(&path) {
            return content_type;
        }
        if let Some(host) = url.host_str() {
            let host = host.to_lowercase();
            if VIDEO_HOSTS
                .iter()
                .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
            {
                return StreamContentType::Mp4;
            }
        }
        return StreamContentType::Hls;
    }

    let raw = stream_url.to_lowercase();
    if raw.contains(".m3u8") {
        StreamContentType::Hls
    } else if raw.contains(".mpd") {
        StreamContentType::Dash
    } else if raw.contains(".mp4") || VIDEO_HOSTS.iter().any(|h| raw.contains(h)) {
        StreamContentType::Mp4
    } else {
        StreamContentType::Hls
    }
}

fn by_extension(path: &str) -> Option<StreamContentType> {
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        Some(StreamContentType::Hls)
    } else if path.ends_with(".mpd") {
        Some(StreamContentType::Dash)
    } else if path.ends_with(".mp4") {
        Some(StreamContentType::Mp4)
    } else {
        None
    }
}

/// Receiver stream type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamType {
    Buffered,
    Live,
    None,
}

/// Generic media metadata shown on the receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    pub subtitle: String,
}

/// Media description for a Cast load request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub content_id: String,
    pub content_type: StreamContentType,
    pub stream_type: StreamType,
    /// `None` for live streams
    pub duration: Option<f64>,
    pub metadata: MediaMetadata,
}

/// Media load request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub media: MediaInfo,
    pub autoplay: bool,
    pub current_time: f64,
}

impl LoadRequest {
    /// Live stream request that autoplays from position zero
    pub fn live(stream_url: &str, metadata: MediaMetadata) -> Self {
        Self {
            media: MediaInfo {
                content_id: stream_url.to_string(),
                content_type: detect_content_type(stream_url),
                stream_type: StreamType::Live,
                duration: None,
                metadata,
            },
            autoplay: true,
            current_time: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(detect_content_type("https://x/stream.m3u8"), StreamContentType::Hls);
        assert_eq!(detect_content_type("https://x/manifest.mpd"), StreamContentType::Dash);
        assert_eq!(detect_content_type("https://x/clip.MP4"), StreamContentType::Mp4);
        assert_eq!(
            detect_content_type("https://cdn.example.com/live/index.m3u8?token=abc"),
            StreamContentType::Hls
        );
    }

    #[test]
    fn test_detect_video_host() {
        assert_eq!(
            detect_content_type("https://www.youtube.com/watch?v=abc"),
            StreamContentType::Mp4
        );
        assert_eq!(detect_content_type("https://youtu.be/abc"), StreamContentType::Mp4);
    }

    #[test]
    fn test_detect_defaults_to_hls() {
        assert_eq!(detect_content_type("https://x/stream.webm"), StreamContentType::Hls);
        assert_eq!(detect_content_type("https://x/live"), StreamContentType::Hls);
        assert_eq!(detect_content_type("/relative/path.mpd"), StreamContentType::Dash);
        assert_eq!(detect_content_type("not a url"), StreamContentType::Hls);
    }

    #[test]
    fn test_live_load_request() {
        let request = LoadRequest::live(
            "https://x/stream.m3u8",
            MediaMetadata {
                title: "Live".into(),
                subtitle: "Channel".into(),
            },
        );
        assert!(request.autoplay);
        assert_eq!(request.current_time, 0.0);
        assert_eq!(request.media.stream_type, StreamType::Live);
        assert_eq!(request.media.duration, None);
        assert_eq!(request.media.content_type.mime(), "application/vnd.apple.mpegurl");
    }
}

use serde::{Deserialize, Serialize};

/// First video stream of a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    pub codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<f64>,
    pub bitrate: Option<i64>,
    pub bit_depth: Option<i64>,
    pub color_primaries: Option<String>,
    pub color_transfer: Option<String>,
}

/// First audio stream of a file, plus the languages of every audio stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    pub codec: Option<String>,
    pub channels: Option<i64>,
    pub sample_rate: Option<i64>,
    pub bitrate: Option<i64>,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleSummary {
    pub count: u32,
    pub languages: Vec<String>,
}

/// Technical metadata for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub container_format: Option<String>,
    pub duration_secs: Option<f64>,
    pub probe_score: Option<i64>,
    pub video: Option<VideoStream>,
    pub audio: Option<AudioStream>,
    pub subtitles: SubtitleSummary,
}

impl ProbeReport {
    /// "3840x2160", when both dimensions are known.
    pub fn resolution(&self) -> Option<String> {
        let video = self.video.as_ref()?;
        Some(format!("{}x{}", video.width?, video.height?))
    }
}

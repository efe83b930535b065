//! `ffprobe` as the technical probe.

use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::report::{AudioStream, ProbeReport, SubtitleSummary, VideoStream};
use super::{ProbeError, TechnicalProbe};
use crate::command::run_bounded;
use crate::config::ProbeConfig;

pub struct FfprobeProbe {
    program: PathBuf,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.ffprobe_path.clone(), config.timeout())
    }
}

impl TechnicalProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let args: [&OsStr; 7] = [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-print_format"),
            OsStr::new("json"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            path.as_os_str(),
        ];
        let stdout = run_bounded(&self.program, &args, self.timeout)?;
        parse_output(&stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    probe_score: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    bit_rate: Option<String>,
    bits_per_raw_sample: Option<String>,
    pix_fmt: Option<String>,
    color_primaries: Option<String>,
    color_transfer: Option<String>,
    channels: Option<i64>,
    sample_rate: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

impl FfprobeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }

    fn language(&self) -> Option<String> {
        self.tags
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_lowercase)
    }
}

/// Turn `ffprobe -print_format json` output into a report.
///
/// Output that is not JSON, or that has neither a format section nor any
/// streams, is malformed.
pub fn parse_output(stdout: &[u8]) -> Result<ProbeReport, ProbeError> {
    let output: FfprobeOutput = serde_json::from_slice(stdout)?;
    if output.format.is_none() && output.streams.is_empty() {
        return Err(ProbeError::Malformed("no format or stream information".to_string()));
    }

    let format = output.format.as_ref();
    let video = output.streams.iter().find(|s| s.is("video")).map(|s| VideoStream {
        codec: s.codec_name.clone(),
        width: s.width,
        height: s.height,
        frame_rate: s
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_rate)),
        bitrate: s.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        bit_depth: s
            .bits_per_raw_sample
            .as_deref()
            .and_then(|b| b.parse().ok())
            .or_else(|| s.pix_fmt.as_deref().map(bit_depth_from_pix_fmt)),
        color_primaries: s.color_primaries.clone(),
        color_transfer: s.color_transfer.clone(),
    });

    let audio_streams: Vec<_> = output.streams.iter().filter(|s| s.is("audio")).collect();
    let audio = audio_streams.first().map(|s| AudioStream {
        codec: s.codec_name.clone(),
        channels: s.channels,
        sample_rate: s.sample_rate.as_deref().and_then(|r| r.parse().ok()),
        bitrate: s.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        languages: unique_languages(audio_streams.iter().copied()),
    });

    let subtitle_streams: Vec<_> = output.streams.iter().filter(|s| s.is("subtitle")).collect();

    Ok(ProbeReport {
        container_format: format.and_then(|f| f.format_name.clone()),
        duration_secs: format
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse().ok()),
        probe_score: format.and_then(|f| f.probe_score),
        video,
        audio,
        subtitles: SubtitleSummary {
            count: subtitle_streams.len() as u32,
            languages: unique_languages(subtitle_streams.iter().copied()),
        },
    })
}

/// "24000/1001" or "25". A zero denominator means unknown.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value > 0.0).then(|| (value * 1000.0).round() / 1000.0)
}

/// `yuv420p10le` -> 10, `yuv420p` -> 8.
fn bit_depth_from_pix_fmt(pix_fmt: &str) -> i64 {
    let base = pix_fmt
        .strip_suffix("le")
        .or_else(|| pix_fmt.strip_suffix("be"))
        .unwrap_or(pix_fmt);
    let digits: String = base
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let prefix = &base[..base.len() - digits.len()];
    if !digits.is_empty() && prefix.ends_with('p') {
        digits.parse().unwrap_or(8)
    } else {
        8
    }
}

fn unique_languages<'a>(streams: impl Iterator<Item = &'a FfprobeStream>) -> Vec<String> {
    let mut languages = Vec::new();
    for language in streams.filter_map(FfprobeStream::language) {
        if !languages.contains(&language) {
            languages.push(language);
        }
    }
    languages
}

//! 视频源描述与接口
//!
//! 具体的摄像头/文件/RTSP解码器不在本库内, 只定义核心使用的接口.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::SourceSettings;
use crate::detection::Frame;
use crate::error::{MonitorError, Result};

/// 流媒体平台地址 (需要先解析分辨率)
static STREAM_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(https?://)?([a-z0-9-]+\.)?(youtube\.com|youtu\.be)/").expect("valid regex")
});

/// 视频源类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 流媒体平台 (YouTube 等)
    Stream,
    Webcam,
    LocalFile,
    Rtsp,
}

impl SourceKind {
    /// 根据输入文本推断视频源类型
    pub fn detect(text: &str) -> Self {
        let text = text.trim();
        if is_stream_url(text) {
            SourceKind::Stream
        } else if text.to_ascii_lowercase().starts_with("rtsp://") {
            SourceKind::Rtsp
        } else if text.is_empty() || text.chars().all(|c| c.is_ascii_digit()) {
            SourceKind::Webcam
        } else {
            SourceKind::LocalFile
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SourceKind::Stream => "流媒体",
            SourceKind::Webcam => "本地摄像头",
            SourceKind::LocalFile => "本地文件",
            SourceKind::Rtsp => "RTSP流",
        }
    }
}

/// 是否为需要解析分辨率的流媒体地址
pub fn is_stream_url(text: &str) -> bool {
    STREAM_URL.is_match(text.trim())
}

/// 视频源描述
#[derive(Clone, Debug, PartialEq)]
pub enum SourceDescriptor {
    Webcam(u32),
    LocalFile(PathBuf),
    Rtsp(String),
    Stream {
        url: String,
        resolution: Option<String>,
    },
}

impl SourceDescriptor {
    /// 从保存的设置构建; 除摄像头外路径不能为空
    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        let path = settings.path.trim();
        if path.is_empty() && settings.kind != SourceKind::Webcam {
            return Err(MonitorError::Config(format!(
                "{} 需要输入地址或路径",
                settings.kind.name()
            )));
        }

        Ok(match settings.kind {
            SourceKind::Webcam => SourceDescriptor::Webcam(path.parse().unwrap_or(0)),
            SourceKind::LocalFile => SourceDescriptor::LocalFile(PathBuf::from(path)),
            SourceKind::Rtsp => SourceDescriptor::Rtsp(path.to_string()),
            SourceKind::Stream => SourceDescriptor::Stream {
                url: path.to_string(),
                resolution: settings.resolution.clone(),
            },
        })
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Webcam(_) => SourceKind::Webcam,
            SourceDescriptor::LocalFile(_) => SourceKind::LocalFile,
            SourceDescriptor::Rtsp(_) => SourceKind::Rtsp,
            SourceDescriptor::Stream { .. } => SourceKind::Stream,
        }
    }

    /// 打开前需要解析流地址
    pub fn needs_resolution(&self) -> bool {
        matches!(self, SourceDescriptor::Stream { .. })
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Webcam(index) => write!(f, "webcam:{}", index),
            SourceDescriptor::LocalFile(path) => write!(f, "{}", path.display()),
            SourceDescriptor::Rtsp(url) => write!(f, "{}", url),
            SourceDescriptor::Stream { url, resolution } => match resolution {
                Some(res) => write!(f, "{} ({})", url, res),
                None => write!(f, "{}", url),
            },
        }
    }
}

// ========== 核心使用的接口 ==========

/// 帧来源
///
/// `next_frame` 可能阻塞; 返回 `Ok(None)` 表示流结束.
/// [`MonitorError::SourceRead`] 视为单帧失败, [`MonitorError::SourceLost`] 视为不可恢复.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// 释放视频源 (每个会话恰好调用一次)
    fn release(&mut self) -> Result<()>;
}

/// 根据描述打开视频源
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>>;
}

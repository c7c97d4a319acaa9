//! 错误类型
//! Error taxonomy shared by the detection engine and the pipeline worker

use thiserror::Error;

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// 打开视频源失败 (会话无法启动)
    #[error("failed to open video source {source_name}: {reason}")]
    SourceOpen { source_name: String, reason: String },

    /// 单帧读取失败 (跳过该帧)
    #[error("failed to read frame: {0}")]
    SourceRead(String),

    /// 视频源不可恢复地中断
    #[error("video source lost: {0}")]
    SourceLost(String),

    /// 模型加载失败
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// 单帧推理失败 (跳过该帧)
    #[error("inference failed: {0}")]
    Inference(String),

    /// 释放视频源失败 (只记录日志)
    #[error("failed to release video source: {0}")]
    ResourceRelease(String),

    #[error("a pipeline session is already active")]
    SessionActive,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to save crop to {path}: {reason}")]
    Save { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    /// 是否为可跳过的单帧错误
    pub fn is_transient(&self) -> bool {
        matches!(self, MonitorError::SourceRead(_) | MonitorError::Inference(_))
    }
}

//! 离线回放输入
//! Replay inputs: frames from an image directory, tracker output from a JSON log
//!
//! 用于命令行回放与集成测试, 不依赖解码器或推理引擎.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::detection::{
    Detection, Detector, Frame, InferenceCapability, IouTracker, IouTrackerConfig, ModelLoader,
    TrackedObject,
};
use crate::error::{MonitorError, Result};

use super::source::{FrameSource, SourceDescriptor, SourceOpener};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

// ========== 图片序列帧源 ==========

/// 按文件名顺序读取目录中的图片作为视频帧
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    cursor: usize,
    released: bool,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| MonitorError::SourceOpen {
            source_name: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(MonitorError::SourceOpen {
                source_name: dir.display().to_string(),
                reason: "no image files found".into(),
            });
        }

        info!("📂 图片序列: {} 帧 ({})", files.len(), dir.display());
        Ok(Self {
            files,
            cursor: 0,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Err(MonitorError::SourceLost("source already released".into()));
        }
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let sequence = self.cursor as u64;
        self.cursor += 1;

        // 单帧损坏只跳过该帧
        let image = image::open(path)
            .map_err(|e| MonitorError::SourceRead(format!("{}: {}", path.display(), e)))?;
        Ok(Some(Frame::new(image.to_rgb8(), sequence)))
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(MonitorError::ResourceRelease("already released".into()));
        }
        self.released = true;
        debug!("图片序列已释放 ({} / {} 帧)", self.cursor, self.files.len());
        Ok(())
    }
}

/// 只支持本地图片目录的打开器
pub struct DirectoryOpener;

impl SourceOpener for DirectoryOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>> {
        match descriptor {
            SourceDescriptor::LocalFile(path) if path.is_dir() => {
                Ok(Box::new(ImageSequenceSource::open(path)?))
            }
            other => Err(MonitorError::SourceOpen {
                source_name: other.to_string(),
                reason: "replay mode only reads image directories".into(),
            }),
        }
    }
}

// ========== 跟踪日志回放 ==========

/// 按帧序号回放记录的跟踪结果
///
/// JSON 格式: 每帧一个数组, `[[{"id":7,"label":"plate","confidence":0.9,"box":{...}}], ...]`
pub struct ReplayInference {
    frames: Vec<Vec<TrackedObject>>,
}

impl ReplayInference {
    pub fn new(frames: Vec<Vec<TrackedObject>>) -> Self {
        Self { frames }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&json)?))
    }
}

impl InferenceCapability for ReplayInference {
    fn track(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<TrackedObject>> {
        Ok(self
            .frames
            .get(frame.sequence as usize)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|o| o.confidence >= confidence_threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// 按帧序号回放记录的原始检测结果 (无ID, 交给 [`IouTracker`] 关联)
pub struct ReplayDetector {
    frames: Vec<Vec<Detection>>,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&json)?))
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame, _confidence_threshold: f32) -> Result<Vec<Detection>> {
        Ok(self
            .frames
            .get(frame.sequence as usize)
            .cloned()
            .unwrap_or_default())
    }
}

/// 回放日志类型
#[derive(Clone, Debug)]
pub enum ReplayLog {
    /// 带ID的跟踪结果
    Tracks(PathBuf),
    /// 无ID的检测结果, 使用IOU跟踪器分配ID
    Detections(PathBuf, IouTrackerConfig),
}

/// 从日志文件加载回放模型
pub struct ReplayModelLoader {
    log: ReplayLog,
}

impl ReplayModelLoader {
    pub fn new(log: ReplayLog) -> Self {
        Self { log }
    }
}

impl ModelLoader for ReplayModelLoader {
    fn load(&self) -> Result<Box<dyn InferenceCapability>> {
        let to_load_error = |path: &Path, e: MonitorError| {
            MonitorError::ModelLoad(format!("{}: {}", path.display(), e))
        };

        match &self.log {
            ReplayLog::Tracks(path) => {
                let model = ReplayInference::from_file(path).map_err(|e| to_load_error(path, e))?;
                Ok(Box::new(model))
            }
            ReplayLog::Detections(path, config) => {
                let detector = ReplayDetector::from_file(path).map_err(|e| to_load_error(path, e))?;
                Ok(Box::new(IouTracker::new(detector, config.clone())))
            }
        }
    }
}

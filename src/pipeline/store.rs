/// 裁剪图保存 (Crop Store)
/// 职责: DetectionEvent → <save_dir>/<label>_<id>_<time>.jpg
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::detection::DetectionEvent;
use crate::error::{MonitorError, Result};
use crate::gen_time_string;

/// 文件名中不允许的字符
static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\-]+").expect("valid regex"));

pub struct CropStore {
    dir: PathBuf,
}

impl CropStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, event: &DetectionEvent) -> PathBuf {
        let label = UNSAFE_CHARS.replace_all(event.label.trim(), "_");
        let label = if label.is_empty() { "object".into() } else { label };
        self.dir.join(format!(
            "{}_{}_{}.jpg",
            label,
            event.identity,
            gen_time_string(&event.timestamp, "")
        ))
    }

    /// 保存裁剪图, 目录不存在时自动创建
    pub fn save(&self, event: &DetectionEvent) -> Result<PathBuf> {
        let path = self.path_for(event);
        let to_save_error = |reason: String| MonitorError::Save {
            path: path.display().to_string(),
            reason,
        };

        fs::create_dir_all(&self.dir).map_err(|e| to_save_error(e.to_string()))?;
        event
            .image
            .save(&path)
            .map_err(|e| to_save_error(e.to_string()))?;
        Ok(path)
    }
}

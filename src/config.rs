//! 监控配置 - 通过JSON文件调整参数

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::detection::memory::DEFAULT_CAPACITY;
use crate::detection::{RenderOptions, DEFAULT_EDGE_MARGIN};
use crate::error::{MonitorError, Result};
use crate::input::SourceKind;

/// 上次使用的视频源
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub path: String,
    /// 流媒体分辨率 (如 "720p"), 仅 Stream 类型使用
    pub resolution: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::Stream,
            path: String::new(),
            resolution: None,
        }
    }
}

/// 监控参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    // === 检测参数 ===
    pub confidence_threshold: f32, // 检测置信度阈值 [0,1]
    pub show_labels: bool,         // 绘制标签
    pub show_boxes: bool,          // 绘制检测框

    // === 去重参数 ===
    pub edge_margin: u32,                // 边缘距离(像素)
    pub identity_memory_capacity: usize, // ID记忆容量

    // === 保存 ===
    pub auto_save: bool,   // 自动保存裁剪图
    pub save_dir: PathBuf, // 保存目录

    // === 工作线程 ===
    pub stats_interval_frames: u64,        // 统计推送间隔(帧)
    pub max_consecutive_read_failures: u32, // 连续读帧失败上限
    pub pause_poll_ms: u64,                 // 暂停时轮询间隔

    /// 标签字体 (TTF/OTF), 为空时标签只画色块
    pub font_path: Option<String>,

    pub source: SourceSettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.65,
            show_labels: true,
            show_boxes: true,

            edge_margin: DEFAULT_EDGE_MARGIN,
            identity_memory_capacity: DEFAULT_CAPACITY,

            auto_save: true,
            save_dir: PathBuf::from("detections"),

            stats_interval_frames: 30,
            max_consecutive_read_failures: 30,
            pause_poll_ms: 20,

            font_path: None,
            source: SourceSettings::default(),
        }
    }
}

impl MonitorConfig {
    /// 默认配置文件路径: <config_dir>/plate-monitor/config.json
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plate-monitor")
            .join("config.json")
    }

    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写入默认配置; 解析失败时使用默认值.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 恢复默认配置
    pub fn reset(&mut self) {
        *self = Self::default();
        info!("🔄 配置已恢复默认值");
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MonitorError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.identity_memory_capacity == 0 {
            return Err(MonitorError::Config(
                "identity_memory_capacity must be positive".into(),
            ));
        }
        if self.stats_interval_frames == 0 {
            return Err(MonitorError::Config(
                "stats_interval_frames must be positive".into(),
            ));
        }
        // 为 0 时第一次读帧失败就会结束会话
        if self.max_consecutive_read_failures == 0 {
            return Err(MonitorError::Config(
                "max_consecutive_read_failures must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            show_labels: self.show_labels,
            show_boxes: self.show_boxes,
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前监控配置:");
        info!("  检测置信度: {:.2}", self.confidence_threshold);
        info!("  边缘距离: {}px", self.edge_margin);
        info!("  ID记忆容量: {}", self.identity_memory_capacity);
        info!(
            "  自动保存: {} ({})",
            if self.auto_save { "开启" } else { "关闭" },
            self.save_dir.display()
        );
    }
}

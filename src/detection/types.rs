/// 检测系统数据结构定义
/// Data structures for the detection and deduplication engine
use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 每个标签已上报的目标数量
pub type LabelStats = BTreeMap<String, u64>;

// ========== 帧 ==========

/// 视频帧 (RGB8)
///
/// `sequence` 为到达顺序的帧序号. 交给事件接收端的帧必须是独立副本.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        3
    }
}

// ========== 检测框 ==========

/// 检测框 (frame-pixel space, x1<=x2, y1<=y2)
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// 获取中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 检测框是否完整位于画面内 (四边均保留 `margin` 像素)
    pub fn is_inside(&self, width: u32, height: u32, margin: u32) -> bool {
        let m = margin as f32;
        self.x1 > m
            && self.y1 > m
            && self.x2 < width as f32 - m
            && self.y2 < height as f32 - m
    }

    /// 计算两个边界框的IOU (Intersection over Union)
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 {
            return 0.0;
        }

        intersection / union
    }
}

// ========== 检测/跟踪结果 ==========

/// 原始检测结果 (无跟踪ID)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// 跟踪对象 (跨帧保持稳定的ID)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    #[serde(rename = "id")]
    pub identity: u32,
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// 首次发现事件: 每个ID在一个记忆周期内最多产生一次
#[derive(Clone, Debug)]
pub struct DetectionEvent {
    pub identity: u32,
    pub label: String,
    pub confidence: f32,
    /// 目标裁剪图
    pub image: RgbImage,
    pub timestamp: DateTime<Local>,
    /// 产生事件的帧序号
    pub frame_sequence: u64,
}

/// 绘制选项
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub show_labels: bool,
    pub show_boxes: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            show_labels: true,
            show_boxes: true,
        }
    }
}

//! 跟踪去重器
//! Turns per-frame tracker output into first-sighting detection events
//!
//! 职责: 跟踪对象 → 边缘过滤 → ID记忆 → 裁剪 → DetectionEvent

use chrono::Local;
use image::RgbImage;
use tracing::debug;

use super::annotate::Annotator;
use super::crop::crop;
use super::memory::IdentityMemory;
use super::types::{DetectionEvent, Frame, RenderOptions, TrackedObject};

/// 默认边缘距离 (像素)
pub const DEFAULT_EDGE_MARGIN: u32 = 25;

pub struct TrackingDeduplicator {
    memory: IdentityMemory,
    edge_margin: u32,
    annotator: Annotator,
}

impl TrackingDeduplicator {
    pub fn new(memory_capacity: usize, edge_margin: u32, annotator: Annotator) -> Self {
        Self {
            memory: IdentityMemory::new(memory_capacity),
            edge_margin,
            annotator,
        }
    }

    /// 处理单帧跟踪结果
    ///
    /// 返回绘制后的帧副本, 以及按跟踪器输出顺序排列的新目标事件.
    pub fn process(
        &mut self,
        frame: &Frame,
        objects: &[TrackedObject],
        options: RenderOptions,
    ) -> (RgbImage, Vec<DetectionEvent>) {
        let annotated = self.annotator.annotate(&frame.image, objects, options);
        let (width, height) = (frame.width(), frame.height());
        let mut events = Vec::new();

        for obj in objects {
            if self.memory.contains(obj.identity) {
                continue;
            }

            // 只接受完整位于画面内的目标, 半入画的目标等下一帧再判断
            if !obj.bbox.is_inside(width, height, self.edge_margin) {
                continue;
            }

            if self.memory.insert(obj.identity) {
                debug!(
                    "🧹 ID记忆已满 ({}), 已清空并开始新周期 #{}",
                    self.memory.capacity(),
                    self.memory.epoch()
                );
            }

            let image = crop(&frame.image, &obj.bbox);
            if image.width() == 0 || image.height() == 0 {
                debug!("⚠️ ID {} 裁剪区域为空, 跳过", obj.identity);
                continue;
            }

            events.push(DetectionEvent {
                identity: obj.identity,
                label: obj.label.clone(),
                confidence: obj.confidence,
                image,
                timestamp: Local::now(),
                frame_sequence: frame.sequence,
            });
        }

        (annotated, events)
    }

    /// 清空ID记忆 (新会话)
    pub fn reset(&mut self) {
        self.memory.clear();
    }

    pub fn memory(&self) -> &IdentityMemory {
        &self.memory
    }

    pub fn edge_margin(&self) -> u32 {
        self.edge_margin
    }
}

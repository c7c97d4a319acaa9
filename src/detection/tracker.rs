//! 推理能力接口与IOU跟踪适配器
//! Inference capability seam and a greedy IoU tracker for raw detectors

use crate::error::Result;

use super::types::{BoundingBox, Detection, Frame, TrackedObject};

// ========== 推理能力统一接口 ==========

/// 检测+跟踪能力 (外部模型)
///
/// 返回当前帧中置信度不低于阈值的跟踪对象, ID跨帧保持稳定.
/// 调用可能阻塞, 核心不设超时.
pub trait InferenceCapability: Send {
    fn track(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<TrackedObject>>;

    /// 清除内部跟踪状态 (新会话开始时调用)
    fn reset(&mut self) {}
}

/// 模型加载器 (每个会话启动时调用, 已缓存模型时跳过)
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn InferenceCapability>>;
}

/// 纯检测器 (无跟踪ID)
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>>;
}

// ========== IOU 跟踪器 ==========

/// 跟踪器参数
#[derive(Clone, Debug)]
pub struct IouTrackerConfig {
    /// 关联所需的最小IOU
    pub iou_threshold: f32,
    /// 最大允许丢失帧数
    pub max_lost_frames: u32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_lost_frames: 30,
        }
    }
}

#[derive(Clone, Debug)]
struct Track {
    id: u32,
    label: String,
    bbox: BoundingBox,
    /// 连续丢失帧数
    frames_lost: u32,
}

/// 贪心IOU关联跟踪器
///
/// 把任意 [`Detector`] 包装成 [`InferenceCapability`]. 同标签的检测框按IOU从高到低
/// 依次匹配已有轨迹, 未匹配的检测框分配新ID.
pub struct IouTracker<D> {
    detector: D,
    config: IouTrackerConfig,
    tracks: Vec<Track>,
    /// 下一个分配的ID
    next_id: u32,
}

impl<D: Detector> IouTracker<D> {
    pub fn new(detector: D, config: IouTrackerConfig) -> Self {
        Self {
            detector,
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// 获取当前跟踪数量
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn associate(&mut self, detections: Vec<Detection>) -> Vec<TrackedObject> {
        let mut pairs = Vec::new();
        for (di, det) in detections.iter().enumerate() {
            for (ti, track) in self.tracks.iter().enumerate() {
                if track.label != det.label {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.iou_threshold {
                    pairs.push((iou, di, ti));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut det_track: Vec<Option<usize>> = vec![None; detections.len()];
        let mut track_used = vec![false; self.tracks.len()];
        for (_, di, ti) in pairs {
            if det_track[di].is_none() && !track_used[ti] {
                det_track[di] = Some(ti);
                track_used[ti] = true;
            }
        }

        // 未匹配的轨迹累计丢失帧
        for (track, used) in self.tracks.iter_mut().zip(&track_used) {
            if !used {
                track.frames_lost += 1;
            }
        }

        let mut objects = Vec::with_capacity(detections.len());
        for (det, matched) in detections.into_iter().zip(det_track) {
            let id = match matched {
                Some(ti) => {
                    let track = &mut self.tracks[ti];
                    track.bbox = det.bbox;
                    track.frames_lost = 0;
                    track.id
                }
                None => {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1);
                    self.tracks.push(Track {
                        id,
                        label: det.label.clone(),
                        bbox: det.bbox,
                        frames_lost: 0,
                    });
                    id
                }
            };
            objects.push(TrackedObject {
                identity: id,
                label: det.label,
                confidence: det.confidence,
                bbox: det.bbox,
            });
        }

        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        objects
    }
}

impl<D: Detector> InferenceCapability for IouTracker<D> {
    fn track(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<TrackedObject>> {
        let detections = self
            .detector
            .detect(frame, confidence_threshold)?
            .into_iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .collect();
        Ok(self.associate(detections))
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }
}

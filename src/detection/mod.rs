/// 检测系统 (Detection System)
///
/// 跟踪结果 → 去重 → 首次发现事件
/// - Tracker:  推理能力接口 + IOU跟踪适配器
/// - Dedup:    边缘过滤 + ID记忆 + 目标裁剪
/// - Annotate: 检测框/标签绘制
pub mod annotate;
pub mod crop;
pub mod dedup;
pub mod memory;
pub mod tracker;
pub mod types;

pub use annotate::Annotator;
pub use crop::crop;
pub use dedup::{TrackingDeduplicator, DEFAULT_EDGE_MARGIN};
pub use memory::IdentityMemory;
pub use tracker::{Detector, InferenceCapability, IouTracker, IouTrackerConfig, ModelLoader};
pub use types::{
    BoundingBox, Detection, DetectionEvent, Frame, LabelStats, RenderOptions, TrackedObject,
};

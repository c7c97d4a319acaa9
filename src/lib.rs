// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 监控配置参数
pub mod detection; // 跟踪去重引擎
pub mod error; // 错误类型
pub mod input; // 视频输入接口
pub mod pipeline; // 监控流水线

use chrono::{DateTime, Local};

pub use crate::config::{MonitorConfig, SourceSettings};
pub use crate::detection::{
    BoundingBox, DetectionEvent, Frame, InferenceCapability, ModelLoader, TrackedObject,
    TrackingDeduplicator,
};
pub use crate::error::{MonitorError, Result};
pub use crate::input::{FrameSource, SourceDescriptor, SourceKind, SourceOpener};
pub use crate::pipeline::{ChannelSink, EventSink, Pipeline, PipelineEvent, PipelineState};

/// 时间字符串, 用于保存文件名
pub fn gen_time_string(time: &DateTime<Local>, delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    time.format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_gen_time_string() {
        let t = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(gen_time_string(&t, "-"), "2024-01-02-03-04-05-000000000");
        assert!(gen_time_string(&t, "").starts_with("20240102030405"));
    }
}

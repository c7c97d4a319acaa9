/// 视频输入系统 (Video Input System)
///
/// 核心只依赖接口, 具体解码器由调用方提供
/// - Source: 视频源描述 + FrameSource/SourceOpener 接口
/// - Probe:  流媒体分辨率后台查询
/// - Replay: 图片目录/跟踪日志离线回放
pub mod probe;
pub mod replay;
pub mod source;

pub use probe::{sort_resolutions, spawn_resolution_probe, ResolutionProbe};
pub use replay::{
    DirectoryOpener, ImageSequenceSource, ReplayDetector, ReplayInference, ReplayLog,
    ReplayModelLoader,
};
pub use source::{is_stream_url, FrameSource, SourceDescriptor, SourceKind, SourceOpener};

/// 事件接收端 (Event Sink)
/// 职责: 工作线程 → 调用方 (UI/命令行/测试)
use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::detection::{DetectionEvent, Frame, LabelStats};

use super::PipelineState;

/// 有界通道满时, 两次检查取消标志之间的等待时间
const SEND_RETRY: Duration = Duration::from_millis(20);

/// 工作线程输出接口
///
/// 只在工作线程上调用 (`on_control_error`/`on_cancel`/`on_session_start` 除外).
/// 传入的图像均为独立副本.
pub trait EventSink: Send + Sync {
    /// 绘制后的帧 (每帧一次, 按到达顺序)
    fn on_annotated_frame(&self, frame: Frame);

    /// 本帧新发现的目标 (非空)
    fn on_detection_events(&self, events: Vec<DetectionEvent>);

    /// 会话内按标签累计的目标数量
    fn on_stats(&self, stats: LabelStats);

    fn on_progress(&self, message: &str, percent: u8);

    fn on_error(&self, message: &str);

    fn on_state(&self, _state: PipelineState) {}

    /// 控制端上报的错误 (启动被拒绝等), 实现不得阻塞
    fn on_control_error(&self, message: &str) {
        self.on_error(message);
    }

    /// 已请求停止: 之后的投递不得无限等待接收方
    fn on_cancel(&self) {}

    /// 新会话开始前调用
    fn on_session_start(&self) {}
}

/// 通过通道转发的工作线程输出
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    AnnotatedFrame(Frame),
    Detections(Vec<DetectionEvent>),
    Stats(LabelStats),
    Progress { message: String, percent: u8 },
    Error(String),
    State(PipelineState),
}

/// 基于 crossbeam 通道的接收端
///
/// 无界通道下, 接收方不消费时帧会一直堆积; 长时间运行请用 [`ChannelSink::bounded`].
///
/// 有界通道满时:
/// - 绘制帧和统计直接丢弃 (统计是累计值, 下一次会覆盖)
/// - 其他消息等待接收方, 请求停止后改为尝试一次, 失败则丢弃
/// - 控制端错误从不等待
pub struct ChannelSink {
    tx: Sender<PipelineEvent>,
    bounded: bool,
    cancelled: AtomicBool,
    dropped: AtomicU64,
}

impl ChannelSink {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = unbounded();
        (Self::with_sender(tx, false), rx)
    }

    pub fn bounded(capacity: usize) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self::with_sender(tx, true), rx)
    }

    fn with_sender(tx: Sender<PipelineEvent>, bounded: bool) -> Self {
        Self {
            tx,
            bounded,
            cancelled: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// 因通道已满而丢弃的消息数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 等待接收方, 直到送达或请求停止
    fn send(&self, event: PipelineEvent) {
        if !self.bounded {
            // 接收方已关闭时静默丢弃
            let _ = self.tx.send(event);
            return;
        }

        let mut event = event;
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                self.try_send(event);
                return;
            }
            match self.tx.send_timeout(event, SEND_RETRY) {
                Ok(()) | Err(SendTimeoutError::Disconnected(_)) => return,
                Err(SendTimeoutError::Timeout(back)) => event = back,
            }
        }
    }

    /// 不等待, 通道满时丢弃
    fn try_send(&self, event: PipelineEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if !matches!(event, PipelineEvent::AnnotatedFrame(_) | PipelineEvent::Stats(_)) {
                warn!("⚠️  事件通道已满, 丢弃 {} 消息 (累计 {})", kind(&event), total);
            }
        }
    }

    fn send_lossy(&self, event: PipelineEvent) {
        if self.bounded {
            self.try_send(event);
        } else {
            self.send(event);
        }
    }
}

fn kind(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::AnnotatedFrame(_) => "frame",
        PipelineEvent::Detections(_) => "detections",
        PipelineEvent::Stats(_) => "stats",
        PipelineEvent::Progress { .. } => "progress",
        PipelineEvent::Error(_) => "error",
        PipelineEvent::State(_) => "state",
    }
}

impl EventSink for ChannelSink {
    fn on_annotated_frame(&self, frame: Frame) {
        self.send_lossy(PipelineEvent::AnnotatedFrame(frame));
    }

    fn on_detection_events(&self, events: Vec<DetectionEvent>) {
        self.send(PipelineEvent::Detections(events));
    }

    fn on_stats(&self, stats: LabelStats) {
        self.send_lossy(PipelineEvent::Stats(stats));
    }

    fn on_progress(&self, message: &str, percent: u8) {
        self.send(PipelineEvent::Progress {
            message: message.to_string(),
            percent,
        });
    }

    fn on_error(&self, message: &str) {
        self.send(PipelineEvent::Error(message.to_string()));
    }

    fn on_state(&self, state: PipelineState) {
        self.send(PipelineEvent::State(state));
    }

    fn on_control_error(&self, message: &str) {
        self.try_send(PipelineEvent::Error(message.to_string()));
    }

    fn on_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn on_session_start(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

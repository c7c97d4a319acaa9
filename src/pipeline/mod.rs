/// 监控流水线 (Monitor Pipeline)
///
/// 控制端 + 独立工作线程:
/// - Pipeline: 启动/暂停/恢复/停止 (只写原子标志, 不阻塞)
/// - Worker:   读帧 → 推理 → 去重 → 事件输出 (专用线程)
/// - Sink:     工作线程输出接口
/// - Store:    裁剪图自动保存
pub mod sink;
pub mod store;
mod worker;

pub use sink::{ChannelSink, EventSink, PipelineEvent};
pub use store::CropStore;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::detection::{InferenceCapability, ModelLoader};
use crate::error::{MonitorError, Result};
use crate::input::{SourceDescriptor, SourceOpener};

use worker::SessionContext;

const WORKER_THREAD_NAME: &str = "plate-monitor-worker";

// ========== 状态 ==========

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Initializing = 1,
    Running = 2,
    Paused = 3,
    Stopping = 4,
    Stopped = 5,
    Failed = 6,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Initializing,
            2 => PipelineState::Running,
            3 => PipelineState::Paused,
            4 => PipelineState::Stopping,
            5 => PipelineState::Stopped,
            6 => PipelineState::Failed,
            _ => PipelineState::Idle,
        }
    }

    /// 会话已结束
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }

    pub fn name(&self) -> &str {
        match self {
            PipelineState::Idle => "空闲",
            PipelineState::Initializing => "初始化",
            PipelineState::Running => "运行中",
            PipelineState::Paused => "已暂停",
            PipelineState::Stopping => "停止中",
            PipelineState::Stopped => "已停止",
            PipelineState::Failed => "失败",
        }
    }
}

/// 状态快照 (工作线程写, 控制端只读)
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: PipelineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: PipelineState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// 跨线程控制标志
#[derive(Debug, Default)]
pub(crate) struct SessionControl {
    paused: AtomicBool,
    stop: AtomicBool,
}

impl SessionControl {
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

struct Session {
    control: Arc<SessionControl>,
    handle: JoinHandle<Option<Box<dyn InferenceCapability>>>,
}

// ========== 控制端 ==========

/// 流水线控制端
///
/// 同一时间最多一个活动会话. 模型在会话结束后被回收, 下次 `start` 直接复用.
pub struct Pipeline {
    opener: Arc<dyn SourceOpener>,
    loader: Arc<dyn ModelLoader>,
    sink: Arc<dyn EventSink>,
    state: Arc<StateCell>,
    session: Option<Session>,
    cached_model: Option<Box<dyn InferenceCapability>>,
}

impl Pipeline {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        loader: Arc<dyn ModelLoader>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            opener,
            loader,
            sink,
            state: Arc::new(StateCell::new(PipelineState::Idle)),
            session: None,
            cached_model: None,
        }
    }

    /// 启动新会话
    ///
    /// 已有活动会话或配置无效时拒绝, 错误同时发送到接收端.
    pub fn start(&mut self, descriptor: SourceDescriptor, config: MonitorConfig) -> Result<()> {
        if self.is_active() {
            return Err(self.reject(MonitorError::SessionActive));
        }
        self.join_session();

        if let Err(e) = config.validate() {
            return Err(self.reject(e));
        }

        info!("🚀 启动监控会话: {} ({})", descriptor, descriptor.kind().name());
        // 工作线程尚未存在, 此处写入不会与其竞争
        self.state.store(PipelineState::Initializing);
        self.sink.on_session_start();

        let control = Arc::new(SessionControl::default());
        let ctx = SessionContext {
            descriptor,
            config,
            opener: Arc::clone(&self.opener),
            loader: Arc::clone(&self.loader),
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.state),
            control: Arc::clone(&control),
            model: self.cached_model.take(),
        };

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || worker::run_session(ctx))
            .map_err(|e| {
                self.state.store(PipelineState::Failed);
                self.reject(MonitorError::Io(e))
            })?;

        self.session = Some(Session { control, handle });
        Ok(())
    }

    /// 暂停读帧与推理 (无活动会话时忽略)
    pub fn pause(&self) {
        if let Some(session) = self.active_session() {
            session.control.paused.store(true, Ordering::Release);
        }
    }

    pub fn resume(&self) {
        if let Some(session) = self.active_session() {
            session.control.paused.store(false, Ordering::Release);
        }
    }

    /// 请求停止 (幂等, 不阻塞)
    ///
    /// 工作线程在每次读帧前后检查停止标志; 读帧或推理本身没有超时,
    /// 因此停止延迟最长为一次阻塞调用的耗时. 接收端同时收到取消通知,
    /// 阻塞中的投递不再等待接收方. 需要等待资源释放时调用 [`Pipeline::wait`].
    pub fn stop(&self) {
        if let Some(session) = &self.session {
            if !session.control.stop.swap(true, Ordering::AcqRel) {
                info!("🛑 已请求停止监控会话");
                self.sink.on_cancel();
            }
        }
    }

    /// 等待工作线程退出并回收模型, 返回最终状态
    pub fn wait(&mut self) -> PipelineState {
        self.join_session();
        self.state()
    }

    pub fn state(&self) -> PipelineState {
        self.state.load()
    }

    /// 工作线程仍在运行
    pub fn is_active(&self) -> bool {
        self.active_session().is_some()
    }

    /// 丢弃缓存的模型, 下次启动时重新加载
    pub fn clear_model_cache(&mut self) {
        if self.cached_model.take().is_some() {
            info!("🔄 已清除模型缓存");
        }
    }

    pub fn has_cached_model(&self) -> bool {
        self.cached_model.is_some()
    }

    fn active_session(&self) -> Option<&Session> {
        self.session
            .as_ref()
            .filter(|session| !session.handle.is_finished())
    }

    fn reject(&self, err: MonitorError) -> MonitorError {
        warn!("⚠️  启动被拒绝: {}", err);
        self.sink.on_control_error(&err.to_string());
        err
    }

    fn join_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match session.handle.join() {
            Ok(model) => {
                if model.is_some() {
                    self.cached_model = model;
                }
            }
            Err(_) => {
                // 工作线程已退出, 只有这里会写入状态
                error!("❌ 工作线程异常退出");
                self.state.store(PipelineState::Failed);
                // 会话已结束, 投递不再等待接收方
                self.sink.on_cancel();
                self.sink.on_state(PipelineState::Failed);
                self.sink.on_control_error("pipeline worker panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // 不等待: 工作线程自行释放视频源后退出
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        let cell = StateCell::new(PipelineState::Idle);
        for state in [
            PipelineState::Initializing,
            PipelineState::Running,
            PipelineState::Paused,
            PipelineState::Stopping,
            PipelineState::Stopped,
            PipelineState::Failed,
        ] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
        assert!(PipelineState::Stopped.is_terminal());
        assert!(!PipelineState::Paused.is_terminal());
    }
}

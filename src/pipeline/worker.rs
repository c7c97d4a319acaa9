/// 工作线程 (Worker)
/// 职责: 打开视频源 → 加载模型 → 读帧 → 推理 → 去重 → 输出事件/统计 → 释放视频源
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::detection::{
    Annotator, Frame, InferenceCapability, LabelStats, ModelLoader, TrackingDeduplicator,
};
use crate::error::MonitorError;
use crate::input::{FrameSource, SourceDescriptor, SourceOpener};

use super::sink::EventSink;
use super::store::CropStore;
use super::{PipelineState, SessionControl, StateCell};

pub(crate) struct SessionContext {
    pub descriptor: SourceDescriptor,
    pub config: MonitorConfig,
    pub opener: Arc<dyn SourceOpener>,
    pub loader: Arc<dyn ModelLoader>,
    pub sink: Arc<dyn EventSink>,
    pub state: Arc<StateCell>,
    pub control: Arc<SessionControl>,
    /// 上个会话留下的模型
    pub model: Option<Box<dyn InferenceCapability>>,
}

impl SessionContext {
    fn set_state(&self, state: PipelineState) {
        self.state.store(state);
        self.sink.on_state(state);
    }

    fn fail(&self, err: &MonitorError) {
        error!("❌ {}", err);
        self.sink.on_error(&err.to_string());
        self.set_state(PipelineState::Failed);
    }
}

/// 视频源守卫: 任何退出路径都恰好释放一次
struct SourceGuard {
    source: Box<dyn FrameSource>,
    sink: Arc<dyn EventSink>,
    released: bool,
}

impl SourceGuard {
    fn new(source: Box<dyn FrameSource>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            source,
            sink,
            released: false,
        }
    }

    fn next_frame(&mut self) -> crate::error::Result<Option<Frame>> {
        self.source.next_frame()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.source.release() {
            Ok(()) => debug!("视频源已释放"),
            Err(e) => {
                warn!("⚠️  释放视频源失败: {}", e);
                self.sink.on_error(&e.to_string());
            }
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// 会话主函数, 返回模型供下次复用
pub(crate) fn run_session(mut ctx: SessionContext) -> Option<Box<dyn InferenceCapability>> {
    ctx.set_state(PipelineState::Initializing);
    let sink = Arc::clone(&ctx.sink);

    // 1. 打开视频源
    sink.on_progress("opening source", 10);
    if ctx.descriptor.needs_resolution() {
        sink.on_progress("resolving stream", 25);
        if let SourceDescriptor::Stream {
            resolution: None, ..
        } = &ctx.descriptor
        {
            info!("📺 未指定分辨率, 使用默认画质");
        }
    }
    let source = match ctx.opener.open(&ctx.descriptor) {
        Ok(source) => source,
        Err(e) => {
            ctx.fail(&e);
            return ctx.model;
        }
    };
    let mut guard = SourceGuard::new(source, Arc::clone(&sink));
    info!("✅ 视频源已打开: {}", ctx.descriptor);

    // 2. 加载或复用模型
    let mut model = match ctx.model.take() {
        Some(model) => {
            sink.on_progress("reusing model", 50);
            info!("♻️  复用已加载的模型");
            model
        }
        None => {
            sink.on_progress("loading model", 50);
            match ctx.loader.load() {
                Ok(model) => model,
                Err(e) => {
                    guard.release();
                    ctx.fail(&e);
                    return None;
                }
            }
        }
    };
    model.reset();
    sink.on_progress("model ready", 90);

    if ctx.control.stop_requested() {
        finish(&ctx, &mut guard);
        return Some(model);
    }

    ctx.set_state(PipelineState::Running);
    sink.on_progress("running", 100);

    run_loop(&ctx, &mut guard, &mut *model);

    finish(&ctx, &mut guard);
    Some(model)
}

fn finish(ctx: &SessionContext, guard: &mut SourceGuard) {
    ctx.set_state(PipelineState::Stopping);
    guard.release();
    ctx.set_state(PipelineState::Stopped);
    info!("🏁 监控会话已结束");
}

fn run_loop(ctx: &SessionContext, guard: &mut SourceGuard, model: &mut dyn InferenceCapability) {
    let config = &ctx.config;
    let sink = ctx.sink.as_ref();
    let control = ctx.control.as_ref();

    let annotator = Annotator::from_font_path(config.font_path.as_deref());
    let mut dedup =
        TrackingDeduplicator::new(config.identity_memory_capacity, config.edge_margin, annotator);
    let render = config.render_options();
    let store = config.auto_save.then(|| CropStore::new(&config.save_dir));
    let poll = Duration::from_millis(config.pause_poll_ms.max(1));

    let mut stats = LabelStats::new();
    let mut paused = false;
    let mut read_failures = 0u32;
    let mut frames_done = 0u64;

    // FPS 统计
    let mut fps_count = 0u32;
    let mut fps_last = Instant::now();

    loop {
        if control.stop_requested() {
            break;
        }

        if control.is_paused() {
            if !paused {
                paused = true;
                ctx.set_state(PipelineState::Paused);
                info!("⏸️  已暂停");
            }
            std::thread::sleep(poll);
            continue;
        } else if paused {
            paused = false;
            ctx.set_state(PipelineState::Running);
            info!("▶️  已恢复");
        }

        // 1. 读帧
        let frame = match guard.next_frame() {
            Ok(Some(frame)) => {
                read_failures = 0;
                frame
            }
            Ok(None) => {
                info!("📭 视频流结束");
                sink.on_progress("end of stream", 100);
                break;
            }
            Err(e) if e.is_transient() => {
                read_failures += 1;
                warn!(
                    "⚠️  读帧失败 ({}/{}): {}",
                    read_failures, config.max_consecutive_read_failures, e
                );
                sink.on_error(&e.to_string());
                if read_failures >= config.max_consecutive_read_failures {
                    let lost = MonitorError::SourceLost(format!(
                        "{} consecutive read failures",
                        read_failures
                    ));
                    error!("❌ {}", lost);
                    sink.on_error(&lost.to_string());
                    break;
                }
                continue;
            }
            Err(e) => {
                error!("❌ {}", e);
                sink.on_error(&e.to_string());
                break;
            }
        };

        // 读帧可能阻塞很久, 推理前再检查一次
        if control.stop_requested() {
            break;
        }

        // 2. 推理
        let objects = match model.track(&frame, config.confidence_threshold) {
            Ok(objects) => objects,
            Err(e) => {
                warn!("⚠️  推理失败 (帧 {}): {}", frame.sequence, e);
                sink.on_error(&e.to_string());
                continue;
            }
        };

        // 3. 去重 + 绘制
        let (annotated, events) = dedup.process(&frame, &objects, render);
        sink.on_annotated_frame(Frame::new(annotated, frame.sequence));

        // 4. 事件 + 保存
        let has_events = !events.is_empty();
        if has_events {
            for event in &events {
                *stats.entry(event.label.clone()).or_insert(0) += 1;
                info!(
                    "🚗 新目标: #{} {} ({:.2}) 帧 {}",
                    event.identity, event.label, event.confidence, event.frame_sequence
                );
            }
            match &store {
                Some(store) => {
                    sink.on_detection_events(events.clone());
                    for event in &events {
                        match store.save(event) {
                            Ok(path) => debug!("💾 已保存: {}", path.display()),
                            Err(e) => {
                                warn!("⚠️  {}", e);
                                sink.on_error(&e.to_string());
                            }
                        }
                    }
                }
                None => sink.on_detection_events(events),
            }
        }

        // 5. 统计
        frames_done += 1;
        if has_events || frames_done % config.stats_interval_frames == 0 {
            sink.on_stats(stats.clone());
        }

        fps_count += 1;
        if fps_last.elapsed().as_secs_f64() >= 1.0 {
            let fps = fps_count as f64 / fps_last.elapsed().as_secs_f64();
            debug!(
                "📊 处理FPS: {:.1} | 已处理 {} 帧 | 记忆 {} 个ID",
                fps,
                frames_done,
                dedup.memory().len()
            );
            fps_count = 0;
            fps_last = Instant::now();
        }
    }
}

//! 流水线端到端测试 (模拟视频源与模型)

use crossbeam_channel::Receiver;
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use plate_monitor::detection::{BoundingBox, InferenceCapability, ModelLoader};
use plate_monitor::{
    ChannelSink, Frame, FrameSource, MonitorConfig, MonitorError, Pipeline, PipelineEvent,
    PipelineState, SourceDescriptor, SourceOpener, TrackedObject,
};

const TIMEOUT: Duration = Duration::from_secs(10);

// ========== 模拟视频源 ==========

#[derive(Clone, Debug)]
enum Step {
    Frame,
    ReadError,
    Lost,
}

struct MockSource {
    steps: VecDeque<Step>,
    endless: bool,
    sequence: u64,
    releases: Arc<AtomicUsize>,
}

impl FrameSource for MockSource {
    fn next_frame(&mut self) -> plate_monitor::Result<Option<Frame>> {
        let step = match self.steps.pop_front() {
            Some(step) => step,
            None if self.endless => {
                std::thread::sleep(Duration::from_millis(2));
                Step::Frame
            }
            None => return Ok(None),
        };
        match step {
            Step::Frame => {
                let frame = Frame::new(RgbImage::new(200, 200), self.sequence);
                self.sequence += 1;
                Ok(Some(frame))
            }
            Step::ReadError => Err(MonitorError::SourceRead("decoder hiccup".into())),
            Step::Lost => Err(MonitorError::SourceLost("camera unplugged".into())),
        }
    }

    fn release(&mut self) -> plate_monitor::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockOpener {
    steps: Vec<Step>,
    endless: bool,
    fail: bool,
    releases: Arc<AtomicUsize>,
}

impl MockOpener {
    fn frames(count: usize) -> Self {
        Self::script(vec![Step::Frame; count])
    }

    fn script(steps: Vec<Step>) -> Self {
        Self {
            steps,
            endless: false,
            fail: false,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn endless() -> Self {
        Self {
            endless: true,
            ..Self::script(Vec::new())
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::script(Vec::new())
        }
    }
}

impl SourceOpener for MockOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> plate_monitor::Result<Box<dyn FrameSource>> {
        if self.fail {
            return Err(MonitorError::SourceOpen {
                source_name: descriptor.to_string(),
                reason: "no such device".into(),
            });
        }
        Ok(Box::new(MockSource {
            steps: self.steps.iter().cloned().collect(),
            endless: self.endless,
            sequence: 0,
            releases: Arc::clone(&self.releases),
        }))
    }
}

// ========== 模拟模型 ==========

/// 每帧返回相同的对象, 指定帧序号推理失败
struct MockModel {
    objects: Vec<TrackedObject>,
    fail_on: Vec<u64>,
    resets: Arc<AtomicUsize>,
}

impl InferenceCapability for MockModel {
    fn track(
        &mut self,
        frame: &Frame,
        threshold: f32,
    ) -> plate_monitor::Result<Vec<TrackedObject>> {
        if self.fail_on.contains(&frame.sequence) {
            return Err(MonitorError::Inference("gpu busy".into()));
        }
        Ok(self
            .objects
            .iter()
            .filter(|o| o.confidence >= threshold)
            .cloned()
            .collect())
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockLoader {
    objects: Vec<TrackedObject>,
    fail_on: Vec<u64>,
    fail: bool,
    loads: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl MockLoader {
    fn new(objects: Vec<TrackedObject>) -> Self {
        Self {
            objects,
            fail_on: Vec::new(),
            fail: false,
            loads: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ModelLoader for MockLoader {
    fn load(&self) -> plate_monitor::Result<Box<dyn InferenceCapability>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MonitorError::ModelLoad("weights missing".into()));
        }
        Ok(Box::new(MockModel {
            objects: self.objects.clone(),
            fail_on: self.fail_on.clone(),
            resets: Arc::clone(&self.resets),
        }))
    }
}

// ========== 辅助函数 ==========

fn plate(id: u32, x1: f32, y1: f32, x2: f32, y2: f32) -> TrackedObject {
    TrackedObject {
        identity: id,
        label: "plate".into(),
        confidence: 0.9,
        bbox: BoundingBox::new(x1, y1, x2, y2),
    }
}

fn config() -> MonitorConfig {
    MonitorConfig {
        auto_save: false,
        ..MonitorConfig::default()
    }
}

fn descriptor() -> SourceDescriptor {
    SourceDescriptor::LocalFile("replay".into())
}

fn pipeline(
    opener: MockOpener,
    loader: MockLoader,
) -> (Pipeline, Receiver<PipelineEvent>, Arc<AtomicUsize>) {
    let releases = Arc::clone(&opener.releases);
    let (sink, rx) = ChannelSink::new();
    let pipeline = Pipeline::new(Arc::new(opener), Arc::new(loader), Arc::new(sink));
    (pipeline, rx, releases)
}

/// 收集事件直到会话结束
fn drain_session(rx: &Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx.recv_timeout(TIMEOUT).expect("pipeline went silent");
        let done = matches!(event, PipelineEvent::State(s) if s.is_terminal());
        events.push(event);
        if done {
            return events;
        }
    }
}

fn wait_for_state(rx: &Receiver<PipelineEvent>, wanted: PipelineState) {
    loop {
        match rx.recv_timeout(TIMEOUT).expect("state never reached") {
            PipelineEvent::State(s) if s == wanted => return,
            _ => {}
        }
    }
}

fn detections(events: &[PipelineEvent]) -> Vec<plate_monitor::DetectionEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Detections(d) => Some(d.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn errors(events: &[PipelineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Error(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

fn final_state(events: &[PipelineEvent]) -> Option<PipelineState> {
    events.iter().rev().find_map(|e| match e {
        PipelineEvent::State(s) => Some(*s),
        _ => None,
    })
}

// ========== 测试 ==========

#[test]
fn single_event_for_persistent_identity() {
    let loader = MockLoader::new(vec![plate(7, 50.0, 50.0, 100.0, 100.0)]);
    let (mut pipeline, rx, releases) = pipeline(MockOpener::frames(10), loader);

    pipeline.start(descriptor(), config()).unwrap();
    let events = drain_session(&rx);

    let found = detections(&events);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].identity, 7);
    assert_eq!(found[0].frame_sequence, 0);
    assert_eq!(found[0].image.dimensions(), (50, 50));

    let frames = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::AnnotatedFrame(_)))
        .count();
    assert_eq!(frames, 10);

    let stats = events.iter().find_map(|e| match e {
        PipelineEvent::Stats(s) => Some(s.clone()),
        _ => None,
    });
    assert_eq!(stats.unwrap().get("plate"), Some(&1));

    assert_eq!(final_state(&events), Some(PipelineState::Stopped));
    assert_eq!(pipeline.wait(), PipelineState::Stopped);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn edge_object_is_never_reported() {
    let loader = MockLoader::new(vec![plate(7, 10.0, 10.0, 60.0, 60.0)]);
    let (mut pipeline, rx, _) = pipeline(MockOpener::frames(10), loader);

    pipeline.start(descriptor(), config()).unwrap();
    let events = drain_session(&rx);
    assert!(detections(&events).is_empty());
    assert_eq!(final_state(&events), Some(PipelineState::Stopped));
}

#[test]
fn progress_is_reported_in_order() {
    let loader = MockLoader::new(Vec::new());
    let (mut pipeline, rx, _) = pipeline(MockOpener::frames(1), loader);

    pipeline.start(descriptor(), config()).unwrap();
    let events = drain_session(&rx);
    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(&progress[..4], &[10, 50, 90, 100]);
}

#[test]
fn stop_while_paused_releases_once() {
    let loader = MockLoader::new(vec![plate(7, 50.0, 50.0, 100.0, 100.0)]);
    let (mut pipeline, rx, releases) = pipeline(MockOpener::endless(), loader);

    pipeline.start(descriptor(), config()).unwrap();
    wait_for_state(&rx, PipelineState::Running);
    assert!(pipeline.is_active());

    pipeline.pause();
    wait_for_state(&rx, PipelineState::Paused);
    assert_eq!(pipeline.state(), PipelineState::Paused);

    pipeline.stop();
    wait_for_state(&rx, PipelineState::Stopped);
    pipeline.stop();

    assert_eq!(pipeline.wait(), PipelineState::Stopped);
    assert!(!pipeline.is_active());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn pause_and_resume_continue_processing() {
    let loader = MockLoader::new(Vec::new());
    let (mut pipeline, rx, _) = pipeline(MockOpener::endless(), loader);

    pipeline.start(descriptor(), config()).unwrap();
    wait_for_state(&rx, PipelineState::Running);
    pipeline.pause();
    wait_for_state(&rx, PipelineState::Paused);
    pipeline.resume();
    wait_for_state(&rx, PipelineState::Running);

    // 恢复后继续输出帧
    loop {
        if let PipelineEvent::AnnotatedFrame(_) = rx.recv_timeout(TIMEOUT).unwrap() {
            break;
        }
    }
    pipeline.stop();
    assert_eq!(pipeline.wait(), PipelineState::Stopped);
}

#[test]
fn transient_errors_are_skipped() {
    let opener = MockOpener::script(vec![Step::Frame, Step::ReadError, Step::Frame, Step::Frame]);
    let mut loader = MockLoader::new(vec![plate(7, 50.0, 50.0, 100.0, 100.0)]);
    loader.fail_on = vec![1];
    let (mut pipeline, rx, releases) = pipeline(opener, loader);

    pipeline.start(descriptor(), config()).unwrap();
    let events = drain_session(&rx);

    assert_eq!(errors(&events).len(), 2);
    let frames: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::AnnotatedFrame(f) => Some(f.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(frames, vec![0, 2]);
    assert_eq!(detections(&events).len(), 1);
    assert_eq!(final_state(&events), Some(PipelineState::Stopped));
    pipeline.wait();
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn repeated_read_failures_end_the_session() {
    let opener = MockOpener::script(vec![Step::ReadError; 10]);
    let (mut pipeline, rx, releases) = pipeline(opener, MockLoader::new(Vec::new()));
    let cfg = MonitorConfig {
        max_consecutive_read_failures: 3,
        ..config()
    };

    pipeline.start(descriptor(), cfg).unwrap();
    let events = drain_session(&rx);

    let errs = errors(&events);
    assert_eq!(errs.len(), 4);
    assert!(errs[3].contains("lost"));
    assert_eq!(final_state(&events), Some(PipelineState::Stopped));
    pipeline.wait();
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn lost_source_ends_immediately() {
    let opener = MockOpener::script(vec![Step::Frame, Step::Lost, Step::Frame]);
    let (mut pipeline, rx, _) = pipeline(opener, MockLoader::new(Vec::new()));

    pipeline.start(descriptor(), config()).unwrap();
    let events = drain_session(&rx);
    let frames = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::AnnotatedFrame(_)))
        .count();
    assert_eq!(frames, 1);
    assert_eq!(final_state(&events), Some(PipelineState::Stopped));
}

#[test]
fn open_failure_marks_failed() {
    let (mut pipeline, rx, releases) = pipeline(MockOpener::failing(), MockLoader::new(Vec::new()));

    pipeline.start(descriptor(), config()).unwrap();
    let events = drain_session(&rx);

    assert_eq!(final_state(&events), Some(PipelineState::Failed));
    assert!(errors(&events)[0].contains("no such device"));
    assert_eq!(pipeline.wait(), PipelineState::Failed);
    assert_eq!(releases.load(Ordering::SeqCst), 0);
}

#[test]
fn model_load_failure_releases_source() {
    let mut loader = MockLoader::new(Vec::new());
    loader.fail = true;
    let (mut pipeline, rx, releases) = pipeline(MockOpener::frames(3), loader);

    pipeline.start(descriptor(), config()).unwrap();
    let events = drain_session(&rx);

    assert_eq!(final_state(&events), Some(PipelineState::Failed));
    assert_eq!(pipeline.wait(), PipelineState::Failed);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn start_while_active_is_rejected() {
    let (mut pipeline, rx, _) = pipeline(MockOpener::endless(), MockLoader::new(Vec::new()));

    pipeline.start(descriptor(), config()).unwrap();
    wait_for_state(&rx, PipelineState::Running);

    let err = pipeline.start(descriptor(), config()).unwrap_err();
    assert!(matches!(err, MonitorError::SessionActive));

    pipeline.stop();
    assert_eq!(pipeline.wait(), PipelineState::Stopped);
    let rest: Vec<PipelineEvent> = rx.try_iter().collect();
    assert!(errors(&rest).iter().any(|m| m.contains("already active")));
}

#[test]
fn invalid_config_is_rejected() {
    let (mut pipeline, _rx, _) = pipeline(MockOpener::frames(1), MockLoader::new(Vec::new()));
    let cfg = MonitorConfig {
        confidence_threshold: 2.0,
        ..config()
    };
    assert!(matches!(
        pipeline.start(descriptor(), cfg),
        Err(MonitorError::Config(_))
    ));
    assert_eq!(pipeline.state(), PipelineState::Idle);

    // 上限为 0 会让单次读帧失败直接结束会话
    let cfg = MonitorConfig {
        max_consecutive_read_failures: 0,
        ..config()
    };
    assert!(matches!(
        pipeline.start(descriptor(), cfg),
        Err(MonitorError::Config(_))
    ));
    assert!(!pipeline.is_active());
}

#[test]
fn read_failure_below_limit_is_skipped() {
    let opener = MockOpener::script(vec![Step::ReadError, Step::Frame, Step::Frame]);
    let (mut pipeline, rx, _) = pipeline(opener, MockLoader::new(Vec::new()));
    let cfg = MonitorConfig {
        max_consecutive_read_failures: 2,
        ..config()
    };

    pipeline.start(descriptor(), cfg).unwrap();
    let events = drain_session(&rx);

    assert_eq!(errors(&events).len(), 1);
    let frames = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::AnnotatedFrame(_)))
        .count();
    assert_eq!(frames, 2);
    pipeline.wait();
}

#[test]
fn model_is_reused_by_next_session() {
    let loader = MockLoader::new(vec![plate(7, 50.0, 50.0, 100.0, 100.0)]);
    let loads = Arc::clone(&loader.loads);
    let resets = Arc::clone(&loader.resets);
    let (mut pipeline, rx, releases) = pipeline(MockOpener::frames(3), loader);

    pipeline.start(descriptor(), config()).unwrap();
    let first = drain_session(&rx);
    pipeline.wait();
    assert!(pipeline.has_cached_model());

    pipeline.start(descriptor(), config()).unwrap();
    let second = drain_session(&rx);
    pipeline.wait();

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(resets.load(Ordering::SeqCst), 2);
    assert_eq!(releases.load(Ordering::SeqCst), 2);
    assert!(second.iter().any(
        |e| matches!(e, PipelineEvent::Progress { message, .. } if message == "reusing model")
    ));
    // 新会话的ID记忆是空的
    assert_eq!(detections(&first).len(), 1);
    assert_eq!(detections(&second).len(), 1);

    pipeline.clear_model_cache();
    assert!(!pipeline.has_cached_model());
    pipeline.start(descriptor(), config()).unwrap();
    let third = drain_session(&rx);
    pipeline.wait();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert!(third.iter().any(
        |e| matches!(e, PipelineEvent::Progress { message, .. } if message == "loading model")
    ));
}

#[test]
fn auto_save_writes_crops() {
    let dir = tempfile::tempdir().unwrap();
    let loader = MockLoader::new(vec![
        plate(7, 50.0, 50.0, 100.0, 100.0),
        plate(8, 110.0, 110.0, 150.0, 140.0),
    ]);
    let (mut pipeline, rx, _) = pipeline(MockOpener::frames(5), loader);
    let cfg = MonitorConfig {
        auto_save: true,
        save_dir: dir.path().join("crops"),
        ..config()
    };

    pipeline.start(descriptor(), cfg).unwrap();
    let events = drain_session(&rx);
    pipeline.wait();

    assert!(errors(&events).is_empty());
    let saved: Vec<_> = std::fs::read_dir(dir.path().join("crops"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(saved.len(), 2);
}

#[test]
fn save_failure_does_not_stop_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let loader = MockLoader::new(vec![plate(7, 50.0, 50.0, 100.0, 100.0)]);
    let (mut pipeline, rx, _) = pipeline(MockOpener::frames(5), loader);
    let cfg = MonitorConfig {
        auto_save: true,
        save_dir: blocker.join("crops"),
        ..config()
    };

    pipeline.start(descriptor(), cfg).unwrap();
    let events = drain_session(&rx);

    assert_eq!(detections(&events).len(), 1);
    assert_eq!(errors(&events).len(), 1);
    let frames = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::AnnotatedFrame(_)))
        .count();
    assert_eq!(frames, 5);
    assert_eq!(final_state(&events), Some(PipelineState::Stopped));
}

#[test]
fn full_bounded_sink_blocks_neither_control_nor_stop() {
    let opener = MockOpener::endless();
    let releases = Arc::clone(&opener.releases);
    let (sink, rx) = ChannelSink::bounded(1);
    let mut pipeline = Pipeline::new(
        Arc::new(opener),
        Arc::new(MockLoader::new(vec![plate(7, 50.0, 50.0, 100.0, 100.0)])),
        Arc::new(sink),
    );

    // 无人接收: 通道很快被填满, 工作线程停在投递上
    pipeline.start(descriptor(), config()).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert!(pipeline.is_active());

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let second = pipeline.start(descriptor(), config());
        let _ = done_tx.send((pipeline, second));
    });
    let (mut pipeline, second) = done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("rejected start blocked on a full sink");
    assert!(matches!(second, Err(MonitorError::SessionActive)));

    pipeline.stop();
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let state = pipeline.wait();
        let _ = done_tx.send(state);
    });
    let state = done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("stop was not observed while the sink was full");
    assert_eq!(state, PipelineState::Stopped);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    drop(rx);
}

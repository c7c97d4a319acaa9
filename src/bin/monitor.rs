/// 车牌监控 (Plate Monitor)
///
/// 离线回放: 图片目录作为视频帧, 跟踪日志作为模型输出
///
/// 用法:
///   plate-monitor --frames <dir> --tracks <tracks.json>
///   plate-monitor --frames <dir> --detections <detections.json>
use anyhow::{bail, Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use plate_monitor::detection::IouTrackerConfig;
use plate_monitor::input::{DirectoryOpener, ReplayLog, ReplayModelLoader};
use plate_monitor::{
    ChannelSink, MonitorConfig, Pipeline, PipelineEvent, SourceDescriptor, SourceKind,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 车牌监控参数
#[derive(Parser, Debug)]
#[command(author, version, about = "车牌监控 - 跟踪去重离线回放", long_about = None)]
struct Args {
    /// 帧图片目录 (按文件名排序)
    #[arg(short, long)]
    frames: PathBuf,

    /// 跟踪日志 (带ID, 每帧一个数组)
    #[arg(short, long, conflicts_with = "detections")]
    tracks: Option<PathBuf>,

    /// 检测日志 (无ID, 使用IOU跟踪器)
    #[arg(short, long)]
    detections: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 裁剪图保存目录
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// 置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// 标签字体
    #[arg(long)]
    font: Option<String>,

    /// 不保存裁剪图
    #[arg(long, default_value_t = false)]
    no_save: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let log = match (&args.tracks, &args.detections) {
        (Some(path), None) => ReplayLog::Tracks(path.clone()),
        (None, Some(path)) => ReplayLog::Detections(path.clone(), IouTrackerConfig::default()),
        _ => bail!("需要指定 --tracks 或 --detections 其中之一"),
    };

    // ========== 配置 ==========
    let config_path = args.config.clone().unwrap_or_else(MonitorConfig::default_path);
    let mut config = MonitorConfig::load(&config_path);
    if let Some(conf) = args.conf {
        config.confidence_threshold = conf;
    }
    if let Some(dir) = &args.save_dir {
        config.save_dir = dir.clone();
    }
    if args.font.is_some() {
        config.font_path = args.font.clone();
    }
    if args.no_save {
        config.auto_save = false;
    }
    config.source.kind = SourceKind::LocalFile;
    config.source.path = args.frames.display().to_string();
    config.validate().context("配置无效")?;
    config.print_summary();

    let descriptor = SourceDescriptor::from_settings(&config.source).context("视频源无效")?;

    // ========== 启动流水线 ==========
    let (sink, rx) = ChannelSink::new();
    let mut pipeline = Pipeline::new(
        Arc::new(DirectoryOpener),
        Arc::new(ReplayModelLoader::new(log)),
        Arc::new(sink),
    );
    pipeline
        .start(descriptor, config.clone())
        .context("启动监控失败")?;

    let mut total_events = 0usize;
    for event in rx.iter() {
        match event {
            PipelineEvent::Progress { message, percent } => {
                info!("⏳ [{:>3}%] {}", percent, message)
            }
            PipelineEvent::Detections(events) => {
                for e in &events {
                    println!(
                        "#{:<5} {:<12} {:.2}  {}x{}  帧 {}  {}",
                        e.identity,
                        e.label,
                        e.confidence,
                        e.image.width(),
                        e.image.height(),
                        e.frame_sequence,
                        e.timestamp.format("%H:%M:%S%.3f")
                    );
                }
                total_events += events.len();
            }
            PipelineEvent::Stats(stats) => info!("📊 统计: {:?}", stats),
            PipelineEvent::Error(message) => warn!("⚠️  {}", message),
            PipelineEvent::State(state) => {
                info!("🔁 状态: {}", state.name());
                if state.is_terminal() {
                    break;
                }
            }
            PipelineEvent::AnnotatedFrame(_) => {}
        }
    }

    let final_state = pipeline.wait();
    info!("✅ 共发现 {} 个目标, 最终状态: {}", total_events, final_state.name());
    if final_state == plate_monitor::PipelineState::Failed {
        error!("❌ 监控会话失败");
        std::process::exit(1);
    }
    Ok(())
}

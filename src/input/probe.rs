//! 流媒体分辨率查询
//!
//! 独立的后台任务, 结果只影响配置 (可选分辨率列表), 不参与帧循环.

use crossbeam_channel::{bounded, Receiver};
use tracing::{info, warn};

use crate::error::Result;

/// 查询流地址可用的分辨率 (如 "1080p", "720p60")
pub trait ResolutionProbe: Send + 'static {
    fn resolutions(&self, url: &str) -> Result<Vec<String>>;
}

/// 启动后台查询线程, 结果按分辨率从高到低排序后通过通道返回
pub fn spawn_resolution_probe<P: ResolutionProbe>(
    probe: P,
    url: String,
) -> Receiver<Result<Vec<String>>> {
    let (tx, rx) = bounded(1);

    std::thread::spawn(move || {
        info!("🔍 正在获取分辨率列表: {}", url);
        let result = probe.resolutions(&url).map(sort_resolutions);
        match &result {
            Ok(list) => info!("✅ 可用分辨率: {:?}", list),
            Err(e) => warn!("⚠️  获取分辨率失败: {}", e),
        }
        let _ = tx.send(result);
    });

    rx
}

/// 去重并按高度降序排列, 无法解析的项放在最后
pub fn sort_resolutions(mut list: Vec<String>) -> Vec<String> {
    fn height(res: &str) -> Option<u32> {
        let digits: String = res.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    list.sort();
    list.dedup();
    list.sort_by(|a, b| match (height(a), height(b)) {
        (Some(ha), Some(hb)) => hb.cmp(&ha).then_with(|| b.cmp(a)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
    list
}

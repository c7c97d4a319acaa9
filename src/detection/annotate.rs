//! 检测框绘制
//! Burns tracked boxes and labels into a copy of the frame

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

use super::types::{RenderOptions, TrackedObject};

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;
/// 无字体时标签色块高度
const TAG_HEIGHT: u32 = 6;

pub struct Annotator {
    font: Option<FontArc>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// 从字体文件创建; 加载失败时退化为无文字标签
    pub fn from_font_path(path: Option<&str>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));

        match font {
            Ok(font) => {
                info!("✅ 标签字体加载成功: {}", path);
                Self::new(Some(font))
            }
            Err(e) => {
                warn!("⚠️  标签字体加载失败 ({}): {}, 标签仅显示色块", path, e);
                Self::default()
            }
        }
    }

    /// 返回绘制后的新图像, 原图不变
    pub fn annotate(
        &self,
        image: &RgbImage,
        objects: &[TrackedObject],
        options: RenderOptions,
    ) -> RgbImage {
        let mut canvas = image.clone();
        if !options.show_boxes && !options.show_labels {
            return canvas;
        }

        for obj in objects {
            let (r, g, b) = id_to_color(obj.identity);
            let color = Rgb([r, g, b]);

            if options.show_boxes {
                self.draw_box(&mut canvas, obj, color);
            }
            if options.show_labels {
                self.draw_label(&mut canvas, obj, color);
            }
        }

        canvas
    }

    fn draw_box(&self, canvas: &mut RgbImage, obj: &TrackedObject, color: Rgb<u8>) {
        let x = obj.bbox.x1.round() as i32;
        let y = obj.bbox.y1.round() as i32;
        let w = obj.bbox.width().round() as i32;
        let h = obj.bbox.height().round() as i32;

        for t in 0..BOX_THICKNESS {
            let (bw, bh) = (w - 2 * t, h - 2 * t);
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x + t, y + t).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, obj: &TrackedObject, color: Rgb<u8>) {
        let x = obj.bbox.x1.round() as i32;
        let top = obj.bbox.y1.round() as i32;

        match &self.font {
            Some(font) => {
                let text = format!("#{} {} {:.2}", obj.identity, obj.label, obj.confidence);
                let scale = PxScale::from(LABEL_SCALE);
                let (tw, th) = text_size(scale, font, &text);
                let bg_w = tw + LABEL_PADDING * 2;
                let bg_h = th + LABEL_PADDING * 2;

                // 框上方放不下时画在框内
                let y = if top - bg_h as i32 >= 0 { top - bg_h as i32 } else { top };
                draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(bg_w, bg_h), color);
                draw_text_mut(
                    canvas,
                    Rgb([255, 255, 255]),
                    x + LABEL_PADDING as i32,
                    y + LABEL_PADDING as i32,
                    scale,
                    font,
                    &text,
                );
            }
            None => {
                let w = obj.bbox.width().round().max(1.0) as u32;
                let y = (top - TAG_HEIGHT as i32).max(0);
                draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(w, TAG_HEIGHT), color);
            }
        }
    }
}

/// 根据ID生成不同颜色
pub fn id_to_color(id: u32) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

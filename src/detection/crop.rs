//! 目标裁剪
//! Crops a bounding box out of a frame

use image::{imageops, RgbImage};

use super::types::BoundingBox;

/// 按检测框裁剪图像
///
/// 坐标截断为整数后限制在画面范围内; 区域宽或高不为正时返回 0x0 图像.
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let (w, h) = (image.width() as i64, image.height() as i64);

    let x1 = (bbox.x1 as i64).clamp(0, w);
    let y1 = (bbox.y1 as i64).clamp(0, h);
    let x2 = (bbox.x2 as i64).clamp(0, w);
    let y2 = (bbox.y2 as i64).clamp(0, h);

    if x2 <= x1 || y2 <= y1 {
        return RgbImage::new(0, 0);
    }

    imageops::crop_imm(
        image,
        x1 as u32,
        y1 as u32,
        (x2 - x1) as u32,
        (y2 - y1) as u32,
    )
    .to_image()
}

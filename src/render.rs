// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/render.rs - 检测结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::engine::Region;
use crate::frame::RgbFrame;

const BOX_COLOR: [u8; 3] = [0, 0, 255];
const BOX_THICKNESS: i32 = 2;

/// 把区域边框画到帧上，返回标注后的图像。
pub fn annotate(frame: &RgbFrame, regions: &[Region]) -> RgbImage {
  let mut image = frame.to_rgb_image();
  for region in regions {
    draw_region(&mut image, region);
  }
  image
}

// bbox 为归一化 [x_min, y_min, x_max, y_max]
fn draw_region(image: &mut RgbImage, region: &Region) {
  let (width, height) = (image.width() as f32, image.height() as f32);

  let x_min = ((region.bbox[0] * width).floor() as i32).clamp(0, width as i32 - 1);
  let y_min = ((region.bbox[1] * height).floor() as i32).clamp(0, height as i32 - 1);
  let x_max = ((region.bbox[2] * width).ceil() as i32).clamp(0, width as i32 - 1);
  let y_max = ((region.bbox[3] * height).ceil() as i32).clamp(0, height as i32 - 1);

  if x_min >= x_max || y_min >= y_max {
    return;
  }

  for thickness in 0..BOX_THICKNESS {
    let box_w = (x_max - x_min) - 2 * thickness;
    let box_h = (y_max - y_min) - 2 * thickness;
    if box_w < 1 || box_h < 1 {
      break;
    }
    let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(box_w as u32, box_h as u32);
    draw_hollow_rect_mut(image, rect, Rgb(BOX_COLOR));
  }
}

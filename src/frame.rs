// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 解码后的 RGB 帧，按 NHWC 排布持有像素缓冲。
///
/// 一帧只属于解码它的那次执行，执行结束（无论成败）即随所有权释放，
/// 不跨执行共享。
#[derive(Debug, Clone)]
pub struct RgbFrame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
}

impl RgbFrame {
  pub fn with_shape(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      width,
      height,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn into_nhwc(self) -> Box<[u8]> {
    self.data
  }

  /// 转回 `RgbImage` 以便绘制或重新编码。
  pub fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_raw(self.width, self.height, self.data.to_vec())
      .expect("帧缓冲长度与形状不一致")
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.into_raw().into_boxed_slice(),
      width,
      height,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_from_rgb_image_keeps_shape_and_layout() {
    let mut image = RgbImage::new(4, 2);
    image.put_pixel(3, 1, image::Rgb([10, 20, 30]));

    let frame = RgbFrame::from(image);
    assert_eq!(frame.width(), 4);
    assert_eq!(frame.height(), 2);
    assert_eq!(frame.as_nhwc().len(), 4 * 2 * RGB_CHANNELS);

    // NHWC: 最后一个像素位于缓冲末尾
    let tail = &frame.as_nhwc()[frame.as_nhwc().len() - 3..];
    assert_eq!(tail, &[10, 20, 30]);
  }

  #[test]
  fn frame_round_trips_through_rgb_image() {
    let mut frame = RgbFrame::with_shape(3, 3);
    frame.as_mut()[0] = 255;

    let image = frame.to_rgb_image();
    assert_eq!(image.get_pixel(0, 0)[0], 255);
    assert_eq!(RgbFrame::from(image).as_nhwc()[0], 255);
  }
}

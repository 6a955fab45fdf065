//! 切片图像解码.
//!
//! 常规 raster 格式 (tif/tiff) 在本地解码; 专有全切片格式 (svs)
//! 通过 [`WsiDecode`] 外部协作者解码.

use crate::consts::{RASTER_EXTS, RGB_CHANNELS, WSI_EXT};
use ndarray::Array3;
use std::path::{Path, PathBuf};

/// 切片解码错误.
#[derive(Debug)]
pub enum DecodeError {
    /// 不支持的切片格式 (或支持该格式的协作者未注册).
    UnsupportedFormat(PathBuf),

    /// 常规 raster 解码错误.
    Image(image::ImageError),

    /// 专有全切片格式解码错误, 由外部协作者报告.
    Wsi(String),
}

/// 专有全切片格式的外部解码协作者.
///
/// 本 crate 不实现专有显微镜格式的解码; 调用方可注册一个实现
/// (如基于 OpenSlide 的绑定) 来支持 svs 文件.
pub trait WsiDecode {
    /// 将 `path` 指向的全切片文件整体解码为 `(H, W, 3)` RGB 数组.
    fn decode(&self, path: &Path) -> Result<Array3<u8>, DecodeError>;
}

/// 打开并解码一个切片图像文件, 返回 `(H, W, 3)` 数组.
///
/// RGBA 输入的 alpha 通道在此处被移除. 扩展名匹配不区分大小写;
/// 两种受支持格式之外的文件返回 [`DecodeError::UnsupportedFormat`].
pub fn open_slide(path: &Path, wsi: Option<&dyn WsiDecode>) -> Result<Array3<u8>, DecodeError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    if RASTER_EXTS.iter().any(|r| ext.eq_ignore_ascii_case(r)) {
        // into_rgb8 同时移除可能存在的 alpha 通道.
        let rgb = image::open(path).map_err(DecodeError::Image)?.into_rgb8();
        let (w, h) = rgb.dimensions();

        // 行优先连续缓冲, 该操作不会生成 `Err`.
        Ok(
            Array3::from_shape_vec((h as usize, w as usize, RGB_CHANNELS), rgb.into_raw())
                .unwrap(),
        )
    } else if ext.eq_ignore_ascii_case(WSI_EXT) {
        match wsi {
            Some(decoder) => decoder.decode(path),
            None => Err(DecodeError::UnsupportedFormat(path.to_owned())),
        }
    } else {
        Err(DecodeError::UnsupportedFormat(path.to_owned()))
    }
}

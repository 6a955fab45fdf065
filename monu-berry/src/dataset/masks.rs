//! 掩膜装载.
//!
//! 掩膜的实际解码工作由外部协作者完成, 本模块只定义其契约
//! ([`OpenMasks`]) 并提供一个读取预解码 `.npy` 位图的默认实现.

use crate::consts::NucleusClass;
use crate::{ClassMasks, Idx2d};
use ndarray::Array3;
use ndarray_npy::{read_npy, ReadNpyError};
use std::path::{Path, PathBuf};

/// 掩膜装载错误.
#[derive(Debug)]
pub enum MaskError {
    /// 期望的掩膜目录不存在.
    MissingFolder(PathBuf),

    /// 缺少某一类别的掩膜文件.
    MissingClass(PathBuf),

    /// npy 读取错误.
    ReadNpy(ReadNpyError),

    /// 掩膜形状与图像空间尺寸不一致.
    ShapeMismatch {
        /// 问题文件.
        path: PathBuf,

        /// 期望的空间尺寸 `(H, W)`.
        expect: Idx2d,

        /// 实际读到的形状.
        got: (usize, usize, usize),
    },
}

/// 掩膜装载外部协作者.
///
/// 契约: `open_masks(folder, (h, w), test)` 返回与图像空间尺寸对齐的
/// 各类别 `(H, W, 1)` 掩膜; `test` 为真时额外包含模糊区域掩膜.
/// 目录或类别文件缺失时返回查找错误.
pub trait OpenMasks {
    /// 装载 `folder` 下的全部类别掩膜.
    fn open_masks(&self, folder: &Path, shape: Idx2d, test: bool)
        -> Result<ClassMasks, MaskError>;
}

/// 默认协作者实现: 掩膜目录下按类别文件名主干存放的 `.npy` 位图
/// (`ep.npy`, `lym.npy`, `macro.npy`, `neutr.npy`, 测试集另有 `amb.npy`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NpyMaskDir;

impl NpyMaskDir {
    fn read_class(
        folder: &Path,
        class: NucleusClass,
        (h, w): Idx2d,
    ) -> Result<Array3<u8>, MaskError> {
        let path = folder.join(format!("{}.npy", class.stem()));
        if !path.is_file() {
            return Err(MaskError::MissingClass(path));
        }
        let arr: Array3<u8> = read_npy(&path).map_err(MaskError::ReadNpy)?;
        if arr.dim() != (h, w, 1) {
            return Err(MaskError::ShapeMismatch {
                path,
                expect: (h, w),
                got: arr.dim(),
            });
        }
        Ok(arr)
    }
}

impl OpenMasks for NpyMaskDir {
    fn open_masks(
        &self,
        folder: &Path,
        shape: Idx2d,
        test: bool,
    ) -> Result<ClassMasks, MaskError> {
        if !folder.is_dir() {
            return Err(MaskError::MissingFolder(folder.to_owned()));
        }

        let ambiguous = if test {
            Some(Self::read_class(folder, NucleusClass::Ambiguous, shape)?)
        } else {
            None
        };

        Ok(ClassMasks {
            ambiguous,
            epithelial: Self::read_class(folder, NucleusClass::Epithelial, shape)?,
            lymphocyte: Self::read_class(folder, NucleusClass::Lymphocyte, shape)?,
            macrophage: Self::read_class(folder, NucleusClass::Macrophage, shape)?,
            neutrophil: Self::read_class(folder, NucleusClass::Neutrophil, shape)?,
        })
    }
}

//! patch 规范化与持久化存储.

use crate::Idx2d;
use ndarray::{s, Array3, ArrayView3};
use ndarray_npy::{write_npy, WriteNpyError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 将 patch 的前 `img_channels` 个通道按 patch 内 min-max 规范化到 \[0, 1\].
///
/// 规范化只依据该 patch 自身的取值范围, 而非样本级或数据集级统计;
/// 零动态范围 (常数) 的 patch 图像部分置为全 0. 标签通道保持原样.
pub fn normalize_image_channels(patch: ArrayView3<'_, f32>, img_channels: usize) -> Array3<f32> {
    let mut out = patch.to_owned();
    let mut img = out.slice_mut(s![.., .., ..img_channels]);

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in img.iter() {
        min = min.min(v);
        max = max.max(v);
    }

    if max > min {
        let range = max - min;
        img.mapv_inplace(|v| (v - min) / range);
    } else {
        img.fill(0.0);
    }
    out
}

/// 输出目录布局: `{root}/{dataset}/{split}/{winW}x{winH}_{stepW}x{stepH}`.
///
/// `win` 与 `step` 按本 crate 的 `(h, w)` 约定传入, 目录名中宽在前.
pub fn patch_dir(root: &Path, dataset: &str, split: &str, win: Idx2d, step: Idx2d) -> PathBuf {
    root.join(dataset)
        .join(split)
        .join(format!("{}x{}_{}x{}", win.1, win.0, step.1, step.0))
}

/// 清空重建目录: 若 `dir` 已存在则整体删除后再创建.
pub fn rm_and_mkdir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

/// patch 写出器. 绑定单个输出目录与图像通道数, 整个运行期间复用
/// (目录只增不删).
#[derive(Debug)]
pub struct PatchWriter {
    dir: PathBuf,
    img_channels: usize,
}

impl PatchWriter {
    /// 清空重建 `dir` 并构造写出器.
    pub fn create(dir: PathBuf, img_channels: usize) -> io::Result<PatchWriter> {
        rm_and_mkdir(&dir)?;
        Ok(Self { dir, img_channels })
    }

    /// 输出目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 规范化图像通道并将 patch 写出为 `{name}_{idx:03}.npy`.
    pub fn write(
        &self,
        name: &str,
        idx: usize,
        patch: ArrayView3<'_, f32>,
    ) -> Result<(), WriteNpyError> {
        let out = normalize_image_channels(patch, self.img_channels);
        write_npy(self.dir.join(format!("{name}_{idx:03}.npy")), &out)
    }
}

/// 以 Drop 守卫管理生命周期的临时目录树.
///
/// merge 模式下的 background 目录树即此类资源: 其内容最终会并入主输出树,
/// 因此无论运行成功与否, 守卫离开作用域时整棵树都会被删除
/// (中途样本失败也不会留下残余). 调用 [`EphemeralDir::keep`] 可解除守卫.
#[derive(Debug)]
pub struct EphemeralDir {
    path: PathBuf,
    keep: bool,
}

impl EphemeralDir {
    /// 清空重建受守卫的目录.
    pub fn create(path: PathBuf) -> io::Result<EphemeralDir> {
        rm_and_mkdir(&path)?;
        Ok(Self { path, keep: false })
    }

    /// 目录路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 解除守卫并返回路径, 目录将被保留.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for EphemeralDir {
    fn drop(&mut self) {
        if !self.keep {
            // 析构路径上无法传播删除错误, 只能忽略.
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

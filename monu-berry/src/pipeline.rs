//! 数据集级入口: 枚举样本、切分 patch 并写出.
//!
//! 单线程同步执行, 每个样本完整经历 "装载 -> 组合 -> 平铺 -> 写出"
//! 后才处理下一个. 一次调用处理整个数据集, 无重试语义.

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array3;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;

use crate::consts::RGB_CHANNELS;
use crate::dataset::{self, IndexError, IndexOptions, MonusacIndex, SampleError};
use crate::patch::{
    label_occupancy, patch_dir, EphemeralDir, ExtractMode, PatchExtractor, PatchWriter,
};
use crate::Idx2d;

/// 文件级进度条样式.
static FILE_BAR: Lazy<ProgressStyle> = Lazy::new(|| {
    // 模板为常量, 该操作不会生成 `Err`.
    ProgressStyle::with_template(
        "Process File: |{bar:40}| {pos}/{len} [{elapsed_precise}<{eta_precise}]",
    )
    .unwrap()
    .progress_chars("##-")
});

/// patch 级进度条样式.
static PATCH_BAR: Lazy<ProgressStyle> = Lazy::new(|| {
    ProgressStyle::with_template(
        "Extracting  : |{bar:40}| {pos}/{len} [{elapsed_precise}<{eta_precise}]",
    )
    .unwrap()
    .progress_chars("##-")
});

/// 入口配置.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrepConfig {
    /// 图像根目录.
    pub images_path: PathBuf,

    /// 掩膜根目录.
    pub masks_path: PathBuf,

    /// 数据集名, 输出目录的第一级.
    pub dataset_name: String,

    /// 输出划分名 (如 "train" / "test"), 输出目录的第二级.
    pub out_dir_name: String,

    /// 窗口大小 `(h, w)`.
    pub win_size: Idx2d,

    /// 步长 `(h, w)`.
    pub step_size: Idx2d,

    /// 平铺模式.
    pub extract_type: ExtractMode,

    /// 预留开关: 是否生成类别 type map. 对仅含实例掩膜的数据集无效,
    /// 目前不影响任何行为.
    pub type_classification: bool,

    /// 是否将 informative 与 background patch 乱序并入同一目录.
    /// 为真时独立的 background 树只是中间产物, 运行结束后删除.
    pub merge_dir: bool,

    /// 是否为测试集划分 (样本将携带模糊区域掩膜通道).
    pub test: bool,

    /// 是否仅保留图像最后一个通道.
    pub blue_chan: bool,

    /// 输出根目录.
    pub working_dir: PathBuf,

    /// 几何不满足 (规划范围小于窗口) 时是否视为致命错误.
    /// 默认跳过该样本并继续, 这对 "小切片配大窗口" 是预期情形.
    pub strict_geometry: bool,
}

impl PrepConfig {
    /// 以默认选项构造配置.
    pub fn new(images_path: PathBuf, masks_path: PathBuf, working_dir: PathBuf) -> PrepConfig {
        Self {
            images_path,
            masks_path,
            dataset_name: "monusac".to_owned(),
            out_dir_name: "train".to_owned(),
            win_size: (256, 256),
            step_size: (128, 128),
            extract_type: ExtractMode::Mirror,
            type_classification: true,
            merge_dir: true,
            test: false,
            blue_chan: false,
            working_dir,
            strict_geometry: false,
        }
    }

    /// 以默认选项构造配置, 数据根目录取自环境变量或主目录默认位置
    /// (见 [`dataset::images_dir_from_env_or_home`]).
    pub fn from_env_or_home(working_dir: PathBuf) -> PrepConfig {
        Self::new(
            dataset::images_dir_from_env_or_home(),
            dataset::masks_dir_from_env_or_home(),
            working_dir,
        )
    }

    /// 图像通道数.
    #[inline]
    fn img_channels(&self) -> usize {
        if self.blue_chan {
            1
        } else {
            RGB_CHANNELS
        }
    }
}

/// 运行报告.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrepReport {
    /// 处理的样本数 (含跳过).
    pub samples: usize,

    /// 因几何不满足而跳过的样本数.
    pub skipped: usize,

    /// informative patch 总数.
    pub informative: usize,

    /// background patch 总数.
    pub background: usize,

    /// 实际写盘的 patch 文件数.
    pub written: usize,
}

/// 入口错误.
#[derive(Debug)]
pub enum PrepError {
    /// 窗口/步长配置不合法.
    BadGeometry {
        /// 配置的窗口.
        win: Idx2d,

        /// 配置的步长.
        step: Idx2d,
    },

    /// 索引构建失败.
    Index(IndexError),

    /// 样本装载失败 (掩膜缺失或切片解码错误), 终止整个运行.
    Sample {
        /// 样本文件名主干.
        name: String,

        /// 底层原因.
        source: SampleError,
    },

    /// `strict_geometry` 下, 样本规划范围小于窗口.
    Geometry {
        /// 样本文件名主干.
        name: String,

        /// 样本空间尺寸.
        spatial: Idx2d,
    },

    /// 输出目录准备或其他底层 I/O 错误.
    Io(std::io::Error),

    /// patch 写出错误.
    WriteNpy(ndarray_npy::WriteNpyError),
}

impl From<std::io::Error> for PrepError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ndarray_npy::WriteNpyError> for PrepError {
    fn from(value: ndarray_npy::WriteNpyError) -> Self {
        Self::WriteNpy(value)
    }
}

/// 处理整个数据集: 枚举 (图像, 掩膜) 对, 切分 patch 并写出.
///
/// 以默认协作者构建索引; 需要自定义掩膜装载或专有切片解码时,
/// 用 [`MonusacIndex::build_with`] 构建索引后调用 [`patch_folder_with`].
pub fn patch_folder(cfg: &PrepConfig) -> Result<PrepReport, PrepError> {
    let index = MonusacIndex::build(
        &cfg.images_path,
        &cfg.masks_path,
        IndexOptions {
            test: cfg.test,
            blue_chan: cfg.blue_chan,
        },
    )
    .map_err(PrepError::Index)?;

    patch_folder_with(cfg, &index)
}

/// 同 [`patch_folder`], 但由调用方提供已构建的索引.
pub fn patch_folder_with(cfg: &PrepConfig, index: &MonusacIndex) -> Result<PrepReport, PrepError> {
    let xtractor =
        PatchExtractor::new(cfg.win_size, cfg.step_size).ok_or(PrepError::BadGeometry {
            win: cfg.win_size,
            step: cfg.step_size,
        })?;
    let img_channels = cfg.img_channels();

    let out_dir = patch_dir(
        &cfg.working_dir.join("patches"),
        &cfg.dataset_name,
        &cfg.out_dir_name,
        cfg.win_size,
        cfg.step_size,
    );
    let black_root = cfg.working_dir.join("black_patches");
    let writer = PatchWriter::create(out_dir, img_channels)?;

    // merge 模式下 background 树只是中间产物, 以 Drop 守卫保证
    // 即使中途样本失败也不会留下残余.
    let mut black_writer = None;
    let mut _black_guard = None;
    if cfg.merge_dir {
        _black_guard = Some(EphemeralDir::create(black_root)?);
    } else {
        let black_dir = patch_dir(
            &black_root,
            &cfg.dataset_name,
            &cfg.out_dir_name,
            cfg.win_size,
            cfg.step_size,
        );
        black_writer = Some(PatchWriter::create(black_dir, img_channels)?);
    }

    let mut report = PrepReport::default();
    let file_bar = ProgressBar::new(index.len() as u64).with_style(FILE_BAR.clone());

    for (i, loaded) in index.iter() {
        let name = index.name(i).to_owned();
        let sample = loaded.map_err(|source| PrepError::Sample {
            name: name.clone(),
            source,
        })?;
        report.samples += 1;

        if !xtractor.accepts(sample.spatial_shape()) {
            if cfg.strict_geometry {
                return Err(PrepError::Geometry {
                    name,
                    spatial: sample.spatial_shape(),
                });
            }
            log::warn!("样本 {name} 的规划范围小于窗口, 已跳过");
            report.skipped += 1;
            file_bar.inc(1);
            continue;
        }

        let conc = sample.combined();
        let (subs, blacks) =
            xtractor.extract(conc.view(), cfg.extract_type, label_occupancy(img_channels));
        report.informative += subs.len();
        report.background += blacks.len();

        let patch_bar =
            ProgressBar::new((subs.len() + blacks.len()) as u64).with_style(PATCH_BAR.clone());

        if cfg.merge_dir {
            let mut patches: Vec<Array3<f32>> = subs;
            patches.extend(blacks);
            // 均匀随机置换, 不保证固定种子.
            patches.shuffle(&mut rand::thread_rng());

            for (idx, patch) in patches.iter().enumerate() {
                writer.write(sample.name(), idx, patch.view())?;
                report.written += 1;
                patch_bar.inc(1);
            }
        } else {
            // 仅 split 模式构造 background 写出器.
            let black_writer = black_writer.as_ref().unwrap();
            let base = subs.len();

            for (idx, patch) in subs.iter().enumerate() {
                writer.write(sample.name(), idx, patch.view())?;
                report.written += 1;
                patch_bar.inc(1);
            }
            // background 编号承接 informative 之后, 两棵树的文件名不重叠.
            for (idx, patch) in blacks.iter().enumerate() {
                black_writer.write(sample.name(), base + idx, patch.view())?;
                report.written += 1;
                patch_bar.inc(1);
            }
        }
        patch_bar.finish_and_clear();
        file_bar.inc(1);
    }
    file_bar.finish_and_clear();

    log::info!(
        "{}/{}: {} 个样本 (跳过 {}), informative {} + background {}, 写盘 {} 个文件",
        cfg.dataset_name,
        cfg.out_dir_name,
        report.samples,
        report.skipped,
        report.informative,
        report.background,
        report.written,
    );

    Ok(report)
    // merge 模式的 background 树随 _black_guard 析构而删除.
}

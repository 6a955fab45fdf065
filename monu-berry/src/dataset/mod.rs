//! 数据集索引与样本装载.
//!
//! 索引在构建时一次性扫描图像根目录, 得到有序且稳定的
//! (图像, 掩膜目录) 配对列表; 之后的随机访问与迭代都不再触碰文件系统
//! 的目录结构. 稳定的顺序是 patch 编号可复现的前提.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::consts::{ANNOT_EXT, RASTER_EXTS, WSI_EXT};
use crate::data::{blue_only, Sample};

pub mod masks;
pub mod slide;

pub use masks::{MaskError, NpyMaskDir, OpenMasks};
pub use slide::{open_slide, DecodeError, WsiDecode};

/// 获取 `{用户主目录}/dataset/monusac` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.push("monusac");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset/monusac` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 获取 MoNuSAC 图像根目录.
///
/// 1. 若环境变量 `$MONUSAC_IMAGES_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/monusac/images`.
pub fn images_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("MONUSAC_IMAGES_DIR") {
        PathBuf::from(d)
    } else {
        home_dataset_dir_with(["images"]).unwrap()
    }
}

/// 获取 MoNuSAC 掩膜根目录.
///
/// 1. 若环境变量 `$MONUSAC_MASKS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/monusac/masks`.
pub fn masks_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("MONUSAC_MASKS_DIR") {
        PathBuf::from(d)
    } else {
        home_dataset_dir_with(["masks"]).unwrap()
    }
}

/// 索引构建错误.
#[derive(Debug)]
pub enum IndexError {
    /// 目录遍历错误.
    Walk(walkdir::Error),

    /// xml 标注找不到对应的图像文件, 提示图像根目录配置错误.
    MissingImage(PathBuf),
}

/// 样本装载错误. 两种错误都会终止整个运行 (而非跳过样本),
/// 因为它们意味着数据根目录配置错误或数据损坏.
#[derive(Debug)]
pub enum SampleError {
    /// 掩膜目录或类别文件缺失, 或掩膜内容不合法.
    Mask(MaskError),

    /// 切片解码失败.
    Decode(DecodeError),
}

/// 索引配置.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// 是否为测试集划分 (样本将携带模糊区域掩膜).
    pub test: bool,

    /// 是否仅保留图像最后一个通道, 结果形状为 `(H, W, 1)`.
    pub blue_chan: bool,
}

#[derive(Debug)]
struct IndexEntry {
    name: String,
    image: PathBuf,
    mask_dir: PathBuf,
}

/// MoNuSAC 数据集索引.
///
/// 持有启动时构建的有序 (图像, 掩膜目录) 配对列表, 提供随机访问
/// ([`MonusacIndex::get`]) 和迭代器风格 ([`MonusacIndex::iter`]) 的样本装载.
pub struct MonusacIndex {
    entries: Vec<IndexEntry>,
    opts: IndexOptions,
    open_masks: Box<dyn OpenMasks>,
    wsi: Option<Box<dyn WsiDecode>>,
}

#[derive(Default)]
struct Candidate {
    raster: Option<PathBuf>,
    wsi: Option<PathBuf>,
    annot: Option<PathBuf>,
}

impl MonusacIndex {
    /// 以默认协作者 ([`NpyMaskDir`], 无专有切片解码器) 构建索引.
    ///
    /// 约定: 图像位于 `images_root/<病例号>/<主干>.<扩展名>`,
    /// 掩膜位于 `masks_root/<病例号>/<主干>/`.
    pub fn build(
        images_root: &Path,
        masks_root: &Path,
        opts: IndexOptions,
    ) -> Result<Self, IndexError> {
        Self::build_with(images_root, masks_root, opts, Box::new(NpyMaskDir), None)
    }

    /// 同 [`MonusacIndex::build`], 但由调用方提供掩膜装载与专有切片解码协作者.
    ///
    /// # 注意
    ///
    /// 1. 同一主干同时存在常规 raster 与专有格式文件时, 前者优先.
    /// 2. xml 标注只参与主干枚举; 若其主干没有任何图像文件,
    ///   则索引构建失败 ([`IndexError::MissingImage`]).
    pub fn build_with(
        images_root: &Path,
        masks_root: &Path,
        opts: IndexOptions,
        open_masks: Box<dyn OpenMasks>,
        wsi: Option<Box<dyn WsiDecode>>,
    ) -> Result<Self, IndexError> {
        // (病例号, 文件名主干) -> 候选文件. BTreeMap 保证枚举顺序稳定.
        let mut found: BTreeMap<(String, String), Candidate> = BTreeMap::new();

        for entry in WalkDir::new(images_root).sort_by_file_name() {
            let entry = entry.map_err(IndexError::Walk)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(OsStr::to_str),
                path.extension().and_then(OsStr::to_str),
            ) else {
                continue;
            };
            let parent = path
                .parent()
                .and_then(Path::file_name)
                .and_then(OsStr::to_str)
                .unwrap_or_default()
                .to_owned();

            let cand = found.entry((parent, stem.to_owned())).or_default();
            if RASTER_EXTS.iter().any(|r| ext.eq_ignore_ascii_case(r)) {
                // 同主干的多个 raster 文件按遍历序取第一个.
                cand.raster.get_or_insert_with(|| path.to_owned());
            } else if ext.eq_ignore_ascii_case(WSI_EXT) {
                cand.wsi = Some(path.to_owned());
            } else if ext.eq_ignore_ascii_case(ANNOT_EXT) {
                cand.annot = Some(path.to_owned());
            }
        }

        let mut entries = Vec::with_capacity(found.len());
        for ((parent, stem), cand) in found {
            let image = match (cand.raster, cand.wsi) {
                // 常规 raster 优先于专有格式.
                (Some(raster), _) => raster,
                (None, Some(wsi_file)) => wsi_file,
                // 候选必由三类扩展名之一产生, 走到这里只可能是孤立标注.
                (None, None) => {
                    return Err(IndexError::MissingImage(cand.annot.unwrap()));
                }
            };
            let mask_dir = masks_root.join(&parent).join(&stem);
            entries.push(IndexEntry {
                name: stem,
                image,
                mask_dir,
            });
        }

        Ok(Self {
            entries,
            opts,
            open_masks,
            wsi,
        })
    }

    /// 索引内的样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 索引是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 第 `index` 个样本的文件名主干.
    ///
    /// 当 `index` 越界时 panic.
    #[inline]
    pub fn name(&self, index: usize) -> &str {
        &self.entries[index].name
    }

    /// 装载第 `index` 个样本: 解码图像、装载掩膜并配对.
    ///
    /// 当 `index` 越界时 panic.
    pub fn get(&self, index: usize) -> Result<Sample, SampleError> {
        let entry = &self.entries[index];

        let mut image = open_slide(&entry.image, self.wsi.as_deref()).map_err(SampleError::Decode)?;
        let (h, w, _) = image.dim();

        let masks = self
            .open_masks
            .open_masks(&entry.mask_dir, (h, w), self.opts.test)
            .map_err(SampleError::Mask)?;

        if self.opts.blue_chan {
            image = blue_only(image);
        }

        Ok(Sample::new(entry.name.clone(), image, masks))
    }

    /// 获取能按索引序迭代全部样本的迭代器.
    #[inline]
    pub fn iter(&self) -> SampleIter<'_> {
        SampleIter {
            index: self,
            next: 0,
        }
    }
}

/// 样本迭代器, 按索引序依次装载.
#[derive(Clone)]
pub struct SampleIter<'a> {
    index: &'a MonusacIndex,
    next: usize,
}

impl Iterator for SampleIter<'_> {
    type Item = (usize, Result<Sample, SampleError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.index.len() {
            return None;
        }
        let i = self.next;
        self.next += 1;
        Some((i, self.index.get(i)))
    }
}

impl ExactSizeIterator for SampleIter<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.index.len() - self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::TRAIN_CLASSES;
    use ndarray::Array3;
    use ndarray_npy::write_npy;
    use std::fs;

    fn write_tif(path: &Path, h: u32, w: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_pixel(w, h, image::Rgb([50, 100, 150]))
            .save(path)
            .unwrap();
    }

    fn write_train_masks(dir: &Path, h: usize, w: usize) {
        fs::create_dir_all(dir).unwrap();
        for class in TRAIN_CLASSES {
            let arr = Array3::<u8>::zeros((h, w, 1));
            write_npy(dir.join(format!("{}.npy", class.stem())), &arr).unwrap();
        }
    }

    #[test]
    fn test_index_is_ordered_and_stable() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        write_tif(&images.join("p2/b.tif"), 4, 4);
        write_tif(&images.join("p1/c.tif"), 4, 4);
        write_tif(&images.join("p1/a.tif"), 4, 4);

        let idx = MonusacIndex::build(
            &images,
            &root.path().join("masks"),
            IndexOptions::default(),
        )
        .unwrap();

        assert_eq!(idx.len(), 3);
        assert_eq!(idx.name(0), "a");
        assert_eq!(idx.name(1), "c");
        assert_eq!(idx.name(2), "b");
    }

    #[test]
    fn test_raster_takes_precedence_over_wsi() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        write_tif(&images.join("p1/a.tif"), 4, 4);
        fs::write(images.join("p1/a.svs"), b"not a real slide").unwrap();

        let idx = MonusacIndex::build(
            &images,
            &root.path().join("masks"),
            IndexOptions::default(),
        )
        .unwrap();

        assert_eq!(idx.len(), 1);
        // 装载走 tif 解码路径; 若选择了 svs, 无协作者时会得到 Decode 错误.
        let masks_dir = root.path().join("masks/p1/a");
        write_train_masks(&masks_dir, 4, 4);
        assert!(idx.get(0).is_ok());
    }

    #[test]
    fn test_lonely_annotation_fails_build() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        fs::create_dir_all(images.join("p1")).unwrap();
        fs::write(images.join("p1/a.xml"), b"<xml/>").unwrap();

        let err = MonusacIndex::build(
            &images,
            &root.path().join("masks"),
            IndexOptions::default(),
        );
        assert!(matches!(err, Err(IndexError::MissingImage(_))));
    }

    #[test]
    fn test_annotation_resolves_to_raster_sibling() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        write_tif(&images.join("p1/a.tif"), 4, 4);
        fs::write(images.join("p1/a.xml"), b"<xml/>").unwrap();

        let idx = MonusacIndex::build(
            &images,
            &root.path().join("masks"),
            IndexOptions::default(),
        )
        .unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_missing_mask_dir_is_mask_error() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        write_tif(&images.join("p1/a.tif"), 4, 4);

        let idx = MonusacIndex::build(
            &images,
            &root.path().join("masks"),
            IndexOptions::default(),
        )
        .unwrap();
        let err = idx.get(0);
        assert!(matches!(
            err,
            Err(SampleError::Mask(MaskError::MissingFolder(_)))
        ));
    }

    #[test]
    fn test_blue_chan_sample_shape() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        write_tif(&images.join("p1/a.tif"), 5, 6);
        write_train_masks(&root.path().join("masks/p1/a"), 5, 6);

        let idx = MonusacIndex::build(
            &images,
            &root.path().join("masks"),
            IndexOptions {
                test: false,
                blue_chan: true,
            },
        )
        .unwrap();

        let sample = idx.get(0).unwrap();
        assert_eq!(sample.image().dim(), (5, 6, 1));
        assert_eq!(sample.img_channels(), 1);
        // 蓝色通道即 RGB 的最后一个通道.
        assert_eq!(sample.image()[(0, 0, 0)], 150);
    }

    #[test]
    fn test_iter_matches_get() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        write_tif(&images.join("p1/a.tif"), 4, 4);
        write_tif(&images.join("p1/b.tif"), 4, 4);
        write_train_masks(&root.path().join("masks/p1/a"), 4, 4);
        write_train_masks(&root.path().join("masks/p1/b"), 4, 4);

        let idx = MonusacIndex::build(
            &images,
            &root.path().join("masks"),
            IndexOptions::default(),
        )
        .unwrap();

        let it = idx.iter();
        assert_eq!(it.len(), 2);
        for (i, loaded) in it {
            assert_eq!(loaded.unwrap().name(), idx.name(i));
        }
    }
}

//! 病理样本基础数据结构: 切片图像与分类别细胞核掩膜.

use crate::Idx2d;
use ndarray::{concatenate, s, Array3, ArrayView3, Axis};

/// 分类别细胞核掩膜集合.
///
/// 每个掩膜的形状为 `(H, W, 1)`, 且与所属样本的图像空间尺寸一致
/// (由 [`Sample::new`] 在配对时检查). 像素值非零即代表该类细胞核.
///
/// `ambiguous` 仅在测试集划分中存在.
#[derive(Debug, Clone)]
pub struct ClassMasks {
    /// 模糊区域掩膜. 仅测试集存在.
    pub ambiguous: Option<Array3<u8>>,

    /// 上皮细胞掩膜.
    pub epithelial: Array3<u8>,

    /// 淋巴细胞掩膜.
    pub lymphocyte: Array3<u8>,

    /// 巨噬细胞掩膜.
    pub macrophage: Array3<u8>,

    /// 中性粒细胞掩膜.
    pub neutrophil: Array3<u8>,
}

impl ClassMasks {
    /// 掩膜通道总数 (训练集为 4, 测试集为 5).
    #[inline]
    pub fn channels(&self) -> usize {
        4 + usize::from(self.ambiguous.is_some())
    }

    /// 按固定通道序 (amb?, ep, lym, macro, neutr) 返回各掩膜视图.
    ///
    /// 该顺序与 [`crate::consts::TRAIN_CLASSES`] /
    /// [`crate::consts::TEST_CLASSES`] 一致, 并决定组合张量的标签通道排布.
    pub fn ordered(&self) -> Vec<ArrayView3<'_, u8>> {
        let mut v = Vec::with_capacity(self.channels());
        if let Some(amb) = &self.ambiguous {
            v.push(amb.view());
        }
        v.push(self.epithelial.view());
        v.push(self.lymphocyte.view());
        v.push(self.macrophage.view());
        v.push(self.neutrophil.view());
        v
    }
}

/// 一个切片级样本: 文件名主干、解码后的图像与配对的掩膜集合.
///
/// 构造后不可变. 样本本身不做持久化, 只有其派生的 patch 会被写盘.
#[derive(Debug, Clone)]
pub struct Sample {
    name: String,
    image: Array3<u8>,
    masks: ClassMasks,
}

impl Sample {
    /// 配对图像与掩膜, 构造样本.
    ///
    /// # 注意
    ///
    /// 1. `image` 形状必须为 `(H, W, C)`, 其中 `C` 为 1 或 3, 否则程序 panic.
    /// 2. 所有掩膜的空间尺寸必须与图像一致且末维为 1, 否则程序 panic.
    pub fn new(name: String, image: Array3<u8>, masks: ClassMasks) -> Self {
        let (h, w, c) = image.dim();
        assert!(matches!(c, 1 | 3), "图像通道数必须为 1 或 3, 但得到 {c}");
        for m in masks.ordered() {
            assert_eq!(m.dim(), (h, w, 1), "掩膜与图像空间尺寸不一致");
        }
        Self { name, image, masks }
    }

    /// 文件名主干.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 图像数据的一份不可变 shallow copy.
    #[inline]
    pub fn image(&self) -> ArrayView3<'_, u8> {
        self.image.view()
    }

    /// 掩膜集合.
    #[inline]
    pub fn masks(&self) -> &ClassMasks {
        &self.masks
    }

    /// 图像空间尺寸 `(H, W)`.
    #[inline]
    pub fn spatial_shape(&self) -> Idx2d {
        let (h, w, _) = self.image.dim();
        (h, w)
    }

    /// 图像通道数 (1 或 3).
    #[inline]
    pub fn img_channels(&self) -> usize {
        self.image.dim().2
    }

    /// 组合张量通道总数 (图像通道 + 掩膜通道).
    #[inline]
    pub fn channels(&self) -> usize {
        self.img_channels() + self.masks.channels()
    }

    /// 沿通道轴拼接图像与全部掩膜, 得到组合张量.
    ///
    /// 通道序固定为: 图像通道在前, 随后依次为 (amb?, ep, lym, macro, neutr).
    /// 前 [`Sample::img_channels`] 个通道为图像部分, 其余为标签部分;
    /// 写出阶段按同一约定拆分.
    pub fn combined(&self) -> Array3<f32> {
        let mut parts: Vec<Array3<f32>> = Vec::with_capacity(1 + self.masks.channels());
        parts.push(self.image.mapv(f32::from));
        for m in self.masks.ordered() {
            parts.push(m.mapv(f32::from));
        }
        let views: Vec<ArrayView3<'_, f32>> = parts.iter().map(|a| a.view()).collect();

        // 形状一致性已由构造时保证, 该操作不会生成 `Err`.
        concatenate(Axis(2), &views).unwrap()
    }
}

/// 仅保留图像的最后一个通道 (RGB 图像即蓝色通道), 结果形状为 `(H, W, 1)`.
pub fn blue_only(image: Array3<u8>) -> Array3<u8> {
    image.slice(s![.., .., -1..]).to_owned()
}

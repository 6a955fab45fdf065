//! 通用常量.

/// MoNuSAC 标注的细胞核类别.
///
/// `Ambiguous` 仅出现在测试集划分中, 代表标注者无法确定类别的区域.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NucleusClass {
    /// 模糊区域. 仅测试集存在.
    Ambiguous,

    /// 上皮细胞.
    Epithelial,

    /// 淋巴细胞.
    Lymphocyte,

    /// 巨噬细胞.
    Macrophage,

    /// 中性粒细胞.
    Neutrophil,
}

impl NucleusClass {
    /// 该类别掩膜文件的文件名主干.
    #[inline]
    pub const fn stem(&self) -> &'static str {
        match self {
            Self::Ambiguous => "amb",
            Self::Epithelial => "ep",
            Self::Lymphocyte => "lym",
            Self::Macrophage => "macro",
            Self::Neutrophil => "neutr",
        }
    }

    /// 是否为模糊区域.
    #[inline]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous)
    }
}

/// 训练集划分的掩膜通道顺序.
///
/// 该顺序同时决定了组合张量中图像通道之后的标签通道排布.
pub const TRAIN_CLASSES: [NucleusClass; 4] = [
    NucleusClass::Epithelial,
    NucleusClass::Lymphocyte,
    NucleusClass::Macrophage,
    NucleusClass::Neutrophil,
];

/// 测试集划分的掩膜通道顺序. 模糊区域通道位于最前.
pub const TEST_CLASSES: [NucleusClass; 5] = [
    NucleusClass::Ambiguous,
    NucleusClass::Epithelial,
    NucleusClass::Lymphocyte,
    NucleusClass::Macrophage,
    NucleusClass::Neutrophil,
];

/// 常规 raster 切片格式的扩展名. 解码由 `image` 完成.
pub const RASTER_EXTS: [&str; 2] = ["tif", "tiff"];

/// 专有全切片格式的扩展名. 解码由外部协作者完成.
pub const WSI_EXT: &str = "svs";

/// 标注文件扩展名. 其文件名主干映射到同目录下的图像文件.
pub const ANNOT_EXT: &str = "xml";

/// RGB 图像通道数.
pub const RGB_CHANNELS: usize = 3;

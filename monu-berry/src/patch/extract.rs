//! patch 提取: 滑窗平铺与 informative / background 分类.

use crate::Idx2d;
use itertools::iproduct;
use ndarray::{s, Array3, ArrayView3};

/// 平铺模式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExtractMode {
    /// 仅在现有范围内平铺; 尾部不足一个窗口的剩余条带被丢弃.
    Valid,

    /// 先做对称反射填充再平铺, 保证覆盖全部输入像素.
    Mirror,
}

/// patch 提取器, 持有窗口与步长几何.
///
/// 几何是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug)]
pub struct PatchExtractor {
    win: Idx2d,
    step: Idx2d,
}

impl PatchExtractor {
    /// 构建提取器.
    ///
    /// `win` 与 `step` 各维必须非零, 且 `step` 不得大于 `win`
    /// (否则平铺会漏像素), 不合法时返回 `None`.
    pub fn new(win: Idx2d, step: Idx2d) -> Option<PatchExtractor> {
        if step.0 == 0 || step.1 == 0 || step.0 > win.0 || step.1 > win.1 {
            None
        } else {
            Some(Self { win, step })
        }
    }

    /// 窗口大小 `(h, w)`.
    #[inline]
    pub fn window(&self) -> Idx2d {
        self.win
    }

    /// 步长 `(h, w)`.
    #[inline]
    pub fn step(&self) -> Idx2d {
        self.step
    }

    /// mirror 模式的规划范围 `(H + win_h - step_h, W + win_w - step_w)`.
    ///
    /// 上游以该值做样本级几何检查 ([`PatchExtractor::accepts`]),
    /// 以避免提取阶段静默产出零个 patch.
    #[inline]
    pub fn padded_extent(&self, (h, w): Idx2d) -> Idx2d {
        (h + self.win.0 - self.step.0, w + self.win.1 - self.step.1)
    }

    /// 空间尺寸为 `spatial` 的样本是否满足提取前提 (规划范围不小于窗口).
    #[inline]
    pub fn accepts(&self, spatial: Idx2d) -> bool {
        let (ph, pw) = self.padded_extent(spatial);
        ph >= self.win.0 && pw >= self.win.1
    }

    /// 平铺 `tensor` 并逐个分类, 返回 `(informative, background)` 两组 patch.
    ///
    /// 平铺按自上而下、自左而右的行优先序进行, 顺序稳定可复现,
    /// 它决定了 patch 的编号后缀. 每个候选 patch 恰好进入两组之一.
    ///
    /// `is_informative` 为调用方提供的分类规则; 标准规则见
    /// [`label_occupancy`].
    pub fn extract<F>(
        &self,
        tensor: ArrayView3<'_, f32>,
        mode: ExtractMode,
        is_informative: F,
    ) -> (Vec<Array3<f32>>, Vec<Array3<f32>>)
    where
        F: Fn(&ArrayView3<'_, f32>) -> bool,
    {
        match mode {
            ExtractMode::Valid => self.extract_valid(tensor, &is_informative),
            ExtractMode::Mirror => {
                let padded = self.mirror_pad(tensor);
                self.extract_valid(padded.view(), &is_informative)
            }
        }
    }

    fn extract_valid<F>(
        &self,
        tensor: ArrayView3<'_, f32>,
        is_informative: &F,
    ) -> (Vec<Array3<f32>>, Vec<Array3<f32>>)
    where
        F: Fn(&ArrayView3<'_, f32>) -> bool,
    {
        let (h, w, _) = tensor.dim();
        let (win_h, win_w) = self.win;
        let (step_h, step_w) = self.step;

        let mut informative = Vec::with_capacity(16);
        let mut background = Vec::with_capacity(16);
        if h < win_h || w < win_w {
            return (informative, background);
        }

        for (row, col) in iproduct!(
            (0..=h - win_h).step_by(step_h),
            (0..=w - win_w).step_by(step_w)
        ) {
            let win = tensor.slice(s![row..row + win_h, col..col + win_w, ..]);
            if is_informative(&win) {
                informative.push(win.to_owned());
            } else {
                background.push(win.to_owned());
            }
        }

        (informative, background)
    }

    /// 目标平铺范围: 不小于 `len` 的最小 `k * step + (win - step)`.
    /// 该范围可被窗口/步长恰好整铺, 因此 mirror 模式不会丢弃任何输入像素.
    fn mirror_extent(len: usize, win: usize, step: usize) -> usize {
        if len <= win {
            return win;
        }
        let k = (len - win).div_ceil(step);
        win + k * step
    }

    fn mirror_pad(&self, tensor: ArrayView3<'_, f32>) -> Array3<f32> {
        let (h, w, c) = tensor.dim();
        let ph = Self::mirror_extent(h, self.win.0, self.step.0);
        let pw = Self::mirror_extent(w, self.win.1, self.step.1);

        // 填充量对称分摊到两侧, 奇数时尾侧多 1.
        let pad_top = (ph - h) / 2;
        let pad_left = (pw - w) / 2;

        Array3::from_shape_fn((ph, pw, c), |(i, j, k)| {
            let src_h = reflect(i as isize - pad_top as isize, h);
            let src_w = reflect(j as isize - pad_left as isize, w);
            tensor[(src_h, src_w, k)]
        })
    }
}

/// 不重复边缘像素的反射索引 (numpy `reflect` 语义).
fn reflect(i: isize, len: usize) -> usize {
    debug_assert!(len > 0);
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut i = i.rem_euclid(period);
    if i >= len as isize {
        i = period - i;
    }
    i as usize
}

/// 标准分类规则: 第 `img_channels` 通道起的标签部分是否存在非零像素.
///
/// 所有标签通道的并集即 "分类通道"; 存在任一非零像素的 patch 为
/// informative, 否则为 background.
pub fn label_occupancy(img_channels: usize) -> impl Fn(&ArrayView3<'_, f32>) -> bool {
    move |patch| {
        patch
            .slice(s![.., .., img_channels..])
            .iter()
            .any(|v| *v != 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 单图像通道 (全 5) + 单分类通道的组合张量.
    fn tensor_with_labels(h: usize, w: usize, labels: &[Idx2d]) -> Array3<f32> {
        let mut t = Array3::from_shape_fn((h, w, 2), |(_, _, c)| if c == 0 { 5.0 } else { 0.0 });
        for &(i, j) in labels {
            t[(i, j, 1)] = 1.0;
        }
        t
    }

    #[test]
    fn test_valid_all_background() {
        // 10x10, 窗口 4, 步长 4: 每维 2 个完整窗口, 尾部 2 像素被丢弃.
        let t = tensor_with_labels(10, 10, &[]);
        let x = PatchExtractor::new((4, 4), (4, 4)).unwrap();
        let (sub, black) = x.extract(t.view(), ExtractMode::Valid, label_occupancy(1));

        assert_eq!(sub.len(), 0);
        assert_eq!(black.len(), 4);
        assert_eq!(black[0].dim(), (4, 4, 2));
    }

    #[test]
    fn test_valid_single_label_pixel() {
        // 同上, 但首个窗口内有一个非零分类像素.
        let t = tensor_with_labels(10, 10, &[(1, 1)]);
        let x = PatchExtractor::new((4, 4), (4, 4)).unwrap();
        let (sub, black) = x.extract(t.view(), ExtractMode::Valid, label_occupancy(1));

        assert_eq!(sub.len(), 1);
        assert_eq!(black.len(), 3);
        assert_eq!(sub[0][(1, 1, 1)], 1.0);
    }

    #[test]
    fn test_valid_drop_width() {
        // 11 宽, 窗口 4, 步长 3: 平铺到 10, 丢弃 (11 - 4) % 3 = 1 像素.
        let t = tensor_with_labels(11, 11, &[]);
        let x = PatchExtractor::new((4, 4), (3, 3)).unwrap();
        let (sub, black) = x.extract(t.view(), ExtractMode::Valid, label_occupancy(1));

        // 每维 (11 - 4) / 3 + 1 = 3 个位置.
        assert_eq!(sub.len() + black.len(), 9);
    }

    #[test]
    fn test_partition_is_disjoint_union() {
        let t = tensor_with_labels(12, 12, &[(0, 0), (6, 6), (11, 11)]);
        let x = PatchExtractor::new((4, 4), (2, 2)).unwrap();
        let (sub, black) = x.extract(t.view(), ExtractMode::Valid, label_occupancy(1));

        // 每维 (12 - 4) / 2 + 1 = 5 个位置.
        assert_eq!(sub.len() + black.len(), 25);
        assert!(!sub.is_empty());
        assert!(!black.is_empty());
        // 两组的分类结果互斥.
        assert!(sub.iter().all(|p| label_occupancy(1)(&p.view())));
        assert!(black.iter().all(|p| !label_occupancy(1)(&p.view())));
    }

    #[test]
    fn test_mirror_full_coverage() {
        // 11 宽, 窗口 4, 步长 3: 填充到 13 = 3 * 3 + 4, 每维 4 个位置.
        let t = tensor_with_labels(11, 11, &[]);
        let x = PatchExtractor::new((4, 4), (3, 3)).unwrap();
        let (sub, black) = x.extract(t.view(), ExtractMode::Mirror, label_occupancy(1));

        assert_eq!(sub.len() + black.len(), 16);
    }

    #[test]
    fn test_mirror_covers_trailing_label() {
        // valid 模式会丢掉尾部条带上的标签像素, mirror 模式不会.
        let t = tensor_with_labels(11, 11, &[(10, 10)]);
        let x = PatchExtractor::new((4, 4), (3, 3)).unwrap();

        let (sub_valid, _) = x.extract(t.view(), ExtractMode::Valid, label_occupancy(1));
        assert_eq!(sub_valid.len(), 0);

        let (sub_mirror, _) = x.extract(t.view(), ExtractMode::Mirror, label_occupancy(1));
        assert!(!sub_mirror.is_empty());
    }

    #[test]
    fn test_mirror_exact_fit_needs_no_padding() {
        // (10 - 4) % 3 == 0, 平铺已恰好整铺.
        assert_eq!(PatchExtractor::mirror_extent(10, 4, 3), 10);
        assert_eq!(PatchExtractor::mirror_extent(11, 4, 3), 13);
        assert_eq!(PatchExtractor::mirror_extent(3, 4, 3), 4);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect(0, 5), 0);
        assert_eq!(reflect(4, 5), 4);
        // 左侧反射不重复边缘像素.
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(-2, 5), 2);
        // 右侧同理.
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(6, 5), 2);
        // 退化情况.
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn test_geometry_gate() {
        let x = PatchExtractor::new((4, 4), (2, 2)).unwrap();
        assert_eq!(x.padded_extent((10, 7)), (12, 9));
        assert!(x.accepts((2, 10)));
        assert!(!x.accepts((1, 10)));
        assert!(!x.accepts((10, 1)));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(PatchExtractor::new((4, 4), (0, 2)).is_none());
        assert!(PatchExtractor::new((4, 4), (2, 0)).is_none());
        assert!(PatchExtractor::new((4, 4), (5, 4)).is_none());
        assert!(PatchExtractor::new((4, 4), (4, 4)).is_some());
    }
}

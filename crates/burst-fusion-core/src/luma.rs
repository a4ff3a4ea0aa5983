/// Single-channel `f32` plane used for registration.
#[derive(Clone, Debug)]
pub struct LumaImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>, // row-major, len = w*h
}

#[derive(Clone, Copy, Debug)]
pub struct LumaView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [f32],
}

impl LumaImage {
    pub fn view(&self) -> LumaView<'_> {
        LumaView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Halve the resolution with a 2x2 box filter. Odd trailing rows and
    /// columns are dropped.
    ///
    /// Pixel `i` of the result is centered on `2i + 0.5` of the input.
    pub fn downsample_2x(&self) -> LumaImage {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            let y0 = (2 * y).min(self.height - 1);
            let y1 = (2 * y + 1).min(self.height - 1);
            for x in 0..w {
                let x0 = (2 * x).min(self.width - 1);
                let x1 = (2 * x + 1).min(self.width - 1);
                let s = self.get(x0, y0) + self.get(x1, y0) + self.get(x0, y1) + self.get(x1, y1);
                data.push(0.25 * s);
            }
        }
        LumaImage {
            width: w,
            height: h,
            data,
        }
    }

    /// Mean absolute difference to another plane of the same size.
    pub fn mean_abs_diff(&self, other: &LumaImage) -> Option<f32> {
        if self.width != other.width || self.height != other.height || self.data.is_empty() {
            return None;
        }
        let sum: f64 = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs() as f64)
            .sum();
        Some((sum / self.data.len() as f64) as f32)
    }
}

#[inline]
fn get_clamped(src: &LumaView<'_>, x: i32, y: i32) -> f32 {
    let xi = x.clamp(0, src.width as i32 - 1) as usize;
    let yi = y.clamp(0, src.height as i32 - 1) as usize;
    src.data[yi * src.width + xi]
}

/// Bilinear sample with clamp-to-edge borders.
#[inline]
pub fn sample_bilinear(src: &LumaView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_clamped(src, x0, y0);
    let p10 = get_clamped(src, x0 + 1, y0);
    let p01 = get_clamped(src, x0, y0 + 1);
    let p11 = get_clamped(src, x0 + 1, y0 + 1);

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_and_clamps() {
        let img = LumaImage {
            width: 2,
            height: 2,
            data: vec![0.0, 10.0, 20.0, 30.0],
        };
        let v = img.view();
        assert!((sample_bilinear(&v, 0.5, 0.5) - 15.0).abs() < 1e-6);
        assert!((sample_bilinear(&v, -3.0, -3.0) - 0.0).abs() < 1e-6);
        assert!((sample_bilinear(&v, 5.0, 0.0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn downsample_averages_blocks() {
        let img = LumaImage {
            width: 4,
            height: 2,
            data: vec![0.0, 2.0, 10.0, 10.0, 4.0, 6.0, 10.0, 10.0],
        };
        let half = img.downsample_2x();
        assert_eq!((half.width, half.height), (2, 1));
        assert_eq!(half.data, vec![3.0, 10.0]);
    }

    #[test]
    fn mean_abs_diff_requires_same_size() {
        let a = LumaImage {
            width: 2,
            height: 1,
            data: vec![1.0, 3.0],
        };
        let b = LumaImage {
            width: 2,
            height: 1,
            data: vec![2.0, 1.0],
        };
        assert_eq!(a.mean_abs_diff(&b), Some(1.5));
        let c = LumaImage {
            width: 1,
            height: 2,
            data: vec![0.0, 0.0],
        };
        assert_eq!(a.mean_abs_diff(&c), None);
    }
}

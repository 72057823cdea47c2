/// Keeps the latest value and the sample weighted running average of a metric.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AverageMeter {
    pub val: f32,
    pub sum: f32,
    pub count: usize,
    pub avg: f32,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `val`, measured over `n` samples.
    pub fn update(&mut self, val: f32, n: usize) {
        self.val = val;
        self.sum += val * n as f32;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f32;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn weights_by_sample_count() {
        let mut m = AverageMeter::new();
        m.update(1., 3);
        m.update(5., 1);

        assert_eq!(m.val, 5.);
        assert_eq!(m.count, 4);
        assert_abs_diff_eq!(m.avg, 2.);

        m.reset();
        assert_eq!(m, AverageMeter::default());
    }

    #[test]
    fn empty_update_keeps_the_average() {
        let mut m = AverageMeter::new();
        m.update(3., 0);
        assert_eq!(m.avg, 0.);
    }
}

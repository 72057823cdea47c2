/// Linear warm-up weight: `current / length` clamped to `[0, 1]`, or `1` when `length` is zero.
pub fn linear_rampup(current: f32, length: f32) -> f32 {
    if length == 0. {
        return 1.;
    }

    (current / length).clamp(0., 1.)
}

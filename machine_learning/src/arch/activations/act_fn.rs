use super::Sigmoid;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Tanh,
    Relu,
}
use ActFn::*;

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        Sigmoid(Sigmoid::new(amp))
    }

    pub fn tanh() -> Self {
        Tanh
    }

    pub fn relu() -> Self {
        Relu
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            Sigmoid(a) => a.f(x),
            Tanh => x.tanh(),
            Relu => x.max(0.),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Sigmoid(a) => a.df(x),
            Tanh => 1. - x.tanh().powi(2),
            Relu => {
                if x > 0. {
                    1.
                } else {
                    0.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn derivatives_match_central_differences() {
        const H: f32 = 1e-3;

        for act_fn in [ActFn::sigmoid(2.), ActFn::tanh(), ActFn::relu()] {
            for x in [-1.5_f32, -0.3, 0.4, 2.0] {
                let numeric = (act_fn.f(x + H) - act_fn.f(x - H)) / (2. * H);
                assert_abs_diff_eq!(act_fn.df(x), numeric, epsilon = 1e-2);
            }
        }
    }
}

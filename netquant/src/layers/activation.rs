use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum ActivationFunction {
    #[default]
    Sigmoid,
    TanH,
    Linear,
    ReLu,
    /// min(a, max(b, x))
    BoundedReLu,
    SoftReLu,
    LeakyReLu,
    Abs,
    Sqrt,
    Square,
    Elu,
    HardSwish,
}

/// Activation function with its two parameters. Their meaning depends on the function:
/// `a` is the upper bound of `BoundedReLu`, the slope of `LeakyReLu` and `Linear`, and the alpha of
/// `Elu`; `b` is the lower bound of `BoundedReLu`, the intercept of `Linear` and the output scale of
/// `TanH`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivationDescriptor {
    pub function: ActivationFunction,
    pub a: f32,
    pub b: f32,
}

impl ActivationDescriptor {
    pub fn new(function: ActivationFunction) -> Self {
        Self {
            function,
            a: 0.0,
            b: 0.0,
        }
    }

    pub fn with_params(function: ActivationFunction, a: f32, b: f32) -> Self {
        Self { function, a, b }
    }

    /// Applies the function to a single value.
    pub fn apply(&self, x: f32) -> f32 {
        let (a, b) = (self.a, self.b);
        match self.function {
            ActivationFunction::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationFunction::TanH => a * (b * x).tanh(),
            ActivationFunction::Linear => a * x + b,
            ActivationFunction::ReLu => x.max(0.0),
            ActivationFunction::BoundedReLu => x.max(b).min(a),
            ActivationFunction::SoftReLu => x.exp().ln_1p(),
            ActivationFunction::LeakyReLu => {
                if x > 0.0 {
                    x
                } else {
                    a * x
                }
            }
            ActivationFunction::Abs => x.abs(),
            ActivationFunction::Sqrt => x.sqrt(),
            ActivationFunction::Square => x * x,
            ActivationFunction::Elu => {
                if x >= 0.0 {
                    x
                } else {
                    a * x.exp_m1()
                }
            }
            ActivationFunction::HardSwish => x * (x + 3.0).clamp(0.0, 6.0) / 6.0,
        }
    }
}

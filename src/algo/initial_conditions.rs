use std::fmt::Display;

use crate::message::payload::Tensor;

// Provides the value of every message key on every message edge before the first iteration
pub trait Initializer: Display {
    fn init(&self, key: &str, shape: &[usize]) -> Tensor;
}

// Fills precisions `a` with one constant and every other key with another
pub struct ConstantInit {
    a: f64,
    b: f64,
}

impl ConstantInit {
    pub fn new(a: f64, b: f64) -> Self {
        ConstantInit { a, b }
    }

    pub fn default() -> Self {
        ConstantInit { a: 0., b: 0. }
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }
}

impl Initializer for ConstantInit {
    fn init(&self, key: &str, shape: &[usize]) -> Tensor {
        match key {
            "a" => Tensor::Scalar(self.a),
            _ => Tensor::full(shape, self.b),
        }
    }
}

impl Display for ConstantInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConstantInit(a={}, b={})", self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_is_scalar_and_coefficient_is_filled() {
        let init = ConstantInit::new(0.5, 2.);
        assert_eq!(init.init("a", &[3, 2]), Tensor::Scalar(0.5));
        let b = init.init("b", &[3, 2]);
        let b = b.as_array().unwrap();
        assert_eq!(b.shape(), &[3, 2]);
        assert!(b.iter().all(|value| *value == 2.));
    }
}

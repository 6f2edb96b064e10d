use std::fmt::Display;

use ndarray::{ArrayD, IxDyn};

use crate::errors::InferenceError;

use super::payload::Payload;

/// Natural parameters of an isotropic Gaussian belief: scalar precision `a` and
/// linear coefficient `b`, so that the mean is `b / a` and the variance `1 / a`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMessage {
    pub a: f64,
    pub b: ArrayD<f64>,
}

impl GaussianMessage {
    pub fn new(a: f64, b: ArrayD<f64>) -> Self {
        GaussianMessage { a, b }
    }

    // Creates the uninformative message (a = 0, b = 0) for a variable of a given shape
    pub fn zero(shape: &[usize]) -> Self {
        GaussianMessage {
            a: 0.,
            b: ArrayD::zeros(IxDyn(shape)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.b.shape()
    }

    // Multiplies two Gaussian beliefs, i.e. adds their natural parameters
    pub fn add_assign(&mut self, other: &GaussianMessage) {
        self.a += other.a;
        self.b += &other.b;
    }

    // Reads the `a` and `b` keys of a payload
    pub fn from_payload(payload: &Payload) -> Result<Self, InferenceError> {
        Ok(GaussianMessage {
            a: payload.scalar("a")?,
            b: payload.array("b")?.clone(),
        })
    }

    pub fn into_payload(self) -> Payload {
        Payload::new().with("a", self.a).with("b", self.b)
    }
}

impl Display for GaussianMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a={} b={}", self.a, self.b)
    }
}

use std::fmt::Display;

use ndarray::{ArrayD, IxDyn};

use crate::{errors::ChannelError, message::gaussian_message::GaussianMessage};

use super::channel_trait::{check_arity, check_shape, Factor};

// Prior x ~ N(mean, var) independently on every entry of a tensor of given shape
pub struct GaussianPrior {
    shape: Vec<usize>,
    mean: f64,
    var: f64,
}

impl GaussianPrior {
    pub fn new(shape: &[usize], mean: f64, var: f64) -> Self {
        GaussianPrior {
            shape: shape.to_vec(),
            mean,
            var,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    // Natural parameters of the prior itself
    pub fn message(&self) -> GaussianMessage {
        GaussianMessage::new(
            1. / self.var,
            ArrayD::from_elem(IxDyn(&self.shape), self.mean / self.var),
        )
    }
}

impl Factor for GaussianPrior {
    fn n_prev(&self) -> usize {
        0
    }

    fn n_next(&self) -> usize {
        1
    }

    fn check_shapes(&self, prev: &[&[usize]], next: &[&[usize]]) -> Result<(), ChannelError> {
        check_arity(0, prev.len())?;
        check_arity(1, next.len())?;
        check_shape(&self.shape, next[0])
    }

    fn second_moments(&self, tau_z: &[f64]) -> Result<Vec<f64>, ChannelError> {
        check_arity(0, tau_z.len())?;
        Ok(vec![self.mean * self.mean + self.var])
    }

    // The prior message does not depend on what x receives from downstream
    fn forward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        check_arity(0, z.len())?;
        check_arity(1, x.len())?;
        check_shape(&self.shape, x[0].shape())?;
        Ok(vec![self.message()])
    }

    fn backward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        check_arity(0, z.len())?;
        check_arity(1, x.len())?;
        Ok(Vec::new())
    }

    fn forward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        _tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(0, az.len())?;
        check_arity(1, ax.len())?;
        Ok(vec![1. / self.var])
    }

    fn backward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        _tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(0, az.len())?;
        check_arity(1, ax.len())?;
        Ok(Vec::new())
    }
}

impl Display for GaussianPrior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GaussianPrior(shape={:?}, mean={}, var={})",
            self.shape, self.mean, self.var
        )
    }
}

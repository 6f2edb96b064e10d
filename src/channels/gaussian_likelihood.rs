use std::fmt::Display;

use ndarray::ArrayD;

use crate::{errors::ChannelError, message::gaussian_message::GaussianMessage};

use super::channel_trait::{check_arity, check_shape, Factor};

// Observation y = z + noise with noise ~ N(0, var)
pub struct GaussianLikelihood {
    y: ArrayD<f64>,
    var: f64,
}

impl GaussianLikelihood {
    pub fn new(y: ArrayD<f64>, var: f64) -> Self {
        GaussianLikelihood { y, var }
    }

    pub fn y(&self) -> &ArrayD<f64> {
        &self.y
    }

    pub fn message(&self) -> GaussianMessage {
        GaussianMessage::new(1. / self.var, &self.y / self.var)
    }
}

impl Factor for GaussianLikelihood {
    fn n_prev(&self) -> usize {
        1
    }

    fn n_next(&self) -> usize {
        0
    }

    fn check_shapes(&self, prev: &[&[usize]], next: &[&[usize]]) -> Result<(), ChannelError> {
        check_arity(1, prev.len())?;
        check_arity(0, next.len())?;
        check_shape(self.y.shape(), prev[0])
    }

    fn second_moments(&self, tau_z: &[f64]) -> Result<Vec<f64>, ChannelError> {
        check_arity(1, tau_z.len())?;
        Ok(Vec::new())
    }

    fn forward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        check_arity(1, z.len())?;
        check_arity(0, x.len())?;
        Ok(Vec::new())
    }

    fn backward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        check_arity(1, z.len())?;
        check_arity(0, x.len())?;
        check_shape(self.y.shape(), z[0].shape())?;
        Ok(vec![self.message()])
    }

    fn forward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        _tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(1, az.len())?;
        check_arity(0, ax.len())?;
        Ok(Vec::new())
    }

    fn backward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        _tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(1, az.len())?;
        check_arity(0, ax.len())?;
        Ok(vec![1. / self.var])
    }
}

impl Display for GaussianLikelihood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GaussianLikelihood(shape={:?}, var={})", self.y.shape(), self.var)
    }
}

use std::fmt::Display;

use ndarray::{ArrayD, IxDyn};

use crate::{errors::ChannelError, message::gaussian_message::GaussianMessage};

use super::channel_trait::{check_arity, check_shape, Channel, Factor};

// Reinterprets a tensor in row-major order with a new shape of the same size
fn reshape(array: &ArrayD<f64>, shape: &[usize]) -> Result<ArrayD<f64>, ChannelError> {
    let mismatch = || ChannelError::ShapeMismatch {
        expected: shape.to_vec(),
        found: array.shape().to_vec(),
    };
    if array.len() != shape.iter().product::<usize>() {
        return Err(mismatch());
    }
    ArrayD::from_shape_vec(IxDyn(shape), array.iter().copied().collect()).map_err(|_| mismatch())
}

// Channel x = reshape(z); precisions pass through unchanged
pub struct ReshapeChannel {
    prev_shape: Vec<usize>,
    next_shape: Vec<usize>,
}

impl ReshapeChannel {
    pub fn new(prev_shape: &[usize], next_shape: &[usize]) -> Result<Self, ChannelError> {
        let prev_size: usize = prev_shape.iter().product();
        let next_size: usize = next_shape.iter().product();
        if prev_size != next_size {
            return Err(ChannelError::ShapeMismatch {
                expected: next_shape.to_vec(),
                found: prev_shape.to_vec(),
            });
        }
        Ok(ReshapeChannel {
            prev_shape: prev_shape.to_vec(),
            next_shape: next_shape.to_vec(),
        })
    }

    pub fn prev_shape(&self) -> &[usize] {
        &self.prev_shape
    }

    pub fn next_shape(&self) -> &[usize] {
        &self.next_shape
    }
}

impl Channel for ReshapeChannel {
    fn forward_posterior(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<(ArrayD<f64>, f64), ChannelError> {
        check_shape(&self.next_shape, bx.shape())?;
        let a = az + ax;
        if a == 0. {
            return Ok((ArrayD::zeros(IxDyn(&self.next_shape)), f64::INFINITY));
        }
        let b = reshape(bz, &self.next_shape)? + bx;
        Ok((b / a, 1. / a))
    }

    fn backward_posterior(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<(ArrayD<f64>, f64), ChannelError> {
        check_shape(&self.prev_shape, bz.shape())?;
        let a = az + ax;
        if a == 0. {
            return Ok((ArrayD::zeros(IxDyn(&self.prev_shape)), f64::INFINITY));
        }
        let b = reshape(bx, &self.prev_shape)? + bz;
        Ok((b / a, 1. / a))
    }

    fn forward_error(&self, az: f64, ax: f64, _tau_z: f64) -> f64 {
        1. / (az + ax)
    }

    fn backward_error(&self, az: f64, ax: f64, _tau_z: f64) -> f64 {
        1. / (az + ax)
    }
}

impl Factor for ReshapeChannel {
    fn n_prev(&self) -> usize {
        1
    }

    fn n_next(&self) -> usize {
        1
    }

    fn check_shapes(&self, prev: &[&[usize]], next: &[&[usize]]) -> Result<(), ChannelError> {
        check_arity(1, prev.len())?;
        check_arity(1, next.len())?;
        check_shape(&self.prev_shape, prev[0])?;
        check_shape(&self.next_shape, next[0])
    }

    fn second_moments(&self, tau_z: &[f64]) -> Result<Vec<f64>, ChannelError> {
        check_arity(1, tau_z.len())?;
        Ok(vec![tau_z[0]])
    }

    fn forward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        check_arity(1, z.len())?;
        check_arity(1, x.len())?;
        let bx_new = reshape(&z[0].b, &self.next_shape)?;
        Ok(vec![GaussianMessage::new(z[0].a, bx_new)])
    }

    fn backward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        check_arity(1, z.len())?;
        check_arity(1, x.len())?;
        let bz_new = reshape(&x[0].b, &self.prev_shape)?;
        Ok(vec![GaussianMessage::new(x[0].a, bz_new)])
    }

    fn forward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        _tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(1, az.len())?;
        check_arity(1, ax.len())?;
        Ok(vec![az[0]])
    }

    fn backward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        _tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(1, az.len())?;
        check_arity(1, ax.len())?;
        Ok(vec![ax[0]])
    }
}

impl Display for ReshapeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reshape({:?} -> {:?})", self.prev_shape, self.next_shape)
    }
}

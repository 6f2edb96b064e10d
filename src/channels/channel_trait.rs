use std::fmt::Display;

use ndarray::ArrayD;

use crate::{errors::ChannelError, message::gaussian_message::GaussianMessage};

/// Message contract shared by every node type of the factor graph (priors,
/// channels, likelihoods, multi-input factors).
///
/// `z` holds one incoming message per input variable (`n_prev` of them) and `x`
/// one incoming message per output variable (`n_next`). Forward messages go to
/// the outputs, backward messages to the inputs, in the same order.
pub trait Factor: Display {
    fn n_prev(&self) -> usize;
    fn n_next(&self) -> usize;

    // Checks the shapes of the connected input and output variables
    fn check_shapes(&self, prev: &[&[usize]], next: &[&[usize]]) -> Result<(), ChannelError> {
        check_arity(self.n_prev(), prev.len())?;
        check_arity(self.n_next(), next.len())
    }

    // Second moment of each output given the second moments of the inputs
    fn second_moments(&self, tau_z: &[f64]) -> Result<Vec<f64>, ChannelError>;

    fn forward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError>;

    fn backward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError>;

    // Precision-only counterparts of the messages, used to predict asymptotic performance
    fn forward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError>;

    fn backward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError>;
}

/// Posterior contract of a single-input single-output channel `x = f(z)`.
///
/// `(az, bz)` is the message reaching `z` from the prior side, `(ax, bx)` the
/// message reaching `x` from the likelihood side. Zero precisions are valid inputs.
pub trait Channel {
    // Posterior mean and variance of the output x
    fn forward_posterior(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<(ArrayD<f64>, f64), ChannelError>;

    // Posterior mean and variance of the input z
    fn backward_posterior(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<(ArrayD<f64>, f64), ChannelError>;

    // Expected posterior variance of x, independent of the data realization
    fn forward_error(&self, az: f64, ax: f64, tau_z: f64) -> f64;

    // Expected posterior variance of z, independent of the data realization
    fn backward_error(&self, az: f64, ax: f64, tau_z: f64) -> f64;
}

pub fn check_arity(expected: usize, found: usize) -> Result<(), ChannelError> {
    if expected != found {
        return Err(ChannelError::ArityMismatch { expected, found });
    }
    Ok(())
}

pub fn check_shape(expected: &[usize], found: &[usize]) -> Result<(), ChannelError> {
    if expected != found {
        return Err(ChannelError::ShapeMismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

pub fn check_not_empty(shape: &[usize]) -> Result<(), ChannelError> {
    if shape.is_empty() || shape.contains(&0) {
        return Err(ChannelError::EmptyShape(shape.to_vec()));
    }
    Ok(())
}

// Divides the posterior (r, v) by the incoming message (a, b), giving the outgoing EP message.
// An unbounded posterior variance carries no information and gives the uninformative message.
pub fn message_from_posterior(r: ArrayD<f64>, v: f64, incoming: &GaussianMessage) -> GaussianMessage {
    if v.is_infinite() {
        return GaussianMessage::zero(incoming.shape());
    }
    GaussianMessage {
        a: 1. / v - incoming.a,
        b: r / v - &incoming.b,
    }
}

// Forward message of a single-input channel, derived from its forward posterior
pub fn forward_message_from_posterior<C: Channel + Factor>(
    channel: &C,
    z: &[GaussianMessage],
    x: &[GaussianMessage],
) -> Result<Vec<GaussianMessage>, ChannelError> {
    check_arity(channel.n_prev(), z.len())?;
    check_arity(channel.n_next(), x.len())?;
    let (rx, vx) = channel.forward_posterior(z[0].a, &z[0].b, x[0].a, &x[0].b)?;
    Ok(vec![message_from_posterior(rx, vx, &x[0])])
}

// Backward message of a single-input channel, derived from its backward posterior
pub fn backward_message_from_posterior<C: Channel + Factor>(
    channel: &C,
    z: &[GaussianMessage],
    x: &[GaussianMessage],
) -> Result<Vec<GaussianMessage>, ChannelError> {
    check_arity(channel.n_prev(), z.len())?;
    check_arity(channel.n_next(), x.len())?;
    let (rz, vz) = channel.backward_posterior(z[0].a, &z[0].b, x[0].a, &x[0].b)?;
    Ok(vec![message_from_posterior(rz, vz, &z[0])])
}

pub fn forward_state_evolution_from_error<C: Channel + Factor>(
    channel: &C,
    az: &[f64],
    ax: &[f64],
    tau_z: &[f64],
) -> Result<Vec<f64>, ChannelError> {
    check_arity(channel.n_prev(), az.len())?;
    check_arity(channel.n_next(), ax.len())?;
    check_arity(channel.n_prev(), tau_z.len())?;
    let vx = channel.forward_error(az[0], ax[0], tau_z[0]);
    Ok(vec![1. / vx - ax[0]])
}

pub fn backward_state_evolution_from_error<C: Channel + Factor>(
    channel: &C,
    az: &[f64],
    ax: &[f64],
    tau_z: &[f64],
) -> Result<Vec<f64>, ChannelError> {
    check_arity(channel.n_prev(), az.len())?;
    check_arity(channel.n_next(), ax.len())?;
    check_arity(channel.n_prev(), tau_z.len())?;
    let vz = channel.backward_error(az[0], ax[0], tau_z[0]);
    Ok(vec![1. / vz - az[0]])
}

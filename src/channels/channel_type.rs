use std::fmt::Display;

use crate::{errors::ChannelError, message::gaussian_message::GaussianMessage};

use super::{
    channel_trait::Factor, convolution_channel::ConvolutionChannel,
    gaussian_likelihood::GaussianLikelihood, gaussian_prior::GaussianPrior,
    reshape_channel::ReshapeChannel, sum_channel::SumChannel,
};

// Every kind of factor that can appear in a model
pub enum ChannelType {
    Prior(GaussianPrior),
    Likelihood(GaussianLikelihood),
    Convolution(ConvolutionChannel),
    Sum(SumChannel),
    Reshape(ReshapeChannel),
}

macro_rules! match_channel_action {
    ($channel_type:ident, $channel_match:ident, $action:expr) => {
        match $channel_type {
            ChannelType::Prior($channel_match) => $action,
            ChannelType::Likelihood($channel_match) => $action,
            ChannelType::Convolution($channel_match) => $action,
            ChannelType::Sum($channel_match) => $action,
            ChannelType::Reshape($channel_match) => $action,
        }
    };
}

impl Factor for ChannelType {
    fn n_prev(&self) -> usize {
        match_channel_action!(self, channel, channel.n_prev())
    }

    fn n_next(&self) -> usize {
        match_channel_action!(self, channel, channel.n_next())
    }

    fn check_shapes(&self, prev: &[&[usize]], next: &[&[usize]]) -> Result<(), ChannelError> {
        match_channel_action!(self, channel, channel.check_shapes(prev, next))
    }

    fn second_moments(&self, tau_z: &[f64]) -> Result<Vec<f64>, ChannelError> {
        match_channel_action!(self, channel, channel.second_moments(tau_z))
    }

    fn forward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        match_channel_action!(self, channel, channel.forward_messages(z, x))
    }

    fn backward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        match_channel_action!(self, channel, channel.backward_messages(z, x))
    }

    fn forward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        match_channel_action!(self, channel, channel.forward_state_evolution(az, ax, tau_z))
    }

    fn backward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        match_channel_action!(self, channel, channel.backward_state_evolution(az, ax, tau_z))
    }
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match_channel_action!(self, channel, channel.fmt(f))
    }
}

impl From<GaussianPrior> for ChannelType {
    fn from(value: GaussianPrior) -> Self {
        ChannelType::Prior(value)
    }
}

impl From<GaussianLikelihood> for ChannelType {
    fn from(value: GaussianLikelihood) -> Self {
        ChannelType::Likelihood(value)
    }
}

impl From<ConvolutionChannel> for ChannelType {
    fn from(value: ConvolutionChannel) -> Self {
        ChannelType::Convolution(value)
    }
}

impl From<SumChannel> for ChannelType {
    fn from(value: SumChannel) -> Self {
        ChannelType::Sum(value)
    }
}

impl From<ReshapeChannel> for ChannelType {
    fn from(value: ReshapeChannel) -> Self {
        ChannelType::Reshape(value)
    }
}

use std::fmt::Display;

use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex64;

use crate::{
    data_structures::fft::{fft_axes, fftn, ifftn, real_part, to_complex},
    errors::ChannelError,
    message::gaussian_message::GaussianMessage,
};

use super::channel_trait::{
    backward_message_from_posterior, backward_state_evolution_from_error, check_arity,
    check_not_empty, check_shape, forward_message_from_posterior,
    forward_state_evolution_from_error, Channel, Factor,
};

// Builds periodic forward-difference filters of shape (d, *shape), one per axis:
// the response along axis i is x_i[n] = z[n + e_i] - z[n]
pub fn gradient_filters(shape: &[usize]) -> ArrayD<f64> {
    let d = shape.len();
    let mut filter_shape = vec![d];
    filter_shape.extend_from_slice(shape);
    let mut filters = ArrayD::zeros(IxDyn(&filter_shape));

    for direction in 0..d {
        let mut origin = vec![0; d + 1];
        origin[0] = direction;
        filters[IxDyn(&origin)] -= 1.;

        let mut neighbour = origin.clone();
        neighbour[direction + 1] = 1 % shape[direction];
        filters[IxDyn(&neighbour)] += 1.;
    }
    filters
}

/// Channel `x = W z` where `W` is a fixed periodic convolution with `d` filters.
///
/// `z` has shape `shape`, `x` has shape `(d, *shape)`. All solves are done in the
/// Fourier domain, where `W` is diagonal: the transforms of `z`-side tensors run over
/// every axis, the transforms of `x`-side tensors over every axis but the first
/// (the filter axis), so that the `d` responses share a single resolvent.
pub struct ConvolutionChannel {
    shape: Vec<usize>,
    d: usize,
    axes: Vec<usize>,            // axes of x over which the transforms are taken
    w_fft_bar: ArrayD<Complex64>, // transform of the filters, shape (d, *shape)
    w_fft: ArrayD<Complex64>,     // convolution weights are the time reversed filters
    spectrum: ArrayD<f64>,        // sum over filters of |w_fft|^2, shape `shape`
}

impl ConvolutionChannel {
    // Precomputes the frequency-domain representation of the filters
    pub fn new(shape: &[usize], filter: ArrayD<f64>) -> Result<Self, ChannelError> {
        // at least one filter and one entry per axis
        check_not_empty(shape)?;
        check_not_empty(filter.shape())?;
        let d = filter.shape()[0];
        let mut expected = vec![d];
        expected.extend_from_slice(shape);
        check_shape(&expected, filter.shape())?;

        let axes: Vec<usize> = (1..=shape.len()).collect();
        let w_fft_bar = fft_axes(&to_complex(&filter), &axes, false);
        let w_fft = w_fft_bar.mapv(|w| w.conj());
        let spectrum = w_fft.mapv(|w| w.norm_sqr()).sum_axis(Axis(0));
        check_shape(shape, spectrum.shape())?;

        Ok(ConvolutionChannel {
            shape: shape.to_vec(),
            d,
            axes,
            w_fft_bar,
            w_fft,
            spectrum,
        })
    }

    // Creates the (periodic) gradient channel x = grad z
    pub fn gradient(shape: &[usize]) -> Result<Self, ChannelError> {
        check_not_empty(shape)?;
        ConvolutionChannel::new(shape, gradient_filters(shape))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    // Shape of the output x = (d, *shape)
    pub fn output_shape(&self) -> Vec<usize> {
        let mut output_shape = vec![self.d];
        output_shape.extend_from_slice(&self.shape);
        output_shape
    }

    pub fn d(&self) -> usize {
        self.d
    }

    pub fn spectrum(&self) -> &ArrayD<f64> {
        &self.spectrum
    }

    // Applies W to z
    pub fn convolve(&self, z: &ArrayD<f64>) -> Result<ArrayD<f64>, ChannelError> {
        check_shape(&self.shape, z.shape())?;
        let z_fft = fftn(&to_complex(z)).insert_axis(Axis(0));
        let x_fft = &self.w_fft * &z_fft;
        Ok(real_part(&fft_axes(&x_fft, &self.axes, true)))
    }

    fn mean_of(&self, values: ArrayD<f64>) -> f64 {
        values.mean().unwrap_or(0.)
    }

    /// Effective number of parameters: the fraction of the spectrum resolved by
    /// the observation, `mean(S / (az/ax + S))`, in `[0, 1]`.
    pub fn n_eff(&self, az: f64, ax: f64) -> f64 {
        if ax == 0. {
            return 0.;
        }
        let ratio = az / ax;
        if ratio == 0. {
            return 1.;
        }
        self.mean_of(self.spectrum.mapv(|s| s / (ratio + s)))
    }

    pub fn backward_variance(&self, az: f64, ax: f64) -> f64 {
        if az == 0. {
            // no prior information, the variance comes from the data alone
            return self.mean_of(self.spectrum.mapv(|s| 1. / s)) / ax;
        }
        (1. - self.n_eff(az, ax)) / az
    }

    pub fn forward_variance(&self, az: f64, ax: f64) -> f64 {
        if ax == 0. {
            return self.mean_of(self.spectrum.clone()) / az;
        }
        self.n_eff(az, ax) / (ax * self.d as f64)
    }

    // Solves (az + ax W^T W) rz = bz + W^T bx in the frequency domain and returns the transform of rz.
    // Frequencies with a vanishing resolvent denominator (both precisions zero there) are set to zero.
    fn backward_mean_fft(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<ArrayD<Complex64>, ChannelError> {
        check_shape(&self.shape, bz.shape())?;
        check_shape(&self.output_shape(), bx.shape())?;

        let bx_fft = fft_axes(&to_complex(bx), &self.axes, false);
        let bz_fft = fftn(&to_complex(bz));
        let resolvent = self.spectrum.mapv(|s| {
            let denominator = az + ax * s;
            match denominator == 0. {
                true => Complex64::new(0., 0.),
                false => Complex64::new(1. / denominator, 0.),
            }
        });
        let wt_bx_fft = (&self.w_fft_bar * &bx_fft).sum_axis(Axis(0));
        Ok(resolvent * (bz_fft + wt_bx_fft))
    }

    pub fn backward_mean(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>, ChannelError> {
        let rz_fft = self.backward_mean_fft(az, bz, ax, bx)?;
        Ok(real_part(&ifftn(&rz_fft)))
    }

    // rx = W rz
    pub fn forward_mean(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>, ChannelError> {
        let rz_fft = self.backward_mean_fft(az, bz, ax, bx)?.insert_axis(Axis(0));
        let rx_fft = &self.w_fft * &rz_fft;
        Ok(real_part(&fft_axes(&rx_fft, &self.axes, true)))
    }
}

impl Channel for ConvolutionChannel {
    fn forward_posterior(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<(ArrayD<f64>, f64), ChannelError> {
        let rx = self.forward_mean(az, bz, ax, bx)?;
        Ok((rx, self.forward_variance(az, ax)))
    }

    fn backward_posterior(
        &self,
        az: f64,
        bz: &ArrayD<f64>,
        ax: f64,
        bx: &ArrayD<f64>,
    ) -> Result<(ArrayD<f64>, f64), ChannelError> {
        let rz = self.backward_mean(az, bz, ax, bx)?;
        Ok((rz, self.backward_variance(az, ax)))
    }

    fn forward_error(&self, az: f64, ax: f64, _tau_z: f64) -> f64 {
        self.forward_variance(az, ax)
    }

    fn backward_error(&self, az: f64, ax: f64, _tau_z: f64) -> f64 {
        self.backward_variance(az, ax)
    }
}

impl Factor for ConvolutionChannel {
    fn n_prev(&self) -> usize {
        1
    }

    fn n_next(&self) -> usize {
        1
    }

    fn check_shapes(&self, prev: &[&[usize]], next: &[&[usize]]) -> Result<(), ChannelError> {
        check_arity(1, prev.len())?;
        check_arity(1, next.len())?;
        check_shape(&self.shape, prev[0])?;
        check_shape(&self.output_shape(), next[0])
    }

    fn second_moments(&self, tau_z: &[f64]) -> Result<Vec<f64>, ChannelError> {
        check_arity(1, tau_z.len())?;
        let s_mean = self.mean_of(self.spectrum.clone());
        Ok(vec![tau_z[0] * s_mean / self.d as f64])
    }

    fn forward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        forward_message_from_posterior(self, z, x)
    }

    fn backward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        backward_message_from_posterior(self, z, x)
    }

    fn forward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        forward_state_evolution_from_error(self, az, ax, tau_z)
    }

    fn backward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        backward_state_evolution_from_error(self, az, ax, tau_z)
    }
}

impl Display for ConvolutionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Convolution(d={}, shape={:?})", self.d, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{DMatrix, DVector};
    use ndarray::{arr1, Array};

    use super::super::channel_trait::message_from_posterior;
    use super::*;

    fn test_tensor(shape: &[usize], seed: f64) -> ArrayD<f64> {
        let mut counter = 0.;
        Array::from_shape_simple_fn(IxDyn(shape), || {
            counter += 1.;
            (seed * counter).sin() + 0.1 * counter.cos()
        })
    }

    // Dense matrix of W, built column by column from the channel's own convolution
    fn dense_operator(channel: &ConvolutionChannel) -> DMatrix<f64> {
        let n: usize = channel.shape().iter().product();
        let m = n * channel.d();
        let columns: Vec<Vec<f64>> = (0..n)
            .map(|j| {
                let mut unit = ArrayD::zeros(IxDyn(channel.shape()));
                unit.as_slice_mut().unwrap()[j] = 1.;
                channel.convolve(&unit).unwrap().iter().copied().collect()
            })
            .collect();
        DMatrix::from_fn(m, n, |i, j| columns[j][i])
    }

    #[test]
    fn gradient_is_periodic_forward_difference() {
        let channel = ConvolutionChannel::gradient(&[4]).unwrap();
        let z = arr1(&[0., 1., 3., 6.]).into_dyn();
        let x = channel.convolve(&z).unwrap();
        let expected = [1., 2., 3., -6.];
        assert_eq!(x.shape(), &[1, 4]);
        for (found, expected) in x.iter().zip(expected.iter()) {
            assert!((found - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn n_eff_is_a_fraction() {
        let channel = ConvolutionChannel::gradient(&[5, 6]).unwrap();
        for az in [1e-3, 0.1, 1., 7.5, 1e3] {
            for ax in [1e-3, 0.2, 1., 4., 1e3] {
                let n_eff = channel.n_eff(az, ax);
                assert!((0. ..=1.).contains(&n_eff), "n_eff={} az={} ax={}", n_eff, az, ax);
            }
        }
    }

    #[test]
    fn n_eff_boundaries() {
        let channel = ConvolutionChannel::gradient(&[5, 6]).unwrap();
        assert_eq!(channel.n_eff(2., 0.), 0.);
        assert_eq!(channel.n_eff(0., 3.), 1.);
    }

    #[test]
    fn flat_filter_reduces_to_identity_channel() {
        let shape = [3, 4];
        let mut filter = ArrayD::zeros(IxDyn(&[1, 3, 4]));
        filter[[0, 0, 0]] = 1.;
        let channel = ConvolutionChannel::new(&shape, filter).unwrap();

        let (az, ax) = (0.8, 2.5);
        let bz = test_tensor(&shape, 0.3);
        let bx = test_tensor(&[1, 3, 4], 0.7);

        let (rz, vz) = channel.backward_posterior(az, &bz, ax, &bx).unwrap();
        let (rx, vx) = channel.forward_posterior(az, &bz, ax, &bx).unwrap();
        assert!((vz - 1. / (az + ax)).abs() < 1e-12);
        assert!((vx - 1. / (az + ax)).abs() < 1e-12);

        let expected = (&bz + &bx.index_axis(Axis(0), 0)) / (az + ax);
        for ((found_z, found_x), expected) in rz.iter().zip(rx.iter()).zip(expected.iter()) {
            assert!((found_z - expected).abs() < 1e-12);
            assert!((found_x - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn posterior_matches_dense_solve() {
        let shape = [3, 4];
        let channel = ConvolutionChannel::gradient(&shape).unwrap();
        let w = dense_operator(&channel);
        let (n, m) = (w.ncols(), w.nrows());

        let (az, ax) = (0.7, 1.3);
        let bz = test_tensor(&shape, 0.5);
        let bx = test_tensor(&channel.output_shape(), 1.1);

        let precision = DMatrix::identity(n, n) * az + w.transpose() * &w * ax;
        let sigma = precision.try_inverse().unwrap();
        let bz_vec = DVector::from_iterator(n, bz.iter().copied());
        let bx_vec = DVector::from_iterator(m, bx.iter().copied());
        let rz_ref = &sigma * (bz_vec + w.transpose() * bx_vec);
        let rx_ref = &w * &rz_ref;
        let vz_ref = sigma.trace() / n as f64;
        let vx_ref = (&w * &sigma * w.transpose()).trace() / m as f64;

        let (rz, vz) = channel.backward_posterior(az, &bz, ax, &bx).unwrap();
        let (rx, vx) = channel.forward_posterior(az, &bz, ax, &bx).unwrap();

        assert!((vz - vz_ref).abs() < 1e-10);
        assert!((vx - vx_ref).abs() < 1e-10);
        for (found, expected) in rz.iter().zip(rz_ref.iter()) {
            assert!((found - expected).abs() < 1e-10);
        }
        for (found, expected) in rx.iter().zip(rx_ref.iter()) {
            assert!((found - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn zero_precisions_are_branched() {
        let shape = [4, 4];
        let channel = ConvolutionChannel::gradient(&shape).unwrap();
        let bz = test_tensor(&shape, 0.2);
        let bx = test_tensor(&channel.output_shape(), 0.9);

        // the gradient does not see the mean of z, so without prior its variance is unbounded
        let (rz, vz) = channel.backward_posterior(0., &bz, 1.5, &bx).unwrap();
        assert!(rz.iter().all(|value| value.is_finite()));
        assert_eq!(vz, f64::INFINITY);
        let message = message_from_posterior(rz, vz, &GaussianMessage::new(0., bz.clone()));
        assert_eq!(message.a, 0.);

        let (rx, vx) = channel.forward_posterior(2., &bz, 0., &bx).unwrap();
        assert!(rx.iter().all(|value| value.is_finite()));
        assert!((vx - channel.spectrum().mean().unwrap() / 2.).abs() < 1e-12);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let filter = ArrayD::zeros(IxDyn(&[2, 3, 3]));
        assert!(matches!(
            ConvolutionChannel::new(&[3, 4], filter),
            Err(ChannelError::ShapeMismatch { .. })
        ));

        let channel = ConvolutionChannel::gradient(&[3, 4]).unwrap();
        let bz = ArrayD::zeros(IxDyn(&[4, 3]));
        let bx = ArrayD::zeros(IxDyn(&[2, 3, 4]));
        assert!(channel.backward_posterior(1., &bz, 1., &bx).is_err());
        assert!(channel.second_moments(&[1., 2.]).is_err());
    }

    #[test]
    fn rejects_empty_shapes() {
        assert_eq!(
            ConvolutionChannel::gradient(&[]).err(),
            Some(ChannelError::EmptyShape(vec![]))
        );
        assert_eq!(
            ConvolutionChannel::gradient(&[3, 0]).err(),
            Some(ChannelError::EmptyShape(vec![3, 0]))
        );
        let no_filters = ArrayD::zeros(IxDyn(&[0, 4]));
        assert_eq!(
            ConvolutionChannel::new(&[4], no_filters).err(),
            Some(ChannelError::EmptyShape(vec![0, 4]))
        );
    }
}

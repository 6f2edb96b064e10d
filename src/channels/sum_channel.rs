use std::fmt::Display;

use ndarray::{ArrayD, IxDyn};

use crate::{errors::ChannelError, message::gaussian_message::GaussianMessage};

use super::channel_trait::{check_arity, check_shape, Factor};

// Factor x = z_1 + ... + z_K
pub struct SumChannel {
    n_prev: usize,
}

impl SumChannel {
    pub fn new(n_prev: usize) -> Self {
        SumChannel { n_prev }
    }

    fn check_messages(&self, z: &[GaussianMessage], x: &[GaussianMessage]) -> Result<(), ChannelError> {
        check_arity(self.n_prev, z.len())?;
        check_arity(1, x.len())?;
        for message in z {
            check_shape(x[0].shape(), message.shape())?;
        }
        Ok(())
    }
}

// Sum of variances and of means of the given messages, skipping the one at `excluded`.
// Returns None if one of them carries no information (zero precision).
fn sum_mean_variance(
    messages: &[GaussianMessage],
    excluded: Option<usize>,
    shape: &[usize],
) -> Option<(ArrayD<f64>, f64)> {
    let mut v_bar = 0.;
    let mut r_bar = ArrayD::zeros(IxDyn(shape));
    for (k, message) in messages.iter().enumerate() {
        if Some(k) == excluded {
            continue;
        }
        if message.a == 0. {
            return None;
        }
        v_bar += 1. / message.a;
        r_bar = r_bar + &message.b / message.a;
    }
    Some((r_bar, v_bar))
}

impl Factor for SumChannel {
    fn n_prev(&self) -> usize {
        self.n_prev
    }

    fn n_next(&self) -> usize {
        1
    }

    fn check_shapes(&self, prev: &[&[usize]], next: &[&[usize]]) -> Result<(), ChannelError> {
        check_arity(self.n_prev, prev.len())?;
        check_arity(1, next.len())?;
        for shape in prev {
            check_shape(next[0], shape)?;
        }
        Ok(())
    }

    fn second_moments(&self, tau_z: &[f64]) -> Result<Vec<f64>, ChannelError> {
        check_arity(self.n_prev, tau_z.len())?;
        Ok(vec![tau_z.iter().sum()])
    }

    // Message to x: mean and variance of the sum of the independent inputs
    fn forward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        self.check_messages(z, x)?;
        let message = match sum_mean_variance(z, None, x[0].shape()) {
            Some((r_bar, v_bar)) => GaussianMessage::new(1. / v_bar, r_bar / v_bar),
            None => GaussianMessage::zero(x[0].shape()),
        };
        Ok(vec![message])
    }

    // Message to each z_k: the belief on x with the contributions of the other inputs removed,
    // i.e. z_k = x - sum_{j != k} z_j
    fn backward_messages(
        &self,
        z: &[GaussianMessage],
        x: &[GaussianMessage],
    ) -> Result<Vec<GaussianMessage>, ChannelError> {
        self.check_messages(z, x)?;
        let x_message = &x[0];
        let messages = (0..z.len())
            .map(|k| {
                if x_message.a == 0. {
                    return GaussianMessage::zero(x_message.shape());
                }
                match sum_mean_variance(z, Some(k), x_message.shape()) {
                    Some((r_others, v_others)) => {
                        let vk = 1. / x_message.a + v_others;
                        let rk = &x_message.b / x_message.a - r_others;
                        GaussianMessage::new(1. / vk, rk / vk)
                    }
                    None => GaussianMessage::zero(x_message.shape()),
                }
            })
            .collect();
        Ok(messages)
    }

    fn forward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(self.n_prev, az.len())?;
        check_arity(1, ax.len())?;
        check_arity(self.n_prev, tau_z.len())?;
        if az.iter().any(|a| *a == 0.) {
            return Ok(vec![0.]);
        }
        let v_bar: f64 = az.iter().map(|a| 1. / a).sum();
        Ok(vec![1. / v_bar])
    }

    fn backward_state_evolution(
        &self,
        az: &[f64],
        ax: &[f64],
        tau_z: &[f64],
    ) -> Result<Vec<f64>, ChannelError> {
        check_arity(self.n_prev, az.len())?;
        check_arity(1, ax.len())?;
        check_arity(self.n_prev, tau_z.len())?;
        let precisions = (0..az.len())
            .map(|k| {
                let others = az
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != k)
                    .map(|(_, a)| *a);
                if ax[0] == 0. || others.clone().any(|a| a == 0.) {
                    return 0.;
                }
                let vk = 1. / ax[0] + others.map(|a| 1. / a).sum::<f64>();
                1. / vk
            })
            .collect();
        Ok(precisions)
    }
}

impl Display for SumChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sum(n_prev={})", self.n_prev)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    fn message(a: f64, b: &[f64]) -> GaussianMessage {
        GaussianMessage::new(a, arr1(b).into_dyn())
    }

    fn assert_close(found: &GaussianMessage, expected: &GaussianMessage) {
        assert!((found.a - expected.a).abs() < 1e-12, "{} != {}", found, expected);
        for (found, expected) in found.b.iter().zip(expected.b.iter()) {
            assert!((found - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn forward_adds_means_and_variances() {
        let sum = SumChannel::new(2);
        let z = [message(2., &[1., 4.]), message(4., &[2., -2.])];
        let x = [GaussianMessage::zero(&[2])];
        let forward = sum.forward_messages(&z, &x).unwrap();

        // v = 1/2 + 1/4, r = [1/2 + 1/2, 2 - 1/2]
        let v = 0.75;
        assert_close(&forward[0], &message(1. / v, &[1. / v, 1.5 / v]));
    }

    #[test]
    fn dividing_out_the_other_input_recovers_each_input() {
        let sum = SumChannel::new(2);
        let (z1, z2) = (message(1.5, &[0.3, -1.2]), message(0.6, &[2.1, 0.4]));
        let forward = sum.forward_messages(&[z1.clone(), z2.clone()], &[GaussianMessage::zero(&[2])]);
        let forward = forward.unwrap().remove(0);

        // removing a Gaussian factor is multiplying by its inverse, i.e. negated natural parameters
        let removed_z2 = GaussianMessage::new(-z2.a, -&z2.b);
        let backward = sum
            .backward_messages(&[z1.clone(), removed_z2], &[forward.clone()])
            .unwrap();
        assert_close(&backward[0], &z1);

        let removed_z1 = GaussianMessage::new(-z1.a, -&z1.b);
        let backward = sum
            .backward_messages(&[removed_z1, z2.clone()], &[forward])
            .unwrap();
        assert_close(&backward[1], &z2);
    }

    #[test]
    fn backward_ignores_own_input() {
        let sum = SumChannel::new(3);
        let x = [message(2., &[1.])];
        let z = [message(1., &[0.5]), message(3., &[1.]), message(0.5, &[-1.])];
        let mut z_changed = z.clone();
        z_changed[1] = message(10., &[7.]);

        let backward = sum.backward_messages(&z, &x).unwrap();
        let backward_changed = sum.backward_messages(&z_changed, &x).unwrap();
        assert_close(&backward[1], &backward_changed[1]);
    }

    #[test]
    fn zero_precisions_give_uninformative_messages() {
        let sum = SumChannel::new(2);
        let z = [message(0., &[0.]), message(2., &[1.])];
        let forward = sum.forward_messages(&z, &[message(1., &[0.])]).unwrap();
        assert_eq!(forward[0], GaussianMessage::zero(&[1]));

        // z_2 only depends on z_1, which carries no information
        let backward = sum.backward_messages(&z, &[message(1., &[0.])]).unwrap();
        assert!(backward[0].a > 0.);
        assert_eq!(backward[1], GaussianMessage::zero(&[1]));

        let backward = sum.backward_messages(&z, &[message(0., &[0.])]).unwrap();
        assert!(backward.iter().all(|message| message.a == 0.));
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let sum = SumChannel::new(3);
        let z = [message(1., &[0.]), message(1., &[0.])];
        assert_eq!(
            sum.forward_messages(&z, &[message(1., &[0.])]),
            Err(ChannelError::ArityMismatch {
                expected: 3,
                found: 2
            })
        );
        assert!(sum.second_moments(&[1.]).is_err());
        assert!(sum.backward_state_evolution(&[1., 1.], &[1.], &[1., 1.]).is_err());
    }

    #[test]
    fn state_evolution_matches_messages() {
        let sum = SumChannel::new(2);
        let z = [message(2., &[0.]), message(4., &[0.])];
        let x = [message(3., &[0.])];
        let forward = sum.forward_messages(&z, &x).unwrap();
        let backward = sum.backward_messages(&z, &x).unwrap();

        let ax_new = sum.forward_state_evolution(&[2., 4.], &[3.], &[1., 1.]).unwrap();
        let az_new = sum.backward_state_evolution(&[2., 4.], &[3.], &[1., 1.]).unwrap();
        assert!((ax_new[0] - forward[0].a).abs() < 1e-12);
        assert!((az_new[0] - backward[0].a).abs() < 1e-12);
        assert!((az_new[1] - backward[1].a).abs() < 1e-12);
    }
}

use ndarray::{ArrayD, Axis};
use num_complex::Complex64;
use rustfft::{FftDirection, FftPlanner};

// Applies a 1-d discrete Fourier transform along each of the given axes in turn.
// The inverse transform is normalized by 1/n per axis, so fft followed by ifft is the identity.
pub fn fft_axes(input: &ArrayD<Complex64>, axes: &[usize], inverse: bool) -> ArrayD<Complex64> {
    let mut output = input.clone();
    let mut planner = FftPlanner::<f64>::new();
    let direction = match inverse {
        true => FftDirection::Inverse,
        false => FftDirection::Forward,
    };

    for &axis in axes {
        let len = output.len_of(Axis(axis));
        if len < 2 {
            continue;
        }
        let fft = planner.plan_fft(len, direction);
        let scale = match inverse {
            true => 1. / len as f64,
            false => 1.,
        };

        let mut buffer = vec![Complex64::new(0., 0.); len];
        for mut lane in output.lanes_mut(Axis(axis)) {
            for (slot, value) in buffer.iter_mut().zip(lane.iter()) {
                *slot = *value;
            }
            fft.process(&mut buffer);
            for (value, slot) in lane.iter_mut().zip(buffer.iter()) {
                *value = *slot * scale;
            }
        }
    }

    output
}

// Forward transform over every axis
pub fn fftn(input: &ArrayD<Complex64>) -> ArrayD<Complex64> {
    let axes: Vec<usize> = (0..input.ndim()).collect();
    fft_axes(input, &axes, false)
}

// Inverse transform over every axis
pub fn ifftn(input: &ArrayD<Complex64>) -> ArrayD<Complex64> {
    let axes: Vec<usize> = (0..input.ndim()).collect();
    fft_axes(input, &axes, true)
}

pub fn to_complex(input: &ArrayD<f64>) -> ArrayD<Complex64> {
    input.mapv(|value| Complex64::new(value, 0.))
}

pub fn real_part(input: &ArrayD<Complex64>) -> ArrayD<f64> {
    input.mapv(|value| value.re)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use ndarray::{Array, IxDyn};

    use super::*;

    #[test]
    fn inverse_undoes_forward() {
        let x = Array::from_shape_fn(IxDyn(&[3, 4, 5]), |index| {
            (index[0] * 20 + index[1] * 5 + index[2]) as f64 * 0.37 - 2.
        });
        let roundtrip = real_part(&ifftn(&fftn(&to_complex(&x))));
        for (expected, found) in x.iter().zip(roundtrip.iter()) {
            assert!((expected - found).abs() < 1e-12);
        }
    }

    #[test]
    fn matches_direct_dft_along_one_axis() {
        let x = Array::from_shape_fn(IxDyn(&[2, 3]), |index| (index[0] + 2 * index[1]) as f64);
        let x_fft = fft_axes(&to_complex(&x), &[1], false);

        for row in 0..2 {
            for k in 0..3 {
                let mut expected = Complex64::new(0., 0.);
                for n in 0..3 {
                    let phase = -2. * PI * (k * n) as f64 / 3.;
                    expected += Complex64::new(phase.cos(), phase.sin()) * x[[row, n]];
                }
                assert!((x_fft[[row, k]] - expected).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn delta_has_flat_spectrum() {
        let mut delta = ArrayD::zeros(IxDyn(&[4, 4]));
        delta[[0, 0]] = 1.;
        let spectrum = fftn(&to_complex(&delta));
        assert!(spectrum
            .iter()
            .all(|value| (value - Complex64::new(1., 0.)).norm() < 1e-14));
    }
}

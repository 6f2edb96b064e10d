use std::f64::consts::PI;

use log::info;
use ndarray::{ArrayD, IxDyn};
use tramp_rust::{
    channels::{
        convolution_channel::ConvolutionChannel, gaussian_likelihood::GaussianLikelihood,
        gaussian_prior::GaussianPrior,
    },
    ConstantInit, DagModelBuilder, EarlyStopping, ExpectationPropagation, InferenceError,
    IterationOptions, MessagePassing,
};

// Denoises the gradient of a smooth periodic image observed with Gaussian noise
fn main() -> Result<(), InferenceError> {
    std::env::set_var("RUST_LOG", "info"); // change "info" to "debug" for debug-level logging, etc.
    env_logger::init();

    let shape = [16, 16];
    let channel = ConvolutionChannel::gradient(&shape)?;
    let output_shape = channel.output_shape();

    let image = ArrayD::from_shape_fn(IxDyn(&shape), |index| {
        let (i, j) = (index[0] as f64, index[1] as f64);
        (2. * PI * i / 16.).sin() + (2. * PI * j / 8.).cos()
    });
    let clean_gradient = channel.convolve(&image)?;
    let mut counter = 0.;
    let observed = clean_gradient.mapv(|value| {
        counter += 1.;
        value + 0.3 * (counter * 12.9898_f64).sin()
    });

    let mut builder = DagModelBuilder::new();
    let prior = builder.add_factor("prior", GaussianPrior::new(&shape, 0., 1.));
    let z = builder.add_variable("z", &shape);
    let grad = builder.add_factor("grad", channel);
    let x = builder.add_variable("x", &output_shape);
    let likelihood = builder.add_factor("y", GaussianLikelihood::new(observed.clone(), 0.09));
    builder
        .connect(prior, z)
        .connect(z, grad)
        .connect(grad, x)
        .connect(x, likelihood);
    let model = builder.build()?;

    let mut engine = MessagePassing::new(&model, ExpectationPropagation);
    let mut options = IterationOptions::default();
    options.set_max_iter(100);
    let report = engine.iterate(&options, &ConstantInit::default(), &mut EarlyStopping::default())?;
    info!(
        "Finished after {} iterations: {}",
        report.n_iter, report.termination
    );

    for variable in engine.variables_data()? {
        let v = variable.data.scalar("v")?;
        info!("{}: v={:.6}", variable.id, v);
    }

    let denoised = engine.variables_data()?[1].data.array("r")?.clone();
    let mse = |estimate: &ArrayD<f64>| {
        (estimate - &clean_gradient).mapv(|delta| delta * delta).mean().unwrap_or(0.)
    };
    info!("mse of observed gradient: {:.6}", mse(&observed));
    info!("mse of estimated gradient: {:.6}", mse(&denoised));

    Ok(())
}

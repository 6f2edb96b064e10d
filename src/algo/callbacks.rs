use log::info;
use ndarray::ArrayD;

use super::message_passing::{MessagePassing, MessageRules};

// Called after every accepted iteration; returning true stops the run
pub trait Callback {
    fn call<R: MessageRules>(
        &mut self,
        engine: &MessagePassing<'_, R>,
        iteration: usize,
        max_iter: usize,
    ) -> bool;
}

// Never stops the run
pub struct PassCallback;

impl Callback for PassCallback {
    fn call<R: MessageRules>(
        &mut self,
        _engine: &MessagePassing<'_, R>,
        _iteration: usize,
        _max_iter: usize,
    ) -> bool {
        false
    }
}

/// Stops once the estimates no longer move, or once a variance collapses.
///
/// The estimates are considered stable when, for every variable, both the mean
/// squared change of `r` and the change of `v` since the previous iteration are
/// below `tol`.
pub struct EarlyStopping {
    tol: f64,
    min_variance: f64,
    previous: Option<Vec<(ArrayD<f64>, f64)>>,
}

impl EarlyStopping {
    pub fn new(tol: f64, min_variance: f64) -> Self {
        EarlyStopping {
            tol,
            min_variance,
            previous: None,
        }
    }

    pub fn default() -> Self {
        EarlyStopping::new(1e-6, 1e-12)
    }

    pub fn tol(&self) -> f64 {
        self.tol
    }

    pub fn min_variance(&self) -> f64 {
        self.min_variance
    }

    fn is_stable(&self, current: &[(ArrayD<f64>, f64)]) -> bool {
        let Some(previous) = &self.previous else {
            return false;
        };
        previous.len() == current.len()
            && previous
                .iter()
                .zip(current.iter())
                .all(|((old_r, old_v), (new_r, new_v))| {
                    let r_change = (old_r - new_r).mapv(|delta| delta * delta).mean();
                    r_change.map_or(true, |change| change < self.tol)
                        && (old_v - new_v).abs() < self.tol
                })
    }
}

impl Callback for EarlyStopping {
    fn call<R: MessageRules>(
        &mut self,
        engine: &MessagePassing<'_, R>,
        iteration: usize,
        _max_iter: usize,
    ) -> bool {
        if iteration == 0 {
            self.previous = None;
        }
        let Ok(variables_data) = engine.variables_data() else {
            return false;
        };

        let mut current = Vec::with_capacity(variables_data.len());
        for variable in variables_data.iter() {
            let (Ok(r), Ok(v)) = (variable.data.array("r"), variable.data.scalar("v")) else {
                continue;
            };
            if v < self.min_variance {
                info!(
                    "v={} < min_variance={} for {}, stopping",
                    v, self.min_variance, variable.id
                );
                return true;
            }
            current.push((r.clone(), v));
        }

        if self.is_stable(&current) {
            info!("Estimates stable within tol={} at iteration {}", self.tol, iteration);
            return true;
        }
        self.previous = Some(current);
        false
    }
}

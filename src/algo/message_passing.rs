use std::fmt::Display;

use bitvec::prelude::LocalBits;
use bitvec::vec::BitVec;
use log::{debug, info, warn};
use petgraph::graph::NodeIndex;

use crate::{
    errors::InferenceError,
    message::{
        message_graph::{Checkpoint, EdgeDirection, Message, MessageGraph},
        payload::Payload,
    },
    model::dag_model::DagModel,
};

use super::{callbacks::Callback, initial_conditions::Initializer};

/// Rules computing new messages at a node from the messages arriving at it.
///
/// `forward` and `backward` return the messages to write back to the graph;
/// `update` returns the new estimates of a variable (at least `r` and `v`).
pub trait MessageRules {
    // Keys set by the initializer on every message edge
    fn message_keys(&self) -> &[&'static str];

    fn forward(
        &self,
        model: &DagModel,
        node: NodeIndex<usize>,
        incoming: &[Message],
    ) -> Result<Vec<Message>, InferenceError>;

    fn backward(
        &self,
        model: &DagModel,
        node: NodeIndex<usize>,
        incoming: &[Message],
    ) -> Result<Vec<Message>, InferenceError>;

    fn update(
        &self,
        model: &DagModel,
        variable: NodeIndex<usize>,
        incoming: &[Message],
    ) -> Result<Payload, InferenceError>;
}

pub struct IterationOptions {
    max_iter: usize,
    warm_start: bool,
    check_nan: bool,
    check_decreasing: bool,
    small_variance_eps: f64,
}

impl IterationOptions {
    pub fn default() -> Self {
        IterationOptions {
            max_iter: 200,
            warm_start: false,
            check_nan: true,
            check_decreasing: true,
            small_variance_eps: 1e-10,
        }
    }

    pub fn set_max_iter(&mut self, value: usize) -> &mut Self {
        self.max_iter = value;
        self
    }

    pub fn set_warm_start(&mut self, value: bool) -> &mut Self {
        self.warm_start = value;
        self
    }

    pub fn set_check_nan(&mut self, value: bool) -> &mut Self {
        self.check_nan = value;
        self
    }

    pub fn set_check_decreasing(&mut self, value: bool) -> &mut Self {
        self.check_decreasing = value;
        self
    }

    pub fn set_small_variance_eps(&mut self, value: f64) -> &mut Self {
        self.small_variance_eps = value;
        self
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn warm_start(&self) -> bool {
        self.warm_start
    }

    pub fn check_nan(&self) -> bool {
        self.check_nan
    }

    pub fn check_decreasing(&self) -> bool {
        self.check_decreasing
    }

    pub fn small_variance_eps(&self) -> f64 {
        self.small_variance_eps
    }

    // Divergence checks need a checkpoint
    fn needs_checkpoint(&self) -> bool {
        self.check_nan || self.check_decreasing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    Iterating,
    Converged,
    Diverged,
    MaxIterReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    MaxIterReached,
    CallbackStop,
    DivergedNan,
    DivergedIncreasing,
}

impl Termination {
    fn state(&self) -> EngineState {
        match self {
            Termination::MaxIterReached => EngineState::MaxIterReached,
            Termination::CallbackStop => EngineState::Converged,
            Termination::DivergedNan | Termination::DivergedIncreasing => EngineState::Diverged,
        }
    }
}

impl Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::MaxIterReached => write!(f, "max_iter reached"),
            Termination::CallbackStop => write!(f, "stopped by callback"),
            Termination::DivergedNan => write!(f, "nan v"),
            Termination::DivergedIncreasing => write!(f, "increasing v"),
        }
    }
}

/// Diagnostics of one iteration.
///
/// Flags are indexed like `DagModel::variables`. `increasing` is only filled when
/// a checkpoint was taken, i.e. from the second iteration of a run on.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    pub variances: Vec<f64>,
    pub small: BitVec<usize, LocalBits>,
    pub nan: BitVec<usize, LocalBits>,
    pub increasing: BitVec<usize, LocalBits>,
    pub accepted: bool,
}

impl IterationReport {
    fn new_zero(iteration: usize, num_variables: usize) -> Self {
        IterationReport {
            iteration,
            variances: Vec::with_capacity(num_variables),
            small: BitVec::repeat(false, num_variables),
            nan: BitVec::repeat(false, num_variables),
            increasing: BitVec::repeat(false, num_variables),
            accepted: false,
        }
    }

    pub fn any_small(&self) -> bool {
        self.small.any()
    }

    pub fn any_nan(&self) -> bool {
        self.nan.any()
    }

    pub fn any_increasing(&self) -> bool {
        self.increasing.any()
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub n_iter: usize,
    pub termination: Termination,
    pub iterations: Vec<IterationReport>,
}

// Current estimates of a variable, as returned by `MessagePassing::variables_data`
#[derive(Debug, Clone, PartialEq)]
pub struct VariableData {
    pub id: String,
    pub node: NodeIndex<usize>,
    pub data: Payload,
}

/// Fixed-point iteration of forward sweep, backward sweep and variable update over
/// the message graph of a model.
///
/// The engine owns its message graph. Between runs the graph is kept, so that a
/// run with `warm_start` resumes from the last committed state.
pub struct MessagePassing<'a, R: MessageRules> {
    model: &'a DagModel,
    rules: R,
    message_graph: Option<MessageGraph>,
    state: EngineState,
    n_iter: usize,
}

impl<'a, R: MessageRules> MessagePassing<'a, R> {
    pub fn new(model: &'a DagModel, rules: R) -> Self {
        MessagePassing {
            model,
            rules,
            message_graph: None,
            state: EngineState::Uninitialized,
            n_iter: 0,
        }
    }

    pub fn model(&self) -> &DagModel {
        self.model
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    // Number of accepted iterations since the last initialization
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn message_graph(&self) -> Option<&MessageGraph> {
        self.message_graph.as_ref()
    }

    pub fn init_message_graph(&mut self, initializer: &dyn Initializer) -> Result<(), InferenceError> {
        info!("Init message graph with {}", initializer);
        self.message_graph = Some(MessageGraph::new(
            self.model,
            self.rules.message_keys(),
            initializer,
        )?);
        self.n_iter = 0;
        self.state = EngineState::Ready;
        Ok(())
    }

    // Snapshot of the estimates of every variable, in the order of the model's variables
    pub fn variables_data(&self) -> Result<Vec<VariableData>, InferenceError> {
        let message_graph = self.message_graph.as_ref().ok_or(InferenceError::NotInitialized)?;
        Ok(self
            .model
            .variables()
            .iter()
            .map(|node| VariableData {
                id: self.model.node(*node).id().to_string(),
                node: *node,
                data: message_graph.node_data(*node).clone(),
            })
            .collect())
    }

    fn graph_mut(&mut self) -> Result<&mut MessageGraph, InferenceError> {
        self.message_graph.as_mut().ok_or(InferenceError::NotInitialized)
    }

    fn sweep(&mut self, direction: EdgeDirection) -> Result<(), InferenceError> {
        let model = self.model;
        let ordering = match direction {
            EdgeDirection::Forward => model.forward_ordering(),
            EdgeDirection::Backward => model.backward_ordering(),
        };
        let message_graph = self.message_graph.as_mut().ok_or(InferenceError::NotInitialized)?;
        for &node in ordering.iter() {
            let incoming = message_graph.incoming(node);
            let new_messages = match direction {
                EdgeDirection::Forward => self.rules.forward(model, node, &incoming)?,
                EdgeDirection::Backward => self.rules.backward(model, node, &incoming)?,
            };
            for message in new_messages {
                message_graph.update_message(message)?;
            }
        }
        Ok(())
    }

    fn update_variables(&mut self) -> Result<(), InferenceError> {
        let model = self.model;
        let message_graph = self.message_graph.as_mut().ok_or(InferenceError::NotInitialized)?;
        for &variable in model.variables().iter() {
            let incoming = message_graph.incoming(variable);
            let new_data = self.rules.update(model, variable, &incoming)?;
            message_graph.set_node_data(variable, new_data);
        }
        Ok(())
    }

    // One iteration: forward sweep, backward sweep, then variable update
    fn step(&mut self) -> Result<(), InferenceError> {
        self.sweep(EdgeDirection::Forward)?;
        self.sweep(EdgeDirection::Backward)?;
        self.update_variables()
    }

    // Flags small, nan and (against the checkpoint) increasing variances
    fn diagnose(
        &self,
        iteration: usize,
        options: &IterationOptions,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<IterationReport, InferenceError> {
        let message_graph = self.message_graph.as_ref().ok_or(InferenceError::NotInitialized)?;
        let variables = self.model.variables();
        let mut report = IterationReport::new_zero(iteration, variables.len());

        for (i, variable) in variables.iter().enumerate() {
            let new_v = message_graph.node_data(*variable).scalar("v")?;
            report.variances.push(new_v);
            report.small.set(i, new_v < options.small_variance_eps());
            report.nan.set(i, new_v.is_nan());
            if let Some(checkpoint) = checkpoint {
                if let Ok(old_v) = checkpoint.node_data(*variable).scalar("v") {
                    report.increasing.set(i, new_v > old_v);
                }
            }
        }
        Ok(report)
    }

    fn log_report(&self, report: &IterationReport, options: &IterationOptions) {
        let variables = self.model.variables();
        for i in report.small.iter_ones() {
            info!(
                "new_v={} < eps={} for {}",
                report.variances[i],
                options.small_variance_eps(),
                self.model.node(variables[i])
            );
        }
        for i in report.nan.iter_ones() {
            info!("new_v is nan for {}", self.model.node(variables[i]));
        }
        for i in report.increasing.iter_ones() {
            info!(
                "new_v={} increased for {}",
                report.variances[i],
                self.model.node(variables[i])
            );
        }
    }

    fn finish(&mut self, termination: Termination, iterations: Vec<IterationReport>) -> RunReport {
        self.state = termination.state();
        info!(
            "Terminated after n_iter={} iterations ({})",
            self.n_iter, termination
        );
        RunReport {
            n_iter: self.n_iter,
            termination,
            iterations,
        }
    }

    /// Runs at most `max_iter` iterations.
    ///
    /// Unless warm starting, the message graph is first rebuilt with `initializer`.
    /// An iteration producing a nan or increasing variance is undone and ends the
    /// run; the outcome is reported in the returned `RunReport`, not as an error.
    /// An error raised by a rule also undoes the iteration when a checkpoint was
    /// taken for it, and leaves the engine `Ready` before being returned.
    pub fn iterate<C: Callback>(
        &mut self,
        options: &IterationOptions,
        initializer: &dyn Initializer,
        callback: &mut C,
    ) -> Result<RunReport, InferenceError> {
        if options.warm_start() {
            if self.message_graph.is_none() {
                return Err(InferenceError::NotInitialized);
            }
            info!("Warm start with n_iter={}, no initialization", self.n_iter);
        } else {
            self.init_message_graph(initializer)?;
        }

        self.state = EngineState::Iterating;
        let mut iterations = Vec::new();
        for iteration in 0..options.max_iter() {
            let checkpoint = match iteration > 0 && options.needs_checkpoint() {
                true => Some(self.graph_mut()?.checkpoint()),
                false => None,
            };

            if let Err(error) = self.step() {
                warn!("Iteration {} failed: {}", self.n_iter, error);
                if let Some(checkpoint) = checkpoint {
                    self.graph_mut()?.restore(checkpoint);
                }
                self.state = EngineState::Ready;
                return Err(error);
            }

            let mut report = self.diagnose(
                iteration,
                options,
                checkpoint.as_ref().filter(|_| options.check_decreasing()),
            )?;
            self.log_report(&report, options);

            let divergence = if options.check_nan() && report.any_nan() {
                Some(Termination::DivergedNan)
            } else if options.check_decreasing() && report.any_increasing() {
                Some(Termination::DivergedIncreasing)
            } else {
                None
            };
            if let (Some(termination), Some(checkpoint)) = (divergence, checkpoint) {
                warn!("{}: restoring message graph of iteration {}", termination, self.n_iter);
                self.graph_mut()?.restore(checkpoint);
                iterations.push(report);
                return Ok(self.finish(termination, iterations));
            }

            self.n_iter += 1;
            report.accepted = true;
            iterations.push(report);
            debug!("n_iter={}", self.n_iter);

            if callback.call(self, iteration, options.max_iter()) {
                return Ok(self.finish(Termination::CallbackStop, iterations));
            }
        }

        Ok(self.finish(Termination::MaxIterReached, iterations))
    }
}

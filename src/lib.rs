pub mod errors;

pub mod data_structures {
    pub mod fft;
}

pub mod message {
    pub mod gaussian_message;
    pub mod message_graph;
    pub mod payload;
}

pub mod channels {
    pub mod channel_trait;
    pub mod channel_type;
    pub mod convolution_channel;
    pub mod gaussian_likelihood;
    pub mod gaussian_prior;
    pub mod reshape_channel;
    pub mod sum_channel;
}

pub mod model {
    pub mod dag_model;
}

pub mod algo {
    pub mod callbacks;
    pub mod expectation_propagation;
    pub mod initial_conditions;
    pub mod message_passing;
}

pub use algo::{
    callbacks::{Callback, EarlyStopping, PassCallback},
    expectation_propagation::ExpectationPropagation,
    initial_conditions::{ConstantInit, Initializer},
    message_passing::{
        EngineState, IterationOptions, IterationReport, MessagePassing, MessageRules, RunReport,
        Termination, VariableData,
    },
};
pub use errors::{ChannelError, InferenceError};
pub use model::dag_model::{DagModel, DagModelBuilder};

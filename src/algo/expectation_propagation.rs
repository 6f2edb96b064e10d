use petgraph::graph::NodeIndex;

use crate::{
    channels::channel_trait::Factor,
    errors::InferenceError,
    message::{
        gaussian_message::GaussianMessage,
        message_graph::{EdgeDirection, Message},
        payload::Payload,
    },
    model::dag_model::{DagModel, FactorNode, ModelNode},
};

use super::message_passing::MessageRules;

// Finds the message sent by `source` among the messages arriving at `target`
fn message_from(
    incoming: &[Message],
    source: NodeIndex<usize>,
    target: NodeIndex<usize>,
) -> Result<GaussianMessage, InferenceError> {
    let message = incoming
        .iter()
        .find(|message| message.source == source)
        .ok_or(InferenceError::UnknownEdge {
            from: source.index(),
            to: target.index(),
        })?;
    GaussianMessage::from_payload(&message.payload)
}

/// Gaussian expectation propagation with isotropic natural parameters `(a, b)`.
///
/// A variable sends each neighbouring factor the product of everything it received
/// from the other factors. A factor hands the messages of its inputs (`z` side) and
/// outputs (`x` side) to its channel, in model order.
pub struct ExpectationPropagation;

impl ExpectationPropagation {
    // Sums all incoming messages except the one coming from `excluded`
    fn cavity(
        model: &DagModel,
        variable: NodeIndex<usize>,
        incoming: &[Message],
        excluded: Option<NodeIndex<usize>>,
    ) -> Result<GaussianMessage, InferenceError> {
        let shape = model.variable(variable).map(|v| v.shape()).unwrap_or(&[]);
        let mut cavity = GaussianMessage::zero(shape);
        for message in incoming
            .iter()
            .filter(|message| Some(message.source) != excluded)
        {
            cavity.add_assign(&GaussianMessage::from_payload(&message.payload)?);
        }
        Ok(cavity)
    }

    fn variable_messages(
        model: &DagModel,
        variable: NodeIndex<usize>,
        incoming: &[Message],
        targets: Vec<NodeIndex<usize>>,
    ) -> Result<Vec<Message>, InferenceError> {
        targets
            .into_iter()
            .map(|factor| {
                let cavity = Self::cavity(model, variable, incoming, Some(factor))?;
                Ok(Message::new(variable, factor, cavity.into_payload()))
            })
            .collect()
    }

    fn factor_messages(
        model: &DagModel,
        node: NodeIndex<usize>,
        factor: &FactorNode,
        incoming: &[Message],
        direction: EdgeDirection,
    ) -> Result<Vec<Message>, InferenceError> {
        let prev = model.prev(node);
        let next = model.next(node);
        let z = prev
            .iter()
            .map(|source| message_from(incoming, *source, node))
            .collect::<Result<Vec<_>, _>>()?;
        let x = next
            .iter()
            .map(|source| message_from(incoming, *source, node))
            .collect::<Result<Vec<_>, _>>()?;

        let into_factor_error = |error| InferenceError::Factor {
            factor: factor.id().to_string(),
            error,
        };
        let (new_messages, targets) = match direction {
            EdgeDirection::Forward => (
                factor
                    .channel()
                    .forward_messages(&z, &x)
                    .map_err(into_factor_error)?,
                next,
            ),
            EdgeDirection::Backward => (
                factor
                    .channel()
                    .backward_messages(&z, &x)
                    .map_err(into_factor_error)?,
                prev,
            ),
        };
        Ok(new_messages
            .into_iter()
            .zip(targets)
            .map(|(message, target)| Message::new(node, target, message.into_payload()))
            .collect())
    }

    fn messages(
        model: &DagModel,
        node: NodeIndex<usize>,
        incoming: &[Message],
        direction: EdgeDirection,
    ) -> Result<Vec<Message>, InferenceError> {
        match model.node(node) {
            ModelNode::Variable(_) => {
                let targets = match direction {
                    EdgeDirection::Forward => model.next(node),
                    EdgeDirection::Backward => model.prev(node),
                };
                Self::variable_messages(model, node, incoming, targets)
            }
            ModelNode::Factor(factor) => {
                Self::factor_messages(model, node, factor, incoming, direction)
            }
        }
    }
}

impl MessageRules for ExpectationPropagation {
    fn message_keys(&self) -> &[&'static str] {
        &["a", "b"]
    }

    fn forward(
        &self,
        model: &DagModel,
        node: NodeIndex<usize>,
        incoming: &[Message],
    ) -> Result<Vec<Message>, InferenceError> {
        Self::messages(model, node, incoming, EdgeDirection::Forward)
    }

    fn backward(
        &self,
        model: &DagModel,
        node: NodeIndex<usize>,
        incoming: &[Message],
    ) -> Result<Vec<Message>, InferenceError> {
        Self::messages(model, node, incoming, EdgeDirection::Backward)
    }

    // Posterior of a variable: the product of every incoming message
    fn update(
        &self,
        model: &DagModel,
        variable: NodeIndex<usize>,
        incoming: &[Message],
    ) -> Result<Payload, InferenceError> {
        let posterior = Self::cavity(model, variable, incoming, None)?;
        let tau = model.variable(variable).map(|v| v.tau()).unwrap_or(0.);
        let (r, v) = match posterior.a == 0. {
            true => (posterior.b.mapv(|_| 0.), tau),
            false => (&posterior.b / posterior.a, 1. / posterior.a),
        };
        Ok(Payload::new()
            .with("a", posterior.a)
            .with("b", posterior.b)
            .with("r", r)
            .with("v", v))
    }
}

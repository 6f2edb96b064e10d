use std::fmt::Display;

use petgraph::{
    graph::{DiGraph, EdgeIndex, NodeIndex},
    visit::EdgeRef,
    Direction::Incoming,
};

use crate::{
    algo::initial_conditions::Initializer,
    errors::InferenceError,
    model::dag_model::{DagModel, ModelNode},
};

use super::payload::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Forward,
    Backward,
}

impl Display for EdgeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeDirection::Forward => write!(f, "fwd"),
            EdgeDirection::Backward => write!(f, "bwd"),
        }
    }
}

// Data stored on a message edge: how many times it was written, and its named tensors
#[derive(Debug, Clone, PartialEq)]
pub struct MessageData {
    n_iter: usize,
    direction: EdgeDirection,
    payload: Payload,
}

impl MessageData {
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn direction(&self) -> EdgeDirection {
        self.direction
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// A message travelling from `source` to `target`.
///
/// Rules receive the incoming messages of a node in this form and return the
/// messages they want written back to the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub source: NodeIndex<usize>,
    pub target: NodeIndex<usize>,
    pub payload: Payload,
}

impl Message {
    pub fn new(source: NodeIndex<usize>, target: NodeIndex<usize>, payload: Payload) -> Self {
        Message {
            source,
            target,
            payload,
        }
    }
}

// Deep copy of every payload of a message graph
#[derive(Debug, Clone)]
pub struct Checkpoint {
    edge_data: Vec<MessageData>,
    node_data: Vec<Payload>,
}

impl Checkpoint {
    pub fn node_data(&self, node: NodeIndex<usize>) -> &Payload {
        &self.node_data[node.index()]
    }
}

/// Message graph of a model: two message edges (one per direction) for every edge
/// of the model, plus the current estimates of every variable.
///
/// Topology is fixed at construction. Payloads live in dense vectors indexed by
/// edge and node indices, so a checkpoint is a plain copy of two vectors.
pub struct MessageGraph {
    graph: DiGraph<(), EdgeDirection, usize>,
    edge_data: Vec<MessageData>,
    node_data: Vec<Payload>,
}

impl MessageGraph {
    pub fn new(
        model: &DagModel,
        message_keys: &[&str],
        initializer: &dyn Initializer,
    ) -> Result<Self, InferenceError> {
        let dag = model.dag();
        let mut graph =
            DiGraph::<(), EdgeDirection, usize>::with_capacity(dag.node_count(), 2 * dag.edge_count());
        for _ in dag.node_indices() {
            graph.add_node(());
        }

        let mut edge_data = Vec::with_capacity(2 * dag.edge_count());
        for edge in dag.edge_references() {
            for (source, target, direction) in [
                (edge.source(), edge.target(), EdgeDirection::Forward),
                (edge.target(), edge.source(), EdgeDirection::Backward),
            ] {
                let (variable, is_source_variable) = match &dag[source] {
                    ModelNode::Variable(variable) => (variable, true),
                    ModelNode::Factor(factor) => match &dag[target] {
                        ModelNode::Variable(variable) => (variable, false),
                        ModelNode::Factor(_) => {
                            return Err(InferenceError::InvalidEdge {
                                from: factor.id().to_string(),
                                to: dag[target].id().to_string(),
                            })
                        }
                    },
                };

                let mut payload = Payload::new();
                if direction == EdgeDirection::Forward && is_source_variable {
                    payload.insert("tau", variable.tau());
                }
                for key in message_keys {
                    payload.insert(key, initializer.init(key, variable.shape()));
                }

                graph.add_edge(source, target, direction);
                edge_data.push(MessageData {
                    n_iter: 0,
                    direction,
                    payload,
                });
            }
        }

        Ok(MessageGraph {
            graph,
            edge_data,
            node_data: vec![Payload::new(); dag.node_count()],
        })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn find_edge(
        &self,
        source: NodeIndex<usize>,
        target: NodeIndex<usize>,
    ) -> Option<EdgeIndex<usize>> {
        self.graph.find_edge(source, target)
    }

    pub fn message(
        &self,
        source: NodeIndex<usize>,
        target: NodeIndex<usize>,
    ) -> Option<&MessageData> {
        self.find_edge(source, target)
            .map(|edge| &self.edge_data[edge.index()])
    }

    // Collects the messages arriving at a node, in the order their edges were created
    pub fn incoming(&self, node: NodeIndex<usize>) -> Vec<Message> {
        let mut edges: Vec<_> = self.graph.edges_directed(node, Incoming).collect();
        edges.sort_unstable_by_key(|edge| edge.id());
        edges
            .into_iter()
            .map(|edge| {
                Message::new(
                    edge.source(),
                    edge.target(),
                    self.edge_data[edge.id().index()].payload.clone(),
                )
            })
            .collect()
    }

    // Increments the edge counter and merges the new tensors into the stored ones
    pub fn update_message(&mut self, message: Message) -> Result<(), InferenceError> {
        let edge = self
            .find_edge(message.source, message.target)
            .ok_or(InferenceError::UnknownEdge {
                from: message.source.index(),
                to: message.target.index(),
            })?;
        let data = &mut self.edge_data[edge.index()];
        data.n_iter += 1;
        data.payload.merge(message.payload);
        Ok(())
    }

    pub fn node_data(&self, node: NodeIndex<usize>) -> &Payload {
        &self.node_data[node.index()]
    }

    pub fn set_node_data(&mut self, node: NodeIndex<usize>, payload: Payload) {
        self.node_data[node.index()] = payload;
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            edge_data: self.edge_data.clone(),
            node_data: self.node_data.clone(),
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.edge_data = checkpoint.edge_data;
        self.node_data = checkpoint.node_data;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        algo::initial_conditions::ConstantInit,
        channels::{gaussian_prior::GaussianPrior, reshape_channel::ReshapeChannel},
        message::payload::Tensor,
        model::dag_model::DagModelBuilder,
    };

    use super::*;

    fn construct_chain() -> (DagModel, [NodeIndex<usize>; 4]) {
        let mut builder = DagModelBuilder::new();
        let prior = builder.add_factor("prior", GaussianPrior::new(&[2, 3], 0., 2.));
        let z = builder.add_variable("z", &[2, 3]);
        let reshape = builder.add_factor("reshape", ReshapeChannel::new(&[2, 3], &[6]).unwrap());
        let x = builder.add_variable("x", &[6]);
        builder.connect(prior, z).connect(z, reshape).connect(reshape, x);
        (builder.build().unwrap(), [prior, z, reshape, x])
    }

    #[test]
    fn two_edges_per_model_edge() {
        let (model, [prior, z, reshape, x]) = construct_chain();
        let graph = MessageGraph::new(&model, &["a", "b"], &ConstantInit::new(1., 0.)).unwrap();
        assert_eq!(graph.edge_count(), 6);

        let forward = graph.message(z, reshape).unwrap();
        assert_eq!(forward.direction(), EdgeDirection::Forward);
        assert_eq!(forward.n_iter(), 0);
        assert_eq!(forward.payload().get("tau"), Some(&Tensor::Scalar(2.)));
        assert_eq!(forward.payload().scalar("a").unwrap(), 1.);

        let backward = graph.message(x, reshape).unwrap();
        assert_eq!(backward.direction(), EdgeDirection::Backward);
        assert!(!backward.payload().contains_key("tau"));
        assert_eq!(backward.payload().array("b").unwrap().shape(), &[6]);

        // Factor to variable edges carry no second moment
        assert!(!graph.message(prior, z).unwrap().payload().contains_key("tau"));
        assert!(graph.message(prior, x).is_none());
    }

    #[test]
    fn incoming_follows_edge_order() {
        let (model, [prior, z, reshape, _]) = construct_chain();
        let graph = MessageGraph::new(&model, &["a", "b"], &ConstantInit::default()).unwrap();
        let sources: Vec<_> = graph.incoming(z).iter().map(|message| message.source).collect();
        assert_eq!(sources, vec![prior, reshape]);
    }

    #[test]
    fn update_counts_and_merges() {
        let (model, [_, z, reshape, x]) = construct_chain();
        let mut graph = MessageGraph::new(&model, &["a", "b"], &ConstantInit::default()).unwrap();
        graph
            .update_message(Message::new(z, reshape, Payload::new().with("a", 3.)))
            .unwrap();
        graph
            .update_message(Message::new(z, reshape, Payload::new().with("a", 4.)))
            .unwrap();

        let data = graph.message(z, reshape).unwrap();
        assert_eq!(data.n_iter(), 2);
        assert_eq!(data.payload().scalar("a").unwrap(), 4.);
        assert!(data.payload().contains_key("b"));
        assert!(data.payload().contains_key("tau"));

        assert!(matches!(
            graph.update_message(Message::new(z, x, Payload::new())),
            Err(InferenceError::UnknownEdge { .. })
        ));
    }

    #[test]
    fn restore_discards_later_writes() {
        let (model, [_, z, reshape, _]) = construct_chain();
        let mut graph = MessageGraph::new(&model, &["a", "b"], &ConstantInit::default()).unwrap();
        graph.set_node_data(z, Payload::new().with("v", 1.));
        let checkpoint = graph.checkpoint();

        graph.set_node_data(z, Payload::new().with("v", f64::NAN));
        graph
            .update_message(Message::new(z, reshape, Payload::new().with("a", 5.)))
            .unwrap();
        graph.restore(checkpoint);

        assert_eq!(graph.node_data(z).scalar("v").unwrap(), 1.);
        let data = graph.message(z, reshape).unwrap();
        assert_eq!(data.n_iter(), 0);
        assert_eq!(data.payload().scalar("a").unwrap(), 0.);
    }
}

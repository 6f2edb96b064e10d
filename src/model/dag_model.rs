use std::{collections::HashSet, fmt::Display};

use log::debug;
use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction::{self, Incoming, Outgoing},
};

use crate::{
    channels::{channel_trait::Factor, channel_type::ChannelType},
    errors::InferenceError,
};

// Stores a variable of the model: its shape and its second moment
pub struct Variable {
    id: String,
    shape: Vec<usize>,
    tau: f64,
}

impl Variable {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:?}", self.id, self.shape)
    }
}

// Stores a factor of the model together with its numeric contract
pub struct FactorNode {
    id: String,
    channel: ChannelType,
}

impl FactorNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &ChannelType {
        &self.channel
    }
}

pub enum ModelNode {
    Variable(Variable),
    Factor(FactorNode),
}

impl ModelNode {
    pub fn id(&self) -> &str {
        match self {
            ModelNode::Variable(variable) => variable.id(),
            ModelNode::Factor(factor) => factor.id(),
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, ModelNode::Variable(_))
    }
}

impl Display for ModelNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelNode::Variable(variable) => variable.fmt(f),
            ModelNode::Factor(factor) => write!(f, "{}:{}", factor.id, factor.channel),
        }
    }
}

pub type ModelGraph = DiGraph<ModelNode, (), usize>;

/// A factor graph shaped like a directed tree: variables and factors alternate
/// along every edge, which points from inputs to outputs.
///
/// Built once by [`DagModelBuilder`], after which shapes, second moments and the
/// forward/backward orderings are fixed.
pub struct DagModel {
    dag: ModelGraph,
    forward_ordering: Vec<NodeIndex<usize>>,
    backward_ordering: Vec<NodeIndex<usize>>,
    variables: Vec<NodeIndex<usize>>,
}

impl DagModel {
    pub fn dag(&self) -> &ModelGraph {
        &self.dag
    }

    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn node(&self, node: NodeIndex<usize>) -> &ModelNode {
        &self.dag[node]
    }

    pub fn variable(&self, node: NodeIndex<usize>) -> Option<&Variable> {
        match &self.dag[node] {
            ModelNode::Variable(variable) => Some(variable),
            ModelNode::Factor(_) => None,
        }
    }

    pub fn factor(&self, node: NodeIndex<usize>) -> Option<&FactorNode> {
        match &self.dag[node] {
            ModelNode::Variable(_) => None,
            ModelNode::Factor(factor) => Some(factor),
        }
    }

    pub fn forward_ordering(&self) -> &[NodeIndex<usize>] {
        &self.forward_ordering
    }

    pub fn backward_ordering(&self) -> &[NodeIndex<usize>] {
        &self.backward_ordering
    }

    // Variables in the order they were added to the model
    pub fn variables(&self) -> &[NodeIndex<usize>] {
        &self.variables
    }

    pub fn find_variable(&self, id: &str) -> Option<NodeIndex<usize>> {
        self.variables
            .iter()
            .copied()
            .find(|node| self.dag[*node].id() == id)
    }

    // Returns the parents of a node in the order their edges were added
    pub fn prev(&self, node: NodeIndex<usize>) -> Vec<NodeIndex<usize>> {
        ordered_neighbors(&self.dag, node, Incoming)
    }

    // Returns the children of a node in the order their edges were added
    pub fn next(&self, node: NodeIndex<usize>) -> Vec<NodeIndex<usize>> {
        ordered_neighbors(&self.dag, node, Outgoing)
    }
}

fn ordered_neighbors(
    dag: &ModelGraph,
    node: NodeIndex<usize>,
    direction: Direction,
) -> Vec<NodeIndex<usize>> {
    let mut edges: Vec<_> = dag
        .edges_directed(node, direction)
        .map(|edge| match direction {
            Incoming => (edge.id(), edge.source()),
            Outgoing => (edge.id(), edge.target()),
        })
        .collect();
    edges.sort_unstable_by_key(|(edge, _)| *edge);
    edges.into_iter().map(|(_, neighbor)| neighbor).collect()
}

fn node_shape(dag: &ModelGraph, node: NodeIndex<usize>) -> &[usize] {
    match &dag[node] {
        ModelNode::Variable(variable) => &variable.shape,
        ModelNode::Factor(_) => &[],
    }
}

// Collects variables, factors and edges, then validates them into a DagModel
pub struct DagModelBuilder {
    dag: ModelGraph,
}

impl DagModelBuilder {
    pub fn new() -> Self {
        DagModelBuilder {
            dag: ModelGraph::default(),
        }
    }

    pub fn add_variable(&mut self, id: &str, shape: &[usize]) -> NodeIndex<usize> {
        self.dag.add_node(ModelNode::Variable(Variable {
            id: id.to_string(),
            shape: shape.to_vec(),
            tau: 0.,
        }))
    }

    pub fn add_factor(&mut self, id: &str, channel: impl Into<ChannelType>) -> NodeIndex<usize> {
        self.dag.add_node(ModelNode::Factor(FactorNode {
            id: id.to_string(),
            channel: channel.into(),
        }))
    }

    pub fn connect(&mut self, from: NodeIndex<usize>, to: NodeIndex<usize>) -> &mut Self {
        self.dag.add_edge(from, to, ());
        self
    }

    // Checks the structure of the graph, computes the orderings and propagates second moments
    pub fn build(mut self) -> Result<DagModel, InferenceError> {
        debug!(
            "Building model with {} nodes and {} edges",
            self.dag.node_count(),
            self.dag.edge_count()
        );

        let mut ids = HashSet::new();
        for node in self.dag.node_weights().filter(|node| node.is_variable()) {
            if !ids.insert(node.id()) {
                return Err(InferenceError::DuplicateVariable(node.id().to_string()));
            }
        }

        for edge in self.dag.edge_references() {
            let (source, target) = (&self.dag[edge.source()], &self.dag[edge.target()]);
            if source.is_variable() == target.is_variable() {
                return Err(InferenceError::InvalidEdge {
                    from: source.id().to_string(),
                    to: target.id().to_string(),
                });
            }
        }

        let forward_ordering = toposort(&self.dag, None).map_err(|_| InferenceError::NotADag)?;

        for node in self.dag.node_indices() {
            match &self.dag[node] {
                ModelNode::Variable(variable) => {
                    match self.dag.edges_directed(node, Incoming).count() {
                        0 => return Err(InferenceError::MissingParent(variable.id.clone())),
                        1 => {}
                        _ => return Err(InferenceError::MultipleParents(variable.id.clone())),
                    }
                }
                ModelNode::Factor(factor) => self.check_factor(node, factor)?,
            }
        }

        // Propagate second moments from the priors down to the outputs
        for &node in forward_ordering.iter() {
            let ModelNode::Factor(factor) = &self.dag[node] else {
                continue;
            };
            let tau_z: Vec<f64> = ordered_neighbors(&self.dag, node, Incoming)
                .iter()
                .map(|prev| match &self.dag[*prev] {
                    ModelNode::Variable(variable) => variable.tau,
                    ModelNode::Factor(_) => 0.,
                })
                .collect();
            let tau_x = factor
                .channel
                .second_moments(&tau_z)
                .map_err(|error| InferenceError::Factor {
                    factor: factor.id.clone(),
                    error,
                })?;
            let next = ordered_neighbors(&self.dag, node, Outgoing);
            for (next_node, tau) in next.into_iter().zip(tau_x) {
                if let ModelNode::Variable(variable) = &mut self.dag[next_node] {
                    variable.tau = tau;
                }
            }
        }

        let mut backward_ordering = forward_ordering.clone();
        backward_ordering.reverse();
        let variables = self
            .dag
            .node_indices()
            .filter(|node| self.dag[*node].is_variable())
            .collect();

        debug!("Finished construction of model");

        Ok(DagModel {
            dag: self.dag,
            forward_ordering,
            backward_ordering,
            variables,
        })
    }

    // Checks the arity of a factor against its degree, then the shapes of its neighbors
    fn check_factor(&self, node: NodeIndex<usize>, factor: &FactorNode) -> Result<(), InferenceError> {
        let prev = ordered_neighbors(&self.dag, node, Incoming);
        let next = ordered_neighbors(&self.dag, node, Outgoing);
        for (side, expected, found) in [
            ("input", factor.channel.n_prev(), prev.len()),
            ("output", factor.channel.n_next(), next.len()),
        ] {
            if expected != found {
                return Err(InferenceError::ArityMismatch {
                    factor: factor.id.clone(),
                    side,
                    expected,
                    found,
                });
            }
        }

        let prev_shapes: Vec<&[usize]> = prev.iter().map(|node| node_shape(&self.dag, *node)).collect();
        let next_shapes: Vec<&[usize]> = next.iter().map(|node| node_shape(&self.dag, *node)).collect();
        factor
            .channel
            .check_shapes(&prev_shapes, &next_shapes)
            .map_err(|error| InferenceError::Factor {
                factor: factor.id.clone(),
                error,
            })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use crate::channels::{
        convolution_channel::ConvolutionChannel, gaussian_likelihood::GaussianLikelihood,
        gaussian_prior::GaussianPrior, reshape_channel::ReshapeChannel, sum_channel::SumChannel,
    };

    use super::*;

    fn construct_sum_model() -> DagModel {
        let mut builder = DagModelBuilder::new();
        let prior_1 = builder.add_factor("p1", GaussianPrior::new(&[4], 1., 2.));
        let z_1 = builder.add_variable("z1", &[4]);
        let prior_2 = builder.add_factor("p2", GaussianPrior::new(&[4], 0., 0.5));
        let z_2 = builder.add_variable("z2", &[4]);
        let sum = builder.add_factor("sum", SumChannel::new(2));
        let x = builder.add_variable("x", &[4]);
        let reshape = builder.add_factor("reshape", ReshapeChannel::new(&[4], &[2, 2]).unwrap());
        let y = builder.add_variable("y", &[2, 2]);
        builder
            .connect(prior_1, z_1)
            .connect(prior_2, z_2)
            .connect(z_1, sum)
            .connect(z_2, sum)
            .connect(sum, x)
            .connect(x, reshape)
            .connect(reshape, y);
        builder.build().unwrap()
    }

    #[test]
    fn second_moments_are_propagated() {
        let model = construct_sum_model();
        let tau = |id: &str| model.variable(model.find_variable(id).unwrap()).unwrap().tau();
        assert_eq!(tau("z1"), 3.);
        assert_eq!(tau("z2"), 0.5);
        assert_eq!(tau("x"), 3.5);
        assert_eq!(tau("y"), 3.5);
    }

    #[test]
    fn orderings_are_topological() {
        let model = construct_sum_model();
        let position = |node: NodeIndex<usize>| {
            model
                .forward_ordering()
                .iter()
                .position(|other| *other == node)
                .unwrap()
        };
        for edge in model.dag().edge_references() {
            assert!(position(edge.source()) < position(edge.target()));
        }
        let mut backward = model.backward_ordering().to_vec();
        backward.reverse();
        assert_eq!(backward, model.forward_ordering());

        let ids: Vec<&str> = model.variables().iter().map(|v| model.node(*v).id()).collect();
        assert_eq!(ids, vec!["z1", "z2", "x", "y"]);
    }

    #[test]
    fn prev_keeps_insertion_order() {
        let model = construct_sum_model();
        let sum = model
            .dag()
            .node_indices()
            .find(|node| model.node(*node).id() == "sum")
            .unwrap();
        let prev: Vec<&str> = model.prev(sum).iter().map(|v| model.node(*v).id()).collect();
        assert_eq!(prev, vec!["z1", "z2"]);
    }

    #[test]
    fn rejects_cycles() {
        let mut builder = DagModelBuilder::new();
        let a = builder.add_variable("a", &[1]);
        let f = builder.add_factor("f", ReshapeChannel::new(&[1], &[1]).unwrap());
        builder.connect(a, f).connect(f, a);
        assert!(matches!(builder.build(), Err(InferenceError::NotADag)));
    }

    #[test]
    fn rejects_variable_to_variable_edges() {
        let mut builder = DagModelBuilder::new();
        let a = builder.add_variable("a", &[1]);
        let b = builder.add_variable("b", &[1]);
        builder.connect(a, b);
        assert!(matches!(builder.build(), Err(InferenceError::InvalidEdge { .. })));
    }

    #[test]
    fn rejects_arity_mismatch() {
        let mut builder = DagModelBuilder::new();
        let prior = builder.add_factor("p", GaussianPrior::new(&[3], 0., 1.));
        let z = builder.add_variable("z", &[3]);
        let sum = builder.add_factor("sum", SumChannel::new(2));
        let x = builder.add_variable("x", &[3]);
        builder.connect(prior, z).connect(z, sum).connect(sum, x);
        assert!(matches!(
            builder.build(),
            Err(InferenceError::ArityMismatch {
                side: "input",
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn rejects_shape_mismatch() {
        let mut builder = DagModelBuilder::new();
        let prior = builder.add_factor("p", GaussianPrior::new(&[4, 4], 0., 1.));
        let z = builder.add_variable("z", &[4, 4]);
        let grad = builder.add_factor("grad", ConvolutionChannel::gradient(&[4, 4]).unwrap());
        let x = builder.add_variable("x", &[4, 4]);
        let likelihood = builder.add_factor(
            "y",
            GaussianLikelihood::new(ArrayD::zeros(IxDyn(&[4, 4])), 1.),
        );
        builder
            .connect(prior, z)
            .connect(z, grad)
            .connect(grad, x)
            .connect(x, likelihood);
        assert!(matches!(
            builder.build(),
            Err(InferenceError::Factor { factor, .. }) if factor == "grad"
        ));
    }

    #[test]
    fn rejects_variables_without_parent() {
        let mut builder = DagModelBuilder::new();
        let z = builder.add_variable("z", &[2]);
        let reshape = builder.add_factor("reshape", ReshapeChannel::new(&[2], &[2]).unwrap());
        let x = builder.add_variable("x", &[2]);
        builder.connect(z, reshape).connect(reshape, x);
        assert!(matches!(
            builder.build(),
            Err(InferenceError::MissingParent(id)) if id == "z"
        ));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut builder = DagModelBuilder::new();
        builder.add_variable("z", &[1]);
        builder.add_variable("z", &[2]);
        assert!(matches!(
            builder.build(),
            Err(InferenceError::DuplicateVariable(id)) if id == "z"
        ));
    }
}

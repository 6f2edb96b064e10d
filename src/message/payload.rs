use std::{
    collections::{btree_map, BTreeMap},
    fmt::Display,
};

use ndarray::{ArrayD, IxDyn};

use crate::errors::InferenceError;

// A value carried by a message edge or a variable node: a scalar (e.g. a precision `a`,
// a variance `v`, a second moment `tau`) or a dense tensor (e.g. a coefficient `b`, a mean `r`)
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Scalar(f64),
    Array(ArrayD<f64>),
}

impl Tensor {
    // Creates an array tensor of a given shape filled with a constant
    pub fn full(shape: &[usize], value: f64) -> Self {
        Tensor::Array(ArrayD::from_elem(IxDyn(shape), value))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Tensor::Scalar(value) => Some(*value),
            Tensor::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Tensor::Scalar(_) => None,
            Tensor::Array(array) => Some(array),
        }
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Tensor::Scalar(value)
    }
}

impl From<ArrayD<f64>> for Tensor {
    fn from(value: ArrayD<f64>) -> Self {
        Tensor::Array(value)
    }
}

impl Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tensor::Scalar(value) => write!(f, "{}", value),
            Tensor::Array(array) => write!(f, "{}", array),
        }
    }
}

// Named tensors attached to a message edge or a variable node, ordered by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    values: BTreeMap<String, Tensor>,
}

impl Payload {
    pub fn new() -> Self {
        Payload {
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Tensor>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Tensor>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    // Overwrites keys present in `other`, keeps every key that `other` does not mention
    pub fn merge(&mut self, other: Payload) {
        self.values.extend(other.values);
    }

    pub fn scalar(&self, key: &str) -> Result<f64, InferenceError> {
        self.get(key)
            .and_then(Tensor::as_scalar)
            .ok_or_else(|| InferenceError::MissingKey {
                key: key.to_string(),
            })
    }

    pub fn array(&self, key: &str) -> Result<&ArrayD<f64>, InferenceError> {
        self.get(key)
            .and_then(Tensor::as_array)
            .ok_or_else(|| InferenceError::MissingKey {
                key: key.to_string(),
            })
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Tensor> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.values
                .iter()
                .map(|(key, value)| format!("{}: {}", key, value))
                .collect::<Vec<String>>()
                .join(", ")
        )
    }
}

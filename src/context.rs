use std::collections::HashMap;

use crate::{
    error::RealizeError,
    graph::Graph,
    identity::{BufferId, ParamId},
};

pub type TensorData<T = f64> = ndarray::ArrayD<T>;

/// Data bound to the buffers and params of a graph.
#[derive(Debug, Clone)]
pub struct Context<D = f64> {
    pub tensors: HashMap<BufferId, TensorData<D>>,
    pub params: HashMap<ParamId, D>,
}

impl<D> Context<D> {
    pub fn new() -> Self {
        Self {
            tensors: HashMap::new(),
            params: HashMap::new(),
        }
    }

    pub fn insert(&mut self, buffer: BufferId, data: TensorData<D>) -> &mut Self {
        self.tensors.insert(buffer, data);
        self
    }

    pub fn set_param(&mut self, param: ParamId, value: D) -> &mut Self {
        self.params.insert(param, value);
        self
    }

    /// The data of `buffer`, checked against its declared shape.
    pub fn checked_get(&self, graph: &Graph, buffer: BufferId) -> Result<&TensorData<D>, RealizeError> {
        let decl = &graph[buffer];
        let data = self
            .tensors
            .get(&buffer)
            .ok_or_else(|| RealizeError::MissingBuffer {
                name: decl.name().to_string(),
            })?;
        let expected = decl.domain().shape();
        if data.shape() != expected.as_slice() {
            return Err(RealizeError::ShapeMismatch {
                name: decl.name().to_string(),
                expected,
                found: data.shape().to_vec(),
            });
        }
        Ok(data)
    }

    pub fn param(&self, graph: &Graph, param: ParamId) -> Result<&D, RealizeError> {
        self.params
            .get(&param)
            .ok_or_else(|| RealizeError::MissingParam {
                name: graph[param].name().to_string(),
            })
    }
}

impl<D> Default for Context<D> {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail, ensure};
use itertools::{Itertools, MinMaxResult};
use tracing::{debug, trace};

use super::{InferenceRuntime, ProbeObservation};
use crate::{
    graph::{Edge, Graph, NodeId},
    layers::{BindingId, FullyConnectedDescriptor, Layer, OriginsDescriptor, SoftmaxDescriptor},
    tensor::ConstTensor,
};

/// Plain f32 interpreter covering the layers met in calibration networks.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceRuntime;

#[derive(Clone, Debug, PartialEq)]
struct Value {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Value {
    fn from_tensor(tensor: &ConstTensor) -> Result<Self> {
        Ok(Self {
            shape: tensor.shape().to_vec(),
            data: tensor.as_f32()?.to_vec(),
        })
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|x| f(*x)).collect(),
        }
    }
}

impl InferenceRuntime for ReferenceRuntime {
    fn execute(
        &mut self,
        graph: &Graph,
        inputs: &[(BindingId, ConstTensor)],
    ) -> Result<Vec<ProbeObservation>> {
        let order = graph.topological_sort()?;
        let mut values: HashMap<Edge, Value> = HashMap::new();
        let mut observations = Vec::new();
        for id in order {
            let node = graph.node(id)?;
            let outputs = {
                let args = (0..node.num_inputs())
                    .map(|i| {
                        let source = graph.connection(id, i)?;
                        values
                            .get(&source)
                            .ok_or_else(|| anyhow!("no value computed for {source}"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                evaluate(id, node.layer(), &args, inputs, &mut observations)
                    .with_context(|| format!("evaluating {} ({id})", node.label()))?
            };
            for (slot, value) in outputs.into_iter().enumerate() {
                values.insert(Edge::new(id, slot), value);
            }
        }
        debug!("inference done, {} probe observations", observations.len());
        Ok(observations)
    }
}

fn evaluate(
    id: NodeId,
    layer: &Layer,
    args: &[&Value],
    inputs: &[(BindingId, ConstTensor)],
    observations: &mut Vec<ProbeObservation>,
) -> Result<Vec<Value>> {
    let out = match layer {
        Layer::Input(binding) => {
            let (_, tensor) = inputs
                .iter()
                .find(|(b, _)| b == binding)
                .ok_or_else(|| anyhow!("no sample tensor bound to input {binding}"))?;
            Value::from_tensor(tensor)?
        }
        Layer::Output(_) => return Ok(vec![]),
        Layer::Debug(desc) => {
            let arg = args[0];
            match arg.data.iter().copied().minmax_by(|a, b| a.total_cmp(b)) {
                MinMaxResult::NoElements => trace!("probe {id} saw an empty tensor"),
                MinMaxResult::OneElement(v) => observations.push(ProbeObservation {
                    probe: id,
                    observed: desc.observed,
                    min: v,
                    max: v,
                }),
                MinMaxResult::MinMax(min, max) => observations.push(ProbeObservation {
                    probe: id,
                    observed: desc.observed,
                    min,
                    max,
                }),
            }
            arg.clone()
        }
        Layer::Activation(desc) => args[0].map(|x| desc.apply(x)),
        Layer::Addition => elementwise(args[0], args[1], |a, b| a + b)?,
        Layer::Subtraction => elementwise(args[0], args[1], |a, b| a - b)?,
        Layer::Multiplication => elementwise(args[0], args[1], |a, b| a * b)?,
        Layer::Constant(tensor) => Value::from_tensor(tensor)?,
        Layer::Softmax(desc) => softmax(args[0], desc)?,
        Layer::Reshape(desc) => {
            let arg = args[0];
            ensure!(
                desc.target_shape.iter().product::<usize>() == arg.data.len(),
                "cannot reshape {:?} into {:?}",
                arg.shape,
                desc.target_shape
            );
            Value {
                shape: desc.target_shape.clone(),
                data: arg.data.clone(),
            }
        }
        Layer::Concat(desc) => concat(args, desc)?,
        Layer::FullyConnected {
            desc,
            weights,
            bias,
        } => fully_connected(args[0], desc, weights, bias.as_ref())?,
        other => bail!("{} is not supported by the reference runtime", other.kind()),
    };
    Ok(vec![out])
}

/// Equal shapes, or one of the operands holding a single element.
fn elementwise(a: &Value, b: &Value, f: impl Fn(f32, f32) -> f32) -> Result<Value> {
    if a.data.len() == 1 && b.data.len() != 1 {
        return Ok(b.map(|y| f(a.data[0], y)));
    }
    if b.data.len() == 1 {
        return Ok(a.map(|x| f(x, b.data[0])));
    }
    ensure!(
        a.shape == b.shape,
        "shape mismatch: {:?} vs {:?}",
        a.shape,
        b.shape
    );
    Ok(Value {
        shape: a.shape.clone(),
        data: a.data.iter().zip(&b.data).map(|(x, y)| f(*x, *y)).collect(),
    })
}

fn resolve_axis(axis: i32, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 { rank as i32 + axis } else { axis };
    ensure!(
        (0..rank as i32).contains(&resolved),
        "axis {axis} out of range for rank {rank}"
    );
    Ok(resolved as usize)
}

/// Splits `shape` around `axis` into (outer, axis, inner) element counts.
fn split_shape(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    (outer, shape[axis], inner)
}

fn softmax(arg: &Value, desc: &SoftmaxDescriptor) -> Result<Value> {
    let axis = resolve_axis(desc.axis, arg.shape.len())?;
    let (outer, len, inner) = split_shape(&arg.shape, axis);
    let mut data = vec![0.0; arg.data.len()];
    for o in 0..outer {
        for i in 0..inner {
            let index = |k: usize| (o * len + k) * inner + i;
            let max = (0..len)
                .map(|k| arg.data[index(k)])
                .fold(f32::NEG_INFINITY, f32::max);
            let exps = (0..len)
                .map(|k| (desc.beta * (arg.data[index(k)] - max)).exp())
                .collect_vec();
            let sum: f32 = exps.iter().sum();
            for (k, e) in exps.into_iter().enumerate() {
                data[index(k)] = e / sum;
            }
        }
    }
    Ok(Value {
        shape: arg.shape.clone(),
        data,
    })
}

fn concat(args: &[&Value], desc: &OriginsDescriptor) -> Result<Value> {
    let first = args.first().ok_or_else(|| anyhow!("concat without inputs"))?;
    let rank = first.shape.len();
    ensure!(desc.axis < rank, "concat axis {} out of range", desc.axis);
    let mut shape = first.shape.clone();
    shape[desc.axis] = 0;
    for arg in args {
        ensure!(
            arg.shape.len() == rank
                && arg
                    .shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(d, (a, b))| d == desc.axis || a == b),
            "cannot concatenate {:?} with {:?} along axis {}",
            arg.shape,
            first.shape,
            desc.axis
        );
        shape[desc.axis] += arg.shape[desc.axis];
    }
    let (outer, _, _) = split_shape(&first.shape, desc.axis);
    let mut data = Vec::with_capacity(shape.iter().product());
    for o in 0..outer {
        for arg in args {
            let (_, len, inner) = split_shape(&arg.shape, desc.axis);
            let chunk = len * inner;
            data.extend_from_slice(&arg.data[o * chunk..(o + 1) * chunk]);
        }
    }
    Ok(Value { shape, data })
}

fn fully_connected(
    arg: &Value,
    desc: &FullyConnectedDescriptor,
    weights: &ConstTensor,
    bias: Option<&ConstTensor>,
) -> Result<Value> {
    let w = weights.as_f32()?;
    ensure!(
        weights.shape().len() == 2,
        "weights must be a matrix, got {:?}",
        weights.shape()
    );
    let (rows, cols) = (weights.shape()[0], weights.shape()[1]);
    let (in_size, out_size) = if desc.transpose_weight_matrix {
        (cols, rows)
    } else {
        (rows, cols)
    };
    ensure!(
        in_size > 0 && arg.data.len() % in_size == 0,
        "input of {} elements does not fit weights {:?}",
        arg.data.len(),
        weights.shape()
    );
    let bias = bias.map(ConstTensor::as_f32).transpose()?;
    if let Some(b) = bias {
        ensure!(
            b.len() == out_size,
            "bias has {} elements, {out_size} expected",
            b.len()
        );
    }
    let batch = arg.data.len() / in_size;
    let mut data = Vec::with_capacity(batch * out_size);
    for row in arg.data.chunks(in_size) {
        for o in 0..out_size {
            let acc: f32 = row
                .iter()
                .enumerate()
                .map(|(i, x)| {
                    let weight = if desc.transpose_weight_matrix {
                        w[o * in_size + i]
                    } else {
                        w[i * out_size + o]
                    };
                    x * weight
                })
                .sum();
            data.push(acc + bias.map_or(0.0, |b| b[o]));
        }
    }
    Ok(Value {
        shape: vec![batch, out_size],
        data,
    })
}

use itertools::Itertools;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    graph::{Edge, Graph, NodeId},
    layers::{ActivationDescriptor, ActivationFunction, BindingId, Layer},
    tensor::{ConstTensor, DataType, TensorInfo},
};

/// Installs a fmt subscriber driven by `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn relu_layer() -> Layer {
    Layer::Activation(ActivationDescriptor::new(ActivationFunction::ReLu))
}

/// input -> relu -> output, with `[1, 4]` float tensors on both slots.
pub fn relu_chain() -> (Graph, [NodeId; 3]) {
    let mut g = Graph::new();
    let input = g.add_layer(Layer::Input(0), Some("input"));
    let relu = g.add_layer(relu_layer(), Some("relu"));
    let output = g.add_layer(Layer::Output(0), Some("output"));
    g.connect(Edge::new(input, 0), Edge::new(relu, 0)).unwrap();
    g.connect(Edge::new(relu, 0), Edge::new(output, 0)).unwrap();
    let info = TensorInfo::new(vec![1, 4], DataType::Float32);
    g.set_tensor_info(Edge::new(input, 0), info.clone()).unwrap();
    g.set_tensor_info(Edge::new(relu, 0), info).unwrap();
    (g, [input, relu, output])
}

pub fn random_f32_vector(n: usize, seed: u64, low: f32, high: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(low..high)).collect_vec()
}

/// Sample tensor bound to `binding`.
pub fn sample(binding: BindingId, data: Vec<f32>) -> (BindingId, ConstTensor) {
    let len = data.len();
    (binding, ConstTensor::from_f32(vec![len], data).unwrap())
}

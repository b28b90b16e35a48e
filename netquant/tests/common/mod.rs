#![allow(dead_code)]

use netquant::{
    BindingId, ConstTensor, DataType, Edge, Graph, Layer, NodeId, TensorInfo,
    layers::{
        ActivationDescriptor, ActivationFunction, Convolution2dDescriptor, OriginsDescriptor,
        ReshapeDescriptor,
    },
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn float_info() -> TensorInfo {
    TensorInfo::new(vec![1, 2, 2, 1], DataType::Float32)
}

/// in0 + in1 -> output
pub fn addition_network() -> Graph {
    let mut g = Graph::new();
    let in0 = g.add_layer(Layer::Input(0), Some("input0"));
    let in1 = g.add_layer(Layer::Input(1), Some("input1"));
    let add = g.add_layer(Layer::Addition, Some("addition"));
    let output = g.add_layer(Layer::Output(0), Some("output"));
    g.connect(Edge::new(in0, 0), Edge::new(add, 0)).unwrap();
    g.connect(Edge::new(in1, 0), Edge::new(add, 1)).unwrap();
    g.connect(Edge::new(add, 0), Edge::new(output, 0)).unwrap();
    for id in [in0, in1, add] {
        g.set_tensor_info(Edge::new(id, 0), float_info()).unwrap();
    }
    g
}

/// input -> conv -> output, with weights `[-1, 1.5, 2]` and an optional bias.
pub fn convolution_network(bias: Option<Vec<f32>>) -> Graph {
    let mut g = Graph::new();
    let input = g.add_layer(Layer::Input(0), Some("input"));
    let weights = ConstTensor::from_f32(vec![3, 1, 1, 1], vec![-1.0, 1.5, 2.0]).unwrap();
    let bias = bias.map(|b| ConstTensor::from_f32(vec![b.len()], b).unwrap());
    let conv = g.add_layer(
        Layer::Convolution2d {
            desc: Convolution2dDescriptor::default(),
            weights,
            bias,
        },
        Some("conv"),
    );
    let output = g.add_layer(Layer::Output(0), Some("output"));
    g.connect(Edge::new(input, 0), Edge::new(conv, 0)).unwrap();
    g.connect(Edge::new(conv, 0), Edge::new(output, 0)).unwrap();
    g.set_tensor_info(Edge::new(input, 0), float_info()).unwrap();
    g.set_tensor_info(
        Edge::new(conv, 0),
        TensorInfo::new(vec![1, 2, 2, 3], DataType::Float32),
    )
    .unwrap();
    g
}

/// input -> relu1 -> relu2, relu1 -> add.0, relu2 -> add.1, add -> output
pub fn branching_network() -> Graph {
    let relu = || Layer::Activation(ActivationDescriptor::new(ActivationFunction::ReLu));
    let mut g = Graph::new();
    let input = g.add_layer(Layer::Input(0), Some("input"));
    let relu1 = g.add_layer(relu(), Some("relu1"));
    let relu2 = g.add_layer(relu(), Some("relu2"));
    let add = g.add_layer(Layer::Addition, Some("add"));
    let output = g.add_layer(Layer::Output(0), Some("output"));
    g.connect(Edge::new(input, 0), Edge::new(relu1, 0)).unwrap();
    g.connect(Edge::new(relu1, 0), Edge::new(relu2, 0)).unwrap();
    g.connect(Edge::new(relu1, 0), Edge::new(add, 0)).unwrap();
    g.connect(Edge::new(relu2, 0), Edge::new(add, 1)).unwrap();
    g.connect(Edge::new(add, 0), Edge::new(output, 0)).unwrap();
    for id in [input, relu1, relu2, add] {
        g.set_tensor_info(Edge::new(id, 0), float_info()).unwrap();
    }
    g
}

/// input -> reshape -> concat.0, reshape -> relu -> concat.1, concat -> output
pub fn concat_network() -> Graph {
    let mut g = Graph::new();
    let input = g.add_layer(Layer::Input(0), Some("input"));
    let reshape = g.add_layer(
        Layer::Reshape(ReshapeDescriptor {
            target_shape: vec![1, 4],
        }),
        Some("reshape"),
    );
    let relu = g.add_layer(
        Layer::Activation(ActivationDescriptor::new(ActivationFunction::ReLu)),
        Some("relu"),
    );
    let concat = g.add_layer(Layer::Concat(OriginsDescriptor::new(2, 1)), Some("concat"));
    let output = g.add_layer(Layer::Output(0), Some("output"));
    g.connect(Edge::new(input, 0), Edge::new(reshape, 0)).unwrap();
    g.connect(Edge::new(reshape, 0), Edge::new(concat, 0)).unwrap();
    g.connect(Edge::new(reshape, 0), Edge::new(relu, 0)).unwrap();
    g.connect(Edge::new(relu, 0), Edge::new(concat, 1)).unwrap();
    g.connect(Edge::new(concat, 0), Edge::new(output, 0)).unwrap();
    g
}

pub fn node_named(graph: &Graph, name: &str) -> NodeId {
    graph
        .nodes()
        .find(|(_, n)| n.name() == Some(name))
        .map(|(id, _)| id)
        .unwrap_or_else(|| panic!("no layer named {name}"))
}

/// Name of the layer feeding input `index` of `id`.
pub fn source_name(graph: &Graph, id: NodeId, index: usize) -> String {
    let source = graph.connection(id, index).unwrap();
    graph.node(source.node).unwrap().label()
}

pub fn sample(binding: BindingId, data: Vec<f32>) -> (BindingId, ConstTensor) {
    let len = data.len();
    (binding, ConstTensor::from_f32(vec![len], data).unwrap())
}

pub fn assert_params(info: &TensorInfo, data_type: DataType, scale: f32, offset: i32) {
    assert_eq!(info.data_type, data_type);
    assert!(
        (info.quantization_scale - scale).abs() <= scale * 1e-5,
        "scale {} != {scale}",
        info.quantization_scale
    );
    assert_eq!(info.quantization_offset, offset);
}

mod common;

use anyhow::Result;
use common::*;
use netquant::{
    DataType, Edge, LayerKind, NetworkQuantizer, QuantizationError, QuantizerOptions,
    QuantizerState, TensorData,
};
use rstest::rstest;

#[test]
fn test_static_addition() -> Result<()> {
    init_tracing();
    let mut network = addition_network();
    let quantized = NetworkQuantizer::new(&mut network, QuantizerOptions::default())
        .export_network()?;

    for name in ["input0", "input1"] {
        let id = node_named(&quantized, name);
        let info = quantized.tensor_info(Edge::new(id, 0))?;
        assert_params(info, DataType::QAsymmU8, 30.0 / 255.0, 128);
        assert_eq!(info.shape, vec![1, 2, 2, 1]);
    }
    let add = node_named(&quantized, "addition");
    assert_params(
        quantized.tensor_info(Edge::new(add, 0))?,
        DataType::QAsymmU8,
        40.0 / 255.0,
        128,
    );
    Ok(())
}

#[rstest]
#[case(DataType::QAsymmU8, 40.0 / 255.0, 128)]
#[case(DataType::QAsymmS8, 40.0 / 255.0, 0)]
#[case(DataType::QSymmS8, 20.0 / 127.0, 0)]
#[case(DataType::QSymmS16, 20.0 / 32767.0, 0)]
fn test_activation_formats(
    #[case] format: DataType,
    #[case] scale: f32,
    #[case] offset: i32,
) -> Result<()> {
    let mut network = addition_network();
    let quantized =
        NetworkQuantizer::new(&mut network, QuantizerOptions::new(format)).export_network()?;
    let add = node_named(&quantized, "addition");
    assert_params(quantized.tensor_info(Edge::new(add, 0))?, format, scale, offset);
    Ok(())
}

#[test]
fn test_convolution_weights_and_bias() -> Result<()> {
    let mut network = convolution_network(Some(vec![-0.5, 0.25, 1.0]));
    let quantized = NetworkQuantizer::new(&mut network, QuantizerOptions::default())
        .export_network()?;
    let conv = quantized.layer(node_named(&quantized, "conv"))?;

    let weights = conv.weights().unwrap();
    assert_params(weights.info(), DataType::QAsymmU8, 3.0 / 255.0, 85);
    let TensorData::U8(codes) = weights.data() else {
        panic!("weights are not QAsymmU8");
    };
    assert_eq!((codes[0], codes[2]), (0, 255));

    let bias = conv.bias().unwrap();
    let input_scale = 30.0f32 / 255.0;
    let expected = input_scale * weights.info().quantization_scale;
    assert_params(bias.info(), DataType::Signed32, expected, 0);
    let TensorData::I32(values) = bias.data() else {
        panic!("bias is not Signed32");
    };
    let back = values
        .iter()
        .map(|v| *v as f32 * expected)
        .collect::<Vec<_>>();
    for (restored, original) in back.iter().zip([-0.5, 0.25, 1.0]) {
        assert!((restored - original).abs() <= expected);
    }

    let conv_id = node_named(&quantized, "conv");
    assert_params(
        quantized.tensor_info(Edge::new(conv_id, 0))?,
        DataType::QAsymmU8,
        30.0 / 255.0,
        128,
    );
    Ok(())
}

#[test]
fn test_convolution_without_bias() -> Result<()> {
    let mut network = convolution_network(None);
    let quantized = NetworkQuantizer::new(&mut network, QuantizerOptions::default())
        .export_network()?;
    let conv = quantized.layer(node_named(&quantized, "conv"))?;
    assert!(conv.bias().is_none());
    assert_eq!(conv.weights().unwrap().data_type(), DataType::QAsymmU8);
    Ok(())
}

#[test]
fn test_override_input_range() -> Result<()> {
    let mut network = addition_network();
    let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
    quantizer.override_input_range(1, -2.0, 6.0)?;
    // unknown binding, nothing happens
    quantizer.override_input_range(9, -1.0, 1.0)?;
    let quantized = quantizer.export_network()?;

    let in0 = node_named(&quantized, "input0");
    let in1 = node_named(&quantized, "input1");
    assert_params(
        quantized.tensor_info(Edge::new(in0, 0))?,
        DataType::QAsymmU8,
        30.0 / 255.0,
        128,
    );
    assert_params(
        quantized.tensor_info(Edge::new(in1, 0))?,
        DataType::QAsymmU8,
        8.0 / 255.0,
        64,
    );
    Ok(())
}

#[test]
fn test_export_is_idempotent() -> Result<()> {
    let mut network = convolution_network(Some(vec![0.5, 0.5, 0.5]));
    let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
    let first = serde_json::to_string(&quantizer.export_network()?)?;
    let second = serde_json::to_string(&quantizer.export_network()?)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_preserve_type() -> Result<()> {
    let mut network = addition_network();
    let options = QuantizerOptions::default().with_preserve_type(true);
    let quantized = NetworkQuantizer::new(&mut network, options).export_network()?;
    // two Quantize layers and one Dequantize layer around the original four
    assert_eq!(quantized.len(), 7);

    let output = node_named(&quantized, "output");
    assert_eq!(source_name(&quantized, output, 0), "Dequantize");
    let dequantize = quantized.connection(output, 0)?.node;
    assert_eq!(
        quantized.tensor_info(Edge::new(dequantize, 0))?.data_type,
        DataType::Float32
    );
    assert_eq!(source_name(&quantized, dequantize, 0), "addition");

    let add = node_named(&quantized, "addition");
    for index in 0..2 {
        let quantize = quantized.connection(add, index)?.node;
        assert_eq!(quantized.node(quantize)?.kind(), LayerKind::Quantize);
        assert_params(
            quantized.tensor_info(Edge::new(quantize, 0))?,
            DataType::QAsymmU8,
            30.0 / 255.0,
            128,
        );
        let input = quantized.connection(quantize, 0)?;
        assert_eq!(
            quantized.tensor_info(input)?.data_type,
            DataType::Float32,
            "network inputs stay float"
        );
    }
    Ok(())
}

#[test]
fn test_calibration_widens_monotonically() -> Result<()> {
    init_tracing();
    let mut network = addition_network();
    let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
    quantizer.refine(&[
        sample(0, vec![-56.0, 1.0, 2.0, 98.0]),
        sample(1, vec![0.0, 0.0, 0.0, 0.0]),
    ])?;
    quantizer.refine(&[
        sample(0, vec![-77.0, 3.0, 4.0, 65.0]),
        sample(1, vec![0.0, 0.0, 0.0, 0.0]),
    ])?;
    let quantized = quantizer.export_network()?;
    assert_eq!(quantizer.state(), QuantizerState::Done);

    let in0 = node_named(&quantized, "input0");
    let add = node_named(&quantized, "addition");
    for slot in [Edge::new(in0, 0), Edge::new(add, 0)] {
        assert_params(
            quantized.tensor_info(slot)?,
            DataType::QAsymmU8,
            175.0 / 255.0,
            112,
        );
    }
    Ok(())
}

#[test]
fn test_dynamic_export_preserves_connections() -> Result<()> {
    let mut network = branching_network();
    let original = network.clone();
    let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
    quantizer.refine(&[sample(0, vec![-1.0, 0.5, 2.0, 4.0])])?;
    let quantized = quantizer.export_network()?;
    drop(quantizer);

    assert_eq!(network, original);
    assert_eq!(quantized.len(), 5);
    assert!(quantized.debug_layers().is_empty());

    let relu1 = node_named(&quantized, "relu1");
    let relu2 = node_named(&quantized, "relu2");
    let add = node_named(&quantized, "add");
    let output = node_named(&quantized, "output");
    assert_eq!(source_name(&quantized, relu1, 0), "input");
    assert_eq!(source_name(&quantized, relu2, 0), "relu1");
    assert_eq!(source_name(&quantized, add, 0), "relu1");
    assert_eq!(source_name(&quantized, add, 1), "relu2");
    assert_eq!(source_name(&quantized, output, 0), "add");

    // relu outputs peak at 4, the sum at 8
    assert_params(
        quantized.tensor_info(Edge::new(relu1, 0))?,
        DataType::QAsymmU8,
        4.0 / 255.0,
        0,
    );
    assert_params(
        quantized.tensor_info(Edge::new(add, 0))?,
        DataType::QAsymmU8,
        8.0 / 255.0,
        0,
    );
    Ok(())
}

#[test]
fn test_failed_calibration_restores_network() -> Result<()> {
    let mut network = branching_network();
    let original = network.clone();
    let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
    // nothing bound to input 0
    let err = quantizer
        .refine(&[sample(3, vec![1.0, 2.0])])
        .unwrap_err();
    assert!(matches!(err, QuantizationError::RuntimeFailure(_)));
    assert_eq!(quantizer.state(), QuantizerState::Idle);

    // calibration can start over
    quantizer.refine(&[sample(0, vec![1.0, 2.0])])?;
    assert_eq!(quantizer.state(), QuantizerState::Calibrating);
    drop(quantizer);
    assert_eq!(network, original);
    Ok(())
}

#[test]
fn test_options_from_json() -> Result<()> {
    let options: QuantizerOptions =
        serde_json::from_str(r#"{"activation_format":"QSymmS16","default_range":[-4.0,4.0]}"#)?;
    let mut network = addition_network();
    let quantized = NetworkQuantizer::new(&mut network, options).export_network()?;
    let in0 = node_named(&quantized, "input0");
    assert_params(
        quantized.tensor_info(Edge::new(in0, 0))?,
        DataType::QSymmS16,
        4.0 / 32767.0,
        0,
    );
    Ok(())
}

#[test]
fn test_calibration_through_concat_of_forwarded_layer() -> Result<()> {
    let mut network = concat_network();
    let original = network.clone();
    let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
    quantizer.refine(&[sample(0, vec![-2.0, 1.0, 3.0, 5.0])])?;
    let quantized = quantizer.export_network()?;
    drop(quantizer);
    assert_eq!(network, original);

    let reshape = node_named(&quantized, "reshape");
    let relu = node_named(&quantized, "relu");
    let concat = node_named(&quantized, "concat");
    assert_eq!(source_name(&quantized, concat, 0), "reshape");
    assert_eq!(source_name(&quantized, concat, 1), "relu");
    // the reshape follows the input, the concat sees both branches
    for slot in [Edge::new(reshape, 0), Edge::new(concat, 0)] {
        assert_params(
            quantized.tensor_info(slot)?,
            DataType::QAsymmU8,
            7.0 / 255.0,
            73,
        );
    }
    assert_params(
        quantized.tensor_info(Edge::new(relu, 0))?,
        DataType::QAsymmU8,
        5.0 / 255.0,
        0,
    );
    Ok(())
}

#[test]
fn test_repeated_calibration_leaves_network_unchanged() -> Result<()> {
    let mut network = branching_network();
    let original = network.clone();
    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let mut quantizer = NetworkQuantizer::new(&mut network, QuantizerOptions::default());
        quantizer.refine(&[sample(0, vec![-1.0, 0.5, 2.0, 4.0])])?;
        snapshots.push(serde_json::to_string(&quantizer.export_network()?)?);
        drop(quantizer);
        assert_eq!(network, original);
        assert_eq!(
            serde_json::to_string(&network)?,
            serde_json::to_string(&original)?
        );
    }
    assert_eq!(snapshots[0], snapshots[1]);
    Ok(())
}

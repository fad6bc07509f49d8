//! Post-training weight quantization
//!
//! Convolution kernels and dense weight matrices are handed to Burn's quantizer with a
//! symmetric per-tensor int8 scheme (min-max calibrated, f32 scale). Biases and
//! batch-norm vectors stay f32.

use burn::{
    module::Param,
    prelude::*,
    tensor::quantization::{QuantLevel, QuantMode, QuantScheme},
};

use crate::model::LesionClassifier;
use crate::utils::error::{PipelineError, Result, ResultExt};

/// Scheme applied to every weight matrix and kernel
pub fn weight_scheme() -> QuantScheme {
    QuantScheme::default()
        .with_level(QuantLevel::Tensor)
        .with_mode(QuantMode::Symmetric)
}

/// A model whose weight matrices and kernels hold quantized tensors
#[derive(Debug)]
pub struct QuantizedModel<B: Backend> {
    pub model: LesionClassifier<B>,
    /// Names of the quantized parameters, in model order
    pub quantized: Vec<String>,
}

/// Quantize every conv kernel and dense weight of `model`
///
/// Fails with an `Export` error when a weight is empty or holds a non-finite value.
pub fn quantize_model<B: Backend>(mut model: LesionClassifier<B>) -> Result<QuantizedModel<B>> {
    let scheme = weight_scheme();
    let mut quantized = Vec::new();

    for (i, block) in model.backbone.blocks.iter_mut().enumerate() {
        let name = format!("backbone.{}.conv.weight", i);
        block.conv.weight = quantize_weight(&name, &block.conv.weight, &scheme)?;
        quantized.push(name);
    }
    for (i, block) in model.head.blocks.iter_mut().enumerate() {
        let name = format!("head.{}.linear.weight", i);
        block.linear.weight = quantize_weight(&name, &block.linear.weight, &scheme)?;
        quantized.push(name);
    }
    let name = "head.output.weight".to_string();
    model.head.output.weight = quantize_weight(&name, &model.head.output.weight, &scheme)?;
    quantized.push(name);

    Ok(QuantizedModel { model, quantized })
}

/// Quantize one parameter, keeping its id so records stay stable
pub fn quantize_weight<B: Backend, const D: usize>(
    name: &str,
    weight: &Param<Tensor<B, D>>,
    scheme: &QuantScheme,
) -> Result<Param<Tensor<B, D>>> {
    let tensor = weight.val();
    check_quantizable(name, &tensor)?;
    Ok(Param::initialized(weight.id, tensor.quantize_dynamic(scheme)))
}

fn check_quantizable<B: Backend, const D: usize>(name: &str, tensor: &Tensor<B, D>) -> Result<()> {
    if tensor.shape().num_elements() == 0 {
        return Err(PipelineError::Export(format!(
            "tensor {} is empty and cannot be quantized",
            name
        )));
    }

    let values = tensor
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .export(&format!("failed to read tensor {}", name))?;
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(PipelineError::Export(format!(
            "tensor {} holds a non-finite value ({})",
            name, bad
        )));
    }
    Ok(())
}

use anyhow::{anyhow, Result};
use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Linear},
    tensor::{activation::relu, backend::Backend, Tensor, TensorData},
};
use rand::{rngs::StdRng, Rng};

/// Shape of an MLP: input width, hidden widths (possibly none), class count and dropout rate.
#[derive(Clone, Debug, PartialEq)]
pub struct MlpSpec {
    pub input_dim: usize,
    pub hidden: Vec<usize>,
    pub classes: usize,
    pub dropout: f64,
}

/// A fully connected classifier.
///
/// With no hidden layers, dropout is applied to the input before the output projection. With
/// hidden layers, every hidden projection is followed by ReLU and then dropout. Dropout masks
/// are drawn from the caller's seeded RNG, since the candle backend cannot be seeded.
#[derive(burn::module::Module, Debug)]
pub struct MlpClassifier<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> MlpClassifier<B> {
    pub fn init(spec: &MlpSpec, device: &B::Device, rng: &mut StdRng) -> Self {
        let mut hidden = Vec::with_capacity(spec.hidden.len());
        let mut fan_in = spec.input_dim;
        for &width in &spec.hidden {
            hidden.push(linear_from_rng::<B>(rng, device, fan_in, width));
            fan_in = width;
        }
        let output = linear_from_rng::<B>(rng, device, fan_in, spec.classes);
        let dropout = DropoutConfig::new(spec.dropout).init();

        Self {
            hidden,
            output,
            dropout,
        }
    }

    /// Inference pass, without dropout.
    pub fn forward(&self, inputs: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = inputs;
        for layer in &self.hidden {
            x = relu(layer.forward(x));
        }
        self.output.forward(x)
    }

    /// Training pass with inverted dropout.
    pub fn forward_train(&self, inputs: Tensor<B, 2>, rng: &mut StdRng) -> Tensor<B, 2> {
        let mut x = inputs;
        if self.hidden.is_empty() {
            x = self.drop(x, rng);
        }
        for layer in &self.hidden {
            x = self.drop(relu(layer.forward(x)), rng);
        }
        self.output.forward(x)
    }

    fn drop(&self, x: Tensor<B, 2>, rng: &mut StdRng) -> Tensor<B, 2> {
        let prob = self.dropout.prob;
        if prob <= 0.0 {
            return x;
        }
        let dims = x.dims();
        let scale = (1.0 / (1.0 - prob)) as f32;
        let mask: Vec<f32> = (0..dims[0] * dims[1])
            .map(|_| if rng.gen::<f64>() < prob { 0.0 } else { scale })
            .collect();
        let mask = Tensor::<B, 2>::from_floats(TensorData::new(mask, dims), &x.device());
        x * mask
    }

    pub fn hidden_layers(&self) -> usize {
        self.hidden.len()
    }

    /// Flattened weights of the first hidden projection, if the model has one.
    pub fn first_hidden_weights(&self) -> Result<Option<Vec<f32>>> {
        self.hidden.first().map(linear_weights).transpose()
    }

    pub fn output_weights(&self) -> Result<Vec<f32>> {
        linear_weights(&self.output)
    }
}

fn linear_weights<B: Backend>(linear: &Linear<B>) -> Result<Vec<f32>> {
    linear
        .weight
        .val()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| anyhow!("failed to read layer weights: {err:?}"))
}

/// Linear layer with weights and bias drawn uniformly from `±1/sqrt(fan_in)`.
fn linear_from_rng<B: Backend>(
    rng: &mut StdRng,
    device: &B::Device,
    fan_in: usize,
    fan_out: usize,
) -> Linear<B> {
    let limit = (1.0f32 / fan_in as f32).sqrt();
    let weight = random_tensor::<B, 2>(rng, [fan_in, fan_out], limit, device);
    let bias = random_tensor::<B, 1>(rng, [fan_out], limit, device);

    Linear {
        weight: Param::from_tensor(weight),
        bias: Some(Param::from_tensor(bias)),
    }
}

fn random_tensor<B: Backend, const D: usize>(
    rng: &mut StdRng,
    shape: [usize; D],
    limit: f32,
    device: &B::Device,
) -> Tensor<B, D> {
    let total: usize = shape.iter().product();
    let values: Vec<f32> = (0..total)
        .map(|_| rng.gen::<f32>() * 2.0 * limit - limit)
        .collect();

    Tensor::<B, D>::from_floats(TensorData::new(values, shape), device)
}

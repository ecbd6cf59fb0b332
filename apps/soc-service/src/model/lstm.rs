use super::{ModelError, ModelResult};
use crate::ingest::{clamp_soc, Sample};
use ndarray::{s, Array1, Array2};
use serde::Deserialize;
use std::path::Path;

const FEATURES: usize = 3;
const GATES: usize = 4;

#[derive(Debug, Deserialize)]
struct WeightsFile {
    layers: Vec<LayerWeights>,
    head: HeadWeights,
}

#[derive(Debug, Deserialize)]
struct LayerWeights {
    weight_ih: Vec<Vec<f64>>,
    weight_hh: Vec<Vec<f64>>,
    bias_ih: Vec<f64>,
    bias_hh: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct HeadWeights {
    weight: Vec<f64>,
    bias: f64,
}

/// One LSTM layer, gates stacked i, f, g, o. The two bias vectors are pre-summed.
#[derive(Debug)]
struct LstmLayer {
    hidden_size: usize,
    w_ih: Array2<f64>,
    w_hh: Array2<f64>,
    bias: Array1<f64>,
}

impl LstmLayer {
    fn from_weights(index: usize, input_size: usize, raw: LayerWeights) -> ModelResult<Self> {
        let rows = raw.weight_hh.len();
        if rows == 0 || rows % GATES != 0 {
            return Err(ModelError::Shape(format!(
                "layer {index}: weight_hh has {rows} rows, expected a non-zero multiple of {GATES}"
            )));
        }
        let hidden_size = rows / GATES;

        let w_ih = matrix(index, "weight_ih", raw.weight_ih, rows, input_size)?;
        let w_hh = matrix(index, "weight_hh", raw.weight_hh, rows, hidden_size)?;
        for (name, bias) in [("bias_ih", &raw.bias_ih), ("bias_hh", &raw.bias_hh)] {
            if bias.len() != rows {
                return Err(ModelError::Shape(format!(
                    "layer {index}: {name} has {} entries, expected {rows}",
                    bias.len()
                )));
            }
        }
        let bias = Array1::from(raw.bias_ih) + Array1::from(raw.bias_hh);

        Ok(Self {
            hidden_size,
            w_ih,
            w_hh,
            bias,
        })
    }

    fn forward(&self, inputs: &[Array1<f64>]) -> Vec<Array1<f64>> {
        let hidden = self.hidden_size;
        let mut h = Array1::<f64>::zeros(hidden);
        let mut c = Array1::<f64>::zeros(hidden);
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let gates = self.w_ih.dot(x) + self.w_hh.dot(&h) + &self.bias;
            let input = gates.slice(s![..hidden]).mapv(sigmoid);
            let forget = gates.slice(s![hidden..2 * hidden]).mapv(sigmoid);
            let cell = gates.slice(s![2 * hidden..3 * hidden]).mapv(f64::tanh);
            let output = gates.slice(s![3 * hidden..]).mapv(sigmoid);
            c = &forget * &c + &input * &cell;
            h = &output * &c.mapv(f64::tanh);
            outputs.push(h.clone());
        }
        outputs
    }
}

/// Stacked LSTM over `[voltage, current, temperature]` with a linear head on the last
/// step's hidden state.
#[derive(Debug)]
pub struct LstmModel {
    layers: Vec<LstmLayer>,
    head_weight: Array1<f64>,
    head_bias: f64,
}

impl LstmModel {
    pub fn from_file(path: &Path) -> ModelResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ModelResult<Self> {
        let weights: WeightsFile = serde_json::from_str(raw)?;
        if weights.layers.is_empty() {
            return Err(ModelError::Shape("model has no layers".to_string()));
        }

        let mut layers = Vec::with_capacity(weights.layers.len());
        let mut input_size = FEATURES;
        for (index, raw_layer) in weights.layers.into_iter().enumerate() {
            let layer = LstmLayer::from_weights(index, input_size, raw_layer)?;
            input_size = layer.hidden_size;
            layers.push(layer);
        }

        if weights.head.weight.len() != input_size {
            return Err(ModelError::Shape(format!(
                "head weight has {} entries, expected {input_size}",
                weights.head.weight.len()
            )));
        }

        Ok(Self {
            layers,
            head_weight: Array1::from(weights.head.weight),
            head_bias: weights.head.bias,
        })
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn hidden_size(&self) -> usize {
        self.layers.last().map(|l| l.hidden_size).unwrap_or(0)
    }

    pub fn predict(&self, window: &[Sample]) -> ModelResult<f64> {
        if window.is_empty() {
            return Err(ModelError::Inference("empty input window".to_string()));
        }
        let mut sequence: Vec<Array1<f64>> = window
            .iter()
            .map(|s| Array1::from(s.features().to_vec()))
            .collect();
        for layer in &self.layers {
            sequence = layer.forward(&sequence);
        }
        let last = sequence
            .last()
            .ok_or_else(|| ModelError::Inference("network produced no output".to_string()))?;
        let y = self.head_weight.dot(last) + self.head_bias;
        if !y.is_finite() {
            return Err(ModelError::Inference(format!("non-finite output {y}")));
        }
        Ok(clamp_soc(y))
    }
}

/// Build a `rows x cols` matrix from nested JSON rows, rejecting ragged input.
fn matrix(
    index: usize,
    name: &str,
    raw: Vec<Vec<f64>>,
    rows: usize,
    cols: usize,
) -> ModelResult<Array2<f64>> {
    if raw.len() != rows {
        return Err(ModelError::Shape(format!(
            "layer {index}: {name} has {} rows, expected {rows}",
            raw.len()
        )));
    }
    if let Some(row_idx) = raw.iter().position(|row| row.len() != cols) {
        return Err(ModelError::Shape(format!(
            "layer {index}: {name} row {row_idx} has {} columns, expected {cols}",
            raw[row_idx].len()
        )));
    }
    Array2::from_shape_vec((rows, cols), raw.concat())
        .map_err(|err| ModelError::Shape(format!("layer {index}: {name}: {err}")))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

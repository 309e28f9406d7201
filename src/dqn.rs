use anyhow::{Context, Result, anyhow, bail, ensure};
use candle_core::{D, DType, Device, IndexOp, Tensor};
use candle_nn::rnn::{GRU, GRUConfig, GRUState, LSTM, LSTMConfig, LSTMState, RNN};
use candle_nn::{
    Conv2d, Conv2dConfig, Dropout, Embedding, Linear, Module, ModuleT, VarBuilder, VarMap,
};
use serde::Serialize;
use std::path::Path;

use crate::observation::StateHistory;

// =============================================================================
// Model Hyperparameters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    #[value(name = "dqn_ff")]
    DqnFf,
    #[value(name = "dqn_rnn")]
    DqnRnn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Rnn,
    Gru,
    Lstm,
}

/// Embedding of one game variable: values in `0..n_values`, grouped in
/// buckets of `bucket_size`, embedded in `dim` dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VariableEmbedding {
    pub n_values: usize,
    pub dim: usize,
    pub bucket_size: usize,
}

impl VariableEmbedding {
    pub fn n_buckets(&self) -> usize {
        (self.n_values - 1) / self.bucket_size + 1
    }

    /// Embedding row of a raw variable value. Out-of-range values are clamped.
    pub fn bucket(&self, value: i64) -> u32 {
        let clamped = value.clamp(0, self.n_values as i64 - 1);
        (clamped as usize / self.bucket_size) as u32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelConfig {
    pub network_type: NetworkType,
    pub n_fm: usize,
    pub height: usize,
    pub width: usize,
    pub hist_size: usize,
    pub n_actions: usize,
    pub variables: Vec<VariableEmbedding>,
    pub n_features: usize,
    pub hidden_dim: usize,
    pub dueling_network: bool,
    pub dropout: f32,
    pub recurrence: Option<Recurrence>,
    pub n_rec_layers: usize,
    pub remember: bool,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.n_fm > 0, "no feature maps");
        ensure!(self.hist_size >= 1, "history size must be positive");
        ensure!(self.n_actions > 0, "no actions");
        ensure!(self.hidden_dim > 0, "hidden dim must be positive");
        ensure!(
            (0.0..1.0).contains(&self.dropout),
            "dropout must be in [0, 1), got {}",
            self.dropout
        );
        for (i, v) in self.variables.iter().enumerate() {
            ensure!(
                v.n_values >= 1 && v.dim >= 1 && v.bucket_size >= 1,
                "invalid embedding for game variable {i}: {v:?}"
            );
        }
        match (self.network_type, self.recurrence) {
            (NetworkType::DqnRnn, None) => bail!("dqn_rnn needs a recurrence"),
            (NetworkType::DqnFf, Some(r)) => bail!("dqn_ff takes no recurrence, got {r:?}"),
            (NetworkType::DqnRnn, Some(_)) => {
                ensure!(self.n_rec_layers >= 1, "at least one recurrent layer")
            }
            (NetworkType::DqnFf, None) => {}
        }
        Ok(())
    }

    /// Channels seen by the convolutions.
    fn conv_input_channels(&self) -> usize {
        match self.network_type {
            NetworkType::DqnFf => self.hist_size * self.n_fm,
            NetworkType::DqnRnn => self.n_fm,
        }
    }
}

// =============================================================================
// Shared Trunk / Heads
// =============================================================================

/// Conv trunk + variable embeddings + game-feature head + action head.
struct DqnModuleBase {
    conv1: Conv2d,
    conv2: Conv2d,
    conv_output_dim: usize,
    embeddings: Vec<(VariableEmbedding, Embedding)>,
    output_dim: usize,
    dropout: Dropout,
    game_features: Option<(Linear, Linear)>,
    proj_action_scores: Linear,
    proj_state_values: Option<Linear>,
}

fn conv_out(size: usize, kernel: usize, stride: usize) -> Option<usize> {
    size.checked_sub(kernel).map(|s| s / stride + 1)
}

impl DqnModuleBase {
    fn new(vb: VarBuilder, config: &ModelConfig) -> Result<Self> {
        let in_channels = config.conv_input_channels();
        let conv1 = candle_nn::conv2d(
            in_channels,
            32,
            8,
            Conv2dConfig {
                stride: 4,
                ..Default::default()
            },
            vb.pp("conv.0"),
        )?;
        let conv2 = candle_nn::conv2d(
            32,
            64,
            4,
            Conv2dConfig {
                stride: 2,
                ..Default::default()
            },
            vb.pp("conv.2"),
        )?;
        let (h, w) = conv_out(config.height, 8, 4)
            .and_then(|h| conv_out(h, 4, 2))
            .zip(conv_out(config.width, 8, 4).and_then(|w| conv_out(w, 4, 2)))
            .ok_or_else(|| {
                anyhow!(
                    "input {}x{} is too small for the convolutions",
                    config.height,
                    config.width
                )
            })?;
        let conv_output_dim = 64 * h * w;

        let mut embeddings = Vec::with_capacity(config.variables.len());
        for (i, spec) in config.variables.iter().enumerate() {
            let emb = candle_nn::embedding(
                spec.n_buckets(),
                spec.dim,
                vb.pp(format!("game_variable_embeddings.{i}")),
            )?;
            embeddings.push((*spec, emb));
        }
        let output_dim = conv_output_dim + config.variables.iter().map(|v| v.dim).sum::<usize>();

        let game_features = if config.n_features > 0 {
            let fc1 = candle_nn::linear(
                conv_output_dim,
                config.hidden_dim,
                vb.pp("proj_game_features.1"),
            )?;
            let fc2 = candle_nn::linear(
                config.hidden_dim,
                config.n_features,
                vb.pp("proj_game_features.4"),
            )?;
            Some((fc1, fc2))
        } else {
            None
        };

        let proj_action_scores =
            candle_nn::linear(config.hidden_dim, config.n_actions, vb.pp("proj_action_scores"))?;
        let proj_state_values = if config.dueling_network {
            Some(candle_nn::linear(
                config.hidden_dim,
                1,
                vb.pp("proj_state_values"),
            )?)
        } else {
            None
        };

        tracing::info!("Conv layer output dim : {conv_output_dim}");
        tracing::info!("Hidden layer input dim: {output_dim}");

        Ok(Self {
            conv1,
            conv2,
            conv_output_dim,
            embeddings,
            output_dim,
            dropout: Dropout::new(config.dropout),
            game_features,
            proj_action_scores,
            proj_state_values,
        })
    }

    /// `screens`: `(batch, channels, h, w)` raw pixels.
    /// `variables`: `(batch, n_variables)` bucket ids.
    /// Returns the state input `(batch, output_dim)` and the predicted game
    /// features `(batch, n_features)`.
    fn base_forward(
        &self,
        screens: &Tensor,
        variables: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let batch = screens.dim(0)?;
        let x = (screens / 255.0)?;
        let x = self.conv1.forward(&x)?.relu()?;
        let x = self.conv2.forward(&x)?.relu()?;
        let conv_output = x.reshape((batch, self.conv_output_dim))?;

        let output_gf = match &self.game_features {
            Some((fc1, fc2)) => {
                let h = self.dropout.forward_t(&conv_output, train)?;
                let h = fc1.forward(&h)?.relu()?;
                let h = self.dropout.forward_t(&h, train)?;
                Some(candle_nn::ops::sigmoid(&fc2.forward(&h)?)?)
            }
            None => None,
        };

        let output = if self.embeddings.is_empty() {
            conv_output
        } else {
            let variables =
                variables.ok_or_else(|| anyhow!("game variables expected by the network"))?;
            let mut parts = Vec::with_capacity(self.embeddings.len() + 1);
            parts.push(conv_output);
            for (i, (_, emb)) in self.embeddings.iter().enumerate() {
                let ids = variables.i((.., i))?.contiguous()?;
                parts.push(emb.forward(&ids)?);
            }
            Tensor::cat(&parts, 1)?
        };
        let output = self.dropout.forward_t(&output, train)?;
        Ok((output, output_gf))
    }

    fn head_forward(&self, state_input: &Tensor) -> Result<Tensor> {
        let a = self.proj_action_scores.forward(state_input)?;
        match &self.proj_state_values {
            Some(proj_v) => {
                // Q = V + (A - mean(A))
                let v = proj_v.forward(state_input)?;
                let a_mean = a.mean_keepdim(D::Minus1)?;
                Ok(v.broadcast_add(&a.broadcast_sub(&a_mean)?)?)
            }
            None => Ok(a),
        }
    }
}

// =============================================================================
// Recurrent Layers
// =============================================================================

/// Single-layer Elman RNN with tanh activation.
#[derive(Debug, Clone)]
pub struct ElmanRnn {
    w_ih: Linear,
    w_hh: Linear,
    hidden_dim: usize,
    dtype: DType,
    device: Device,
}

impl ElmanRnn {
    pub fn new(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let dtype = vb.dtype();
        let device = vb.device().clone();
        Ok(Self {
            w_ih: candle_nn::linear(in_dim, hidden_dim, vb.pp("ih"))?,
            w_hh: candle_nn::linear(hidden_dim, hidden_dim, vb.pp("hh"))?,
            hidden_dim,
            dtype,
            device,
        })
    }
}

impl RNN for ElmanRnn {
    type State = Tensor;

    fn zero_state(&self, batch_dim: usize) -> candle_core::Result<Tensor> {
        Tensor::zeros((batch_dim, self.hidden_dim), self.dtype, &self.device)
    }

    fn step(&self, input: &Tensor, state: &Tensor) -> candle_core::Result<Tensor> {
        (self.w_ih.forward(input)? + self.w_hh.forward(state)?)?.tanh()
    }

    fn states_to_tensor(&self, states: &[Tensor]) -> candle_core::Result<Tensor> {
        Tensor::stack(states, 1)
    }
}

enum RecurrentLayer {
    Rnn(ElmanRnn),
    Gru(GRU),
    Lstm(LSTM),
}

/// Hidden state carried between calls when the network remembers.
#[derive(Debug, Clone)]
pub enum LayerState {
    Rnn(Tensor),
    Gru(GRUState),
    Lstm(LSTMState),
}

fn run_layer<M: RNN>(
    layer: &M,
    input: &Tensor,
    init: Option<M::State>,
) -> Result<(Tensor, M::State)> {
    let init = match init {
        Some(state) => state,
        None => layer.zero_state(input.dim(0)?)?,
    };
    let states = layer.seq_init(input, &init)?;
    let output = layer.states_to_tensor(&states)?;
    let last = states
        .last()
        .cloned()
        .ok_or_else(|| anyhow!("empty input sequence"))?;
    Ok((output, last))
}

impl RecurrentLayer {
    fn new(kind: Recurrence, in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(match kind {
            Recurrence::Rnn => RecurrentLayer::Rnn(ElmanRnn::new(in_dim, hidden_dim, vb)?),
            Recurrence::Gru => {
                RecurrentLayer::Gru(candle_nn::gru(in_dim, hidden_dim, GRUConfig::default(), vb)?)
            }
            Recurrence::Lstm => RecurrentLayer::Lstm(candle_nn::lstm(
                in_dim,
                hidden_dim,
                LSTMConfig::default(),
                vb,
            )?),
        })
    }

    /// `input`: `(batch, seq, features)` → `(batch, seq, hidden)`.
    fn forward(&self, input: &Tensor, state: Option<LayerState>) -> Result<(Tensor, LayerState)> {
        match (self, state) {
            (RecurrentLayer::Rnn(l), None) => {
                let (out, s) = run_layer(l, input, None)?;
                Ok((out, LayerState::Rnn(s)))
            }
            (RecurrentLayer::Rnn(l), Some(LayerState::Rnn(s))) => {
                let (out, s) = run_layer(l, input, Some(s))?;
                Ok((out, LayerState::Rnn(s)))
            }
            (RecurrentLayer::Gru(l), None) => {
                let (out, s) = run_layer(l, input, None)?;
                Ok((out, LayerState::Gru(s)))
            }
            (RecurrentLayer::Gru(l), Some(LayerState::Gru(s))) => {
                let (out, s) = run_layer(l, input, Some(s))?;
                Ok((out, LayerState::Gru(s)))
            }
            (RecurrentLayer::Lstm(l), None) => {
                let (out, s) = run_layer(l, input, None)?;
                Ok((out, LayerState::Lstm(s)))
            }
            (RecurrentLayer::Lstm(l), Some(LayerState::Lstm(s))) => {
                let (out, s) = run_layer(l, input, Some(s))?;
                Ok((out, LayerState::Lstm(s)))
            }
            _ => bail!("recurrent state does not match the layer type"),
        }
    }
}

// =============================================================================
// Network Variants
// =============================================================================

struct FeedforwardModule {
    base: DqnModuleBase,
    feedforward: Linear,
}

impl FeedforwardModule {
    /// `screens`: `(batch, hist * n_fm, h, w)`; `variables`: newest frame only.
    fn forward(
        &self,
        screens: &Tensor,
        variables: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (state_input, output_gf) = self.base.base_forward(screens, variables, train)?;
        let hidden = candle_nn::ops::sigmoid(&self.feedforward.forward(&state_input)?)?;
        Ok((self.base.head_forward(&hidden)?, output_gf))
    }
}

struct RecurrentModule {
    base: DqnModuleBase,
    layers: Vec<RecurrentLayer>,
    hidden_dim: usize,
}

impl RecurrentModule {
    /// `screens`: `(seq, n_fm, h, w)`, `variables`: `(seq, n_variables)`,
    /// for a batch of one sequence. Scores come out as `(1, seq, n_actions)`.
    fn forward(
        &self,
        screens: &Tensor,
        variables: Option<&Tensor>,
        prev_state: Option<Vec<LayerState>>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>, Vec<LayerState>)> {
        let seq_len = screens.dim(0)?;
        let (state_input, output_gf) = self.base.base_forward(screens, variables, train)?;
        let mut x = state_input.reshape((1, seq_len, self.base.output_dim))?;

        let mut prev = prev_state.map(Vec::into_iter);
        let mut new_state = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let init = prev.as_mut().and_then(Iterator::next);
            let (out, state) = layer.forward(&x, init)?;
            x = out;
            new_state.push(state);
        }

        let x = x.reshape((seq_len, self.hidden_dim))?;
        let n_actions = self.base.proj_action_scores.weight().dim(0)?;
        let scores = self
            .base
            .head_forward(&x)?
            .reshape((1, seq_len, n_actions))?;
        let output_gf = match output_gf {
            Some(gf) => {
                let n_features = gf.dim(1)?;
                Some(gf.reshape((1, seq_len, n_features))?)
            }
            None => None,
        };
        Ok((scores, output_gf, new_state))
    }
}

enum DqnModule {
    Feedforward(FeedforwardModule),
    Recurrent(RecurrentModule),
}

// =============================================================================
// DQN Wrapper
// =============================================================================

/// Inference wrapper around the network: input preparation, recurrent state
/// and weight files.
pub struct Dqn {
    pub varmap: VarMap,
    module: DqnModule,
    config: ModelConfig,
    device: Device,
    prev_state: Option<Vec<LayerState>>,
    pred_features: Option<Vec<f32>>,
}

impl Dqn {
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let base = DqnModuleBase::new(vb.clone(), &config)?;
        let module = match config.recurrence {
            None => {
                let feedforward =
                    candle_nn::linear(base.output_dim, config.hidden_dim, vb.pp("feedforward.0"))?;
                DqnModule::Feedforward(FeedforwardModule { base, feedforward })
            }
            Some(kind) => {
                let mut layers = Vec::with_capacity(config.n_rec_layers);
                for l in 0..config.n_rec_layers {
                    let in_dim = if l == 0 {
                        base.output_dim
                    } else {
                        config.hidden_dim
                    };
                    layers.push(RecurrentLayer::new(
                        kind,
                        in_dim,
                        config.hidden_dim,
                        vb.pp(format!("rnn.{l}")),
                    )?);
                }
                DqnModule::Recurrent(RecurrentModule {
                    base,
                    layers,
                    hidden_dim: config.hidden_dim,
                })
            }
        };

        Ok(Self {
            varmap,
            module,
            config,
            device: device.clone(),
            prev_state: None,
            pred_features: None,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn n_features(&self) -> usize {
        self.config.n_features
    }

    /// Game features predicted for the newest frame by the last `next_action`.
    pub fn pred_features(&self) -> Option<&[f32]> {
        self.pred_features.as_deref()
    }

    pub fn has_recurrent_state(&self) -> bool {
        self.prev_state.is_some()
    }

    /// Forget the recurrent state, e.g. after a respawn.
    pub fn reset(&mut self) {
        self.prev_state = None;
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .load(path)
            .with_context(|| format!("failed to load model weights from {}", path.display()))?;
        tracing::info!("Model loaded from {}", path.display());
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .save(path)
            .with_context(|| format!("failed to save model weights to {}", path.display()))?;
        tracing::info!("Model saved to {}", path.display());
        Ok(())
    }

    /// Screens `(hist, n_fm, h, w)` as f32 and bucketed variables
    /// `(hist, n_variables)` as u32.
    pub fn prepare_f_eval_args(&self, history: &StateHistory) -> Result<(Tensor, Option<Tensor>)> {
        let c = &self.config;
        ensure!(
            history.len() == c.hist_size,
            "history holds {} states, the network expects {}",
            history.len(),
            c.hist_size
        );
        let screen_shape = (c.n_fm, c.height, c.width);
        let mut pixels = Vec::with_capacity(c.hist_size * c.n_fm * c.height * c.width);
        for state in history.iter() {
            ensure!(
                state.screen.shape() == screen_shape,
                "screen shape {:?} does not match {screen_shape:?}",
                state.screen.shape()
            );
            pixels.extend(state.screen.data.iter().map(|&p| p as f32));
        }
        let screens = Tensor::from_vec(pixels, (c.hist_size, c.n_fm, c.height, c.width), &self.device)?;

        if c.variables.is_empty() {
            return Ok((screens, None));
        }
        let mut ids = Vec::with_capacity(c.hist_size * c.variables.len());
        for state in history.iter() {
            ensure!(
                state.variables.len() == c.variables.len(),
                "got {} game variables, expected {}",
                state.variables.len(),
                c.variables.len()
            );
            ids.extend(
                c.variables
                    .iter()
                    .zip(&state.variables)
                    .map(|(spec, &v)| spec.bucket(v)),
            );
        }
        let variables = Tensor::from_vec(ids, (c.hist_size, c.variables.len()), &self.device)?;
        Ok((screens, Some(variables)))
    }

    /// Action scores and predicted game features for `history`.
    ///
    /// Feedforward scores are `(1, n_actions)`; recurrent scores are
    /// `(1, seq, n_actions)` with `seq` 1 when remembering, `hist_size` otherwise.
    pub fn f_eval(&mut self, history: &StateHistory) -> Result<(Tensor, Option<Tensor>)> {
        let (screens, variables) = self.prepare_f_eval_args(history)?;
        let c = &self.config;
        let last = c.hist_size - 1;
        match &self.module {
            DqnModule::Feedforward(m) => {
                let screens =
                    screens.reshape((1, c.hist_size * c.n_fm, c.height, c.width))?;
                let variables = variables.map(|v| v.i(last..)).transpose()?;
                m.forward(&screens, variables.as_ref(), false)
            }
            DqnModule::Recurrent(m) => {
                let (scores, gf, state) = if c.remember {
                    let screens = screens.i(last..)?;
                    let variables = variables.map(|v| v.i(last..)).transpose()?;
                    m.forward(&screens, variables.as_ref(), self.prev_state.take(), false)?
                } else {
                    m.forward(&screens, variables.as_ref(), None, false)?
                };
                if c.remember {
                    self.prev_state = Some(state);
                }
                Ok((scores, gf))
            }
        }
    }

    /// Greedy action for the newest frame of `history`.
    pub fn next_action(&mut self, history: &StateHistory) -> Result<usize> {
        let (scores, pred_features) = self.f_eval(history)?;
        let (scores, pred_features) = match scores.rank() {
            2 => (scores.i(0)?, pred_features.map(|f| f.i(0)).transpose()?),
            3 => {
                let seq_len = scores.dim(1)?;
                (
                    scores.i((0, seq_len - 1))?,
                    pred_features.map(|f| f.i((0, seq_len - 1))).transpose()?,
                )
            }
            r => bail!("unexpected score rank {r}"),
        };
        let action_id = scores.argmax(0)?.to_scalar::<u32>()? as usize;
        self.pred_features = pred_features.map(|f| f.to_vec1::<f32>()).transpose()?;
        Ok(action_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Buffer;
    use crate::observation::ObservedState;

    fn config(network_type: NetworkType, recurrence: Option<Recurrence>) -> ModelConfig {
        ModelConfig {
            network_type,
            n_fm: 3,
            height: 36,
            width: 44,
            hist_size: 3,
            n_actions: 5,
            variables: vec![
                VariableEmbedding {
                    n_values: 101,
                    dim: 4,
                    bucket_size: 10,
                },
                VariableEmbedding {
                    n_values: 301,
                    dim: 4,
                    bucket_size: 1,
                },
            ],
            n_features: 0,
            hidden_dim: 16,
            dueling_network: false,
            dropout: 0.0,
            recurrence,
            n_rec_layers: 1,
            remember: false,
        }
    }

    fn history(c: &ModelConfig, n: usize) -> StateHistory {
        let mut h = StateHistory::new(c.hist_size).unwrap();
        for i in 0..n {
            h.push(ObservedState {
                screen: Buffer::filled(c.n_fm, c.height, c.width, (i * 40) as u8),
                variables: vec![100 - i as i64, 2 * i as i64],
                features: None,
            });
        }
        h
    }

    #[test]
    fn buckets_are_clamped() {
        let v = VariableEmbedding {
            n_values: 101,
            dim: 4,
            bucket_size: 10,
        };
        assert_eq!(v.n_buckets(), 11);
        assert_eq!(v.bucket(-5), 0);
        assert_eq!(v.bucket(55), 5);
        assert_eq!(v.bucket(100), 10);
        assert_eq!(v.bucket(250), 10);
    }

    #[test]
    fn feedforward_scores_one_row() {
        let c = config(NetworkType::DqnFf, None);
        let mut dqn = Dqn::new(c.clone(), &Device::Cpu).unwrap();
        let h = history(&c, 4);
        let (scores, gf) = dqn.f_eval(&h).unwrap();
        assert_eq!(scores.dims(), &[1, 5]);
        assert!(gf.is_none());
        assert!(dqn.next_action(&h).unwrap() < 5);
        assert!(dqn.pred_features().is_none());
    }

    #[test]
    fn recurrent_scores_every_frame_without_memory() {
        for kind in [Recurrence::Rnn, Recurrence::Gru, Recurrence::Lstm] {
            let mut c = config(NetworkType::DqnRnn, Some(kind));
            c.n_rec_layers = 2;
            let mut dqn = Dqn::new(c.clone(), &Device::Cpu).unwrap();
            let h = history(&c, 2);
            let (scores, _) = dqn.f_eval(&h).unwrap();
            assert_eq!(scores.dims(), &[1, 3, 5], "{kind:?}");
            assert!(!dqn.has_recurrent_state());
        }
    }

    #[test]
    fn remembering_network_carries_state() {
        let mut c = config(NetworkType::DqnRnn, Some(Recurrence::Lstm));
        c.remember = true;
        let mut dqn = Dqn::new(c.clone(), &Device::Cpu).unwrap();
        let h = history(&c, 3);
        let (scores, _) = dqn.f_eval(&h).unwrap();
        assert_eq!(scores.dims(), &[1, 1, 5]);
        assert!(dqn.has_recurrent_state());
        dqn.next_action(&h).unwrap();
        dqn.reset();
        assert!(!dqn.has_recurrent_state());
    }

    #[test]
    fn dueling_head_and_game_features() {
        let mut c = config(NetworkType::DqnRnn, Some(Recurrence::Gru));
        c.dueling_network = true;
        c.n_features = 2;
        c.dropout = 0.5;
        let mut dqn = Dqn::new(c.clone(), &Device::Cpu).unwrap();
        let h = history(&c, 1);
        let (_, gf) = dqn.f_eval(&h).unwrap();
        assert_eq!(gf.unwrap().dims(), &[1, 3, 2]);
        dqn.next_action(&h).unwrap();
        let features = dqn.pred_features().unwrap();
        assert_eq!(features.len(), 2);
        assert!(features.iter().all(|&f| f > 0.0 && f < 1.0));
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let c = config(NetworkType::DqnFf, None);
        let mut dqn = Dqn::new(c.clone(), &Device::Cpu).unwrap();
        let mut h = StateHistory::new(c.hist_size).unwrap();
        h.push(ObservedState {
            screen: Buffer::filled(1, c.height, c.width, 0),
            variables: vec![0, 0],
            features: None,
        });
        assert!(dqn.f_eval(&h).is_err());

        let mut h = StateHistory::new(c.hist_size).unwrap();
        h.push(ObservedState {
            screen: Buffer::filled(c.n_fm, c.height, c.width, 0),
            variables: vec![0],
            features: None,
        });
        assert!(dqn.f_eval(&h).is_err());
        assert!(dqn.f_eval(&StateHistory::new(c.hist_size).unwrap()).is_err());
    }

    #[test]
    fn invalid_configs_fail() {
        assert!(Dqn::new(config(NetworkType::DqnRnn, None), &Device::Cpu).is_err());
        assert!(Dqn::new(config(NetworkType::DqnFf, Some(Recurrence::Gru)), &Device::Cpu).is_err());
        let mut c = config(NetworkType::DqnFf, None);
        c.height = 12;
        assert!(Dqn::new(c, &Device::Cpu).is_err());
    }

    #[test]
    fn weights_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let c = config(NetworkType::DqnRnn, Some(Recurrence::Gru));
        let h = history(&c, 3);

        let mut a = Dqn::new(c.clone(), &Device::Cpu).unwrap();
        a.save(&path).unwrap();
        let (sa, _) = a.f_eval(&h).unwrap();

        let mut b = Dqn::new(c, &Device::Cpu).unwrap();
        b.load(&path).unwrap();
        let (sb, _) = b.f_eval(&h).unwrap();
        let diff = (sa - sb).unwrap().abs().unwrap().max_all().unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() < 1e-6);
    }
}

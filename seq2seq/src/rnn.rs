use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{sigmoid, tanh},
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Recurrent unit used by every layer of the encoder and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RnnKind {
    /// Elman network, `h' = tanh(W x + U h)`.
    Rnn,
    Gru,
    Lstm,
}

impl RnnKind {
    /// Number of stacked gate projections the unit needs.
    pub fn gates(&self) -> usize {
        match self {
            RnnKind::Rnn => 1,
            RnnKind::Gru => 3,
            RnnKind::Lstm => 4,
        }
    }

    fn from_gates(gates: usize) -> Self {
        match gates {
            3 => RnnKind::Gru,
            4 => RnnKind::Lstm,
            _ => RnnKind::Rnn,
        }
    }
}

impl std::str::FromStr for RnnKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rnn" => Ok(RnnKind::Rnn),
            "gru" => Ok(RnnKind::Gru),
            "lstm" => Ok(RnnKind::Lstm),
            _ => Err(Error::InvalidConfig(format!("unknown rnn type `{name}`"))),
        }
    }
}

/// State of a single layer for one time step.
#[derive(Debug, Clone)]
pub struct CellState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    /// Only carried by LSTM layers.
    pub cell: Option<Tensor<B, 2>>,
}

/// Hidden state of a whole stack, laid out as `[n_layers, batch_size, hidden_size]`.
#[derive(Debug, Clone)]
pub struct HiddenState<B: Backend> {
    pub hidden: Tensor<B, 3>,
    pub cell: Option<Tensor<B, 3>>,
}

impl<B: Backend> HiddenState<B> {
    pub fn zeros(
        kind: RnnKind,
        n_layers: usize,
        batch_size: usize,
        hidden_size: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = Tensor::zeros([n_layers, batch_size, hidden_size], device);
        let cell = (kind == RnnKind::Lstm).then(|| hidden.clone());

        Self { hidden, cell }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.hidden.dims()
    }

    fn layer(&self, index: usize) -> CellState<B> {
        let take = |tensor: &Tensor<B, 3>| {
            let [_, batch_size, hidden_size] = tensor.dims();
            tensor
                .clone()
                .slice([index..index + 1, 0..batch_size, 0..hidden_size])
                .squeeze::<2>(0)
        };

        CellState {
            hidden: take(&self.hidden),
            cell: self.cell.as_ref().map(take),
        }
    }

    fn from_layers(layers: Vec<CellState<B>>) -> Self {
        let cell = layers
            .iter()
            .map(|state| state.cell.clone().map(|c| c.unsqueeze_dim::<3>(0)))
            .collect::<Option<Vec<_>>>()
            .map(|cells| Tensor::cat(cells, 0));
        let hidden = layers
            .into_iter()
            .map(|state| state.hidden.unsqueeze_dim::<3>(0))
            .collect();

        Self {
            hidden: Tensor::cat(hidden, 0),
            cell,
        }
    }
}

#[derive(Config, Debug)]
pub struct RecurrentCellConfig {
    input_size: usize,
    hidden_size: usize,
    kind: RnnKind,
}

impl RecurrentCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RecurrentCell<B> {
        let gates = self.kind.gates();

        RecurrentCell {
            input: LinearConfig::new(self.input_size, gates * self.hidden_size).init(device),
            hidden: LinearConfig::new(self.hidden_size, gates * self.hidden_size).init(device),
            gates,
            hidden_size: self.hidden_size,
        }
    }
}

/// One recurrent layer. The gate projections of all gates are packed into a
/// single linear layer and sliced apart at every step.
#[derive(Module, Debug)]
pub struct RecurrentCell<B: Backend> {
    input: Linear<B>,
    hidden: Linear<B>,
    gates: usize,
    hidden_size: usize,
}

impl<B: Backend> RecurrentCell<B> {
    pub fn kind(&self) -> RnnKind {
        RnnKind::from_gates(self.gates)
    }

    /// # Shapes
    ///   - Input [batch_size, input_size]
    ///   - State [batch_size, hidden_size]
    pub fn step(&self, input: Tensor<B, 2>, state: CellState<B>) -> CellState<B> {
        let x = self.input.forward(input);
        let h = self.hidden.forward(state.hidden.clone());

        match self.kind() {
            RnnKind::Rnn => CellState {
                hidden: tanh(x + h),
                cell: None,
            },
            RnnKind::Gru => {
                let reset = sigmoid(self.gate(&x, 0) + self.gate(&h, 0));
                let update = sigmoid(self.gate(&x, 1) + self.gate(&h, 1));
                let candidate = tanh(self.gate(&x, 2) + reset * self.gate(&h, 2));
                let keep = update.clone();
                let hidden = update.neg().add_scalar(1.0) * candidate + keep * state.hidden;

                CellState { hidden, cell: None }
            }
            RnnKind::Lstm => {
                let gates = x + h;
                let input_gate = sigmoid(self.gate(&gates, 0));
                let forget_gate = sigmoid(self.gate(&gates, 1));
                let candidate = tanh(self.gate(&gates, 2));
                let output_gate = sigmoid(self.gate(&gates, 3));

                let previous = match state.cell {
                    Some(cell) => cell,
                    None => Tensor::zeros(state.hidden.dims(), &state.hidden.device()),
                };
                let cell = forget_gate * previous + input_gate * candidate;
                let hidden = output_gate * tanh(cell.clone());

                CellState {
                    hidden,
                    cell: Some(cell),
                }
            }
        }
    }

    fn gate(&self, packed: &Tensor<B, 2>, index: usize) -> Tensor<B, 2> {
        let [batch_size, _] = packed.dims();
        let start = index * self.hidden_size;

        packed
            .clone()
            .slice([0..batch_size, start..start + self.hidden_size])
    }
}

#[derive(Config, Debug)]
pub struct RecurrentStackConfig {
    input_size: usize,
    hidden_size: usize,
    n_layers: usize,
    kind: RnnKind,
    #[config(default = "0.0")]
    dropout: f64,
}

impl RecurrentStackConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RecurrentStack<B> {
        let cells = (0..self.n_layers)
            .map(|layer| {
                let input_size = if layer == 0 {
                    self.input_size
                } else {
                    self.hidden_size
                };
                RecurrentCellConfig::new(input_size, self.hidden_size, self.kind).init(device)
            })
            .collect();

        RecurrentStack {
            cells,
            dropout: DropoutConfig::new(self.dropout).init(),
            hidden_size: self.hidden_size,
        }
    }
}

/// Stacked recurrent layers with dropout between them.
#[derive(Module, Debug)]
pub struct RecurrentStack<B: Backend> {
    cells: Vec<RecurrentCell<B>>,
    dropout: Dropout,
    hidden_size: usize,
}

impl<B: Backend> RecurrentStack<B> {
    pub fn kind(&self) -> RnnKind {
        self.cells
            .first()
            .map(RecurrentCell::kind)
            .unwrap_or(RnnKind::Rnn)
    }

    pub fn n_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn init_state(&self, batch_size: usize, device: &B::Device) -> HiddenState<B> {
        HiddenState::zeros(
            self.kind(),
            self.n_layers(),
            batch_size,
            self.hidden_size,
            device,
        )
    }

    /// Advances every layer by one time step.
    ///
    /// # Shapes
    ///   - Input [batch_size, input_size]
    ///   - Output [batch_size, hidden_size], the top layer's hidden state
    pub fn step(&self, input: Tensor<B, 2>, state: HiddenState<B>) -> (Tensor<B, 2>, HiddenState<B>) {
        let last = self.cells.len().saturating_sub(1);
        let mut x = input;
        let mut layers = Vec::with_capacity(self.cells.len());

        for (index, cell) in self.cells.iter().enumerate() {
            let next = cell.step(x, state.layer(index));
            x = if index < last {
                self.dropout.forward(next.hidden.clone())
            } else {
                next.hidden.clone()
            };
            layers.push(next);
        }

        (x, HiddenState::from_layers(layers))
    }
}

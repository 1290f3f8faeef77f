use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
};

use crate::{
    error::{self, Error},
    forcing::TeacherForcing,
    rnn::{HiddenState, RecurrentStack, RecurrentStackConfig, RnnKind},
};

#[derive(Config, Debug)]
pub struct Seq2SeqConfig {
    /// Number of features per time step, shared by inputs and forecasts.
    pub target_size: usize,
    pub hidden_size: usize,
    #[config(default = "1")]
    pub n_layers: usize,
    #[config(default = "RnnKind::Gru")]
    pub rnn_type: RnnKind,
    #[config(default = "0.0")]
    pub dropout: f64,
}

impl Seq2SeqConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.target_size == 0 || self.hidden_size == 0 || self.n_layers == 0 {
            return Err(Error::InvalidConfig(format!(
                "target_size, hidden_size and n_layers must be positive, got {}, {}, {}",
                self.target_size, self.hidden_size, self.n_layers
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    fn stack(&self) -> RecurrentStackConfig {
        RecurrentStackConfig::new(
            self.target_size,
            self.hidden_size,
            self.n_layers,
            self.rnn_type,
        )
        .with_dropout(self.dropout)
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Seq2Seq<B> {
        Seq2Seq {
            encoder: RnnEncoder {
                rnn: self.stack().init(device),
            },
            decoder: RnnDecoder {
                rnn: self.stack().init(device),
                output: LinearConfig::new(self.hidden_size, self.target_size).init(device),
            },
        }
    }
}

/// Compresses an input sequence into a hidden state.
#[derive(Module, Debug)]
pub struct RnnEncoder<B: Backend> {
    rnn: RecurrentStack<B>,
}

impl<B: Backend> RnnEncoder<B> {
    /// # Shapes
    ///   - Input [batch_size, seq_len, target_size]
    ///   - Output [batch_size, seq_len, hidden_size]
    ///   - Hidden [n_layers, batch_size, hidden_size]
    pub fn forward(&self, seqs: Tensor<B, 3>) -> (Tensor<B, 3>, HiddenState<B>) {
        let [batch_size, seq_len, features] = seqs.dims();
        let mut hidden = self.rnn.init_state(batch_size, &seqs.device());
        let mut outputs = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let input = seqs
                .clone()
                .slice([0..batch_size, t..t + 1, 0..features])
                .squeeze::<2>(1);
            let (output, next) = self.rnn.step(input, hidden);
            outputs.push(output.unsqueeze_dim::<3>(1));
            hidden = next;
        }

        (Tensor::cat(outputs, 1), hidden)
    }
}

/// Expands a hidden state one time step at a time.
#[derive(Module, Debug)]
pub struct RnnDecoder<B: Backend> {
    rnn: RecurrentStack<B>,
    output: Linear<B>,
}

impl<B: Backend> RnnDecoder<B> {
    /// # Shapes
    ///   - Input [batch_size, 1, target_size]
    ///   - Output [batch_size, 1, target_size]
    pub fn forward(&self, input: Tensor<B, 3>, hidden: HiddenState<B>) -> (Tensor<B, 3>, HiddenState<B>) {
        let (output, hidden) = self.rnn.step(input.squeeze::<2>(1), hidden);
        let output = self.output.forward(output).unsqueeze_dim::<3>(1);

        (output, hidden)
    }
}

#[derive(Module, Debug)]
pub struct Seq2Seq<B: Backend> {
    encoder: RnnEncoder<B>,
    decoder: RnnDecoder<B>,
}

impl<B: Backend> Seq2Seq<B> {
    /// Autoregressive forecast of `n_step` steps, seeded with the last input step.
    ///
    /// # Shapes
    ///   - Input [batch_size, seq_len, target_size]
    ///   - Output [batch_size, n_step, target_size]
    pub fn forward(&self, enc_seqs: Tensor<B, 3>, n_step: usize) -> Tensor<B, 3> {
        let [batch_size, seq_len, features] = enc_seqs.dims();
        let (_, hidden) = self.encoder.forward(enc_seqs.clone());
        let input = enc_seqs.slice([0..batch_size, seq_len - 1..seq_len, 0..features]);

        self.decode(input, hidden, n_step, |_, output| output)
    }

    /// Decoder pass used for training. When `forcing` fires at step `i` the
    /// next input is the ground-truth decoder input `dec_inputs[:, i]`,
    /// otherwise it is the step's own prediction.
    ///
    /// # Shapes
    ///   - Encoder inputs [batch_size, enc_len, target_size]
    ///   - Decoder inputs [batch_size, dec_len, target_size]
    ///   - Decoder targets [batch_size, dec_len, target_size]
    ///   - Output [batch_size, dec_len, target_size]
    pub fn forward_teacher_forced(
        &self,
        enc_inputs: Tensor<B, 3>,
        dec_inputs: Tensor<B, 3>,
        dec_targets: Tensor<B, 3>,
        forcing: &mut dyn TeacherForcing,
    ) -> Tensor<B, 3> {
        let [batch_size, n_step, features] = dec_targets.dims();
        let (_, hidden) = self.encoder.forward(enc_inputs);
        let input = dec_inputs.clone().slice([0..batch_size, 0..1, 0..features]);

        self.decode(input, hidden, n_step, |step, output| {
            if forcing.use_ground_truth(step) {
                dec_inputs
                    .clone()
                    .slice([0..batch_size, step..step + 1, 0..features])
            } else {
                output
            }
        })
    }

    fn decode<F>(&self, input: Tensor<B, 3>, hidden: HiddenState<B>, n_step: usize, mut next_input: F) -> Tensor<B, 3>
    where
        F: FnMut(usize, Tensor<B, 3>) -> Tensor<B, 3>,
    {
        if n_step == 0 {
            let [batch_size, _, features] = input.dims();
            return Tensor::zeros([batch_size, 0, features], &input.device());
        }

        let shape = hidden.dims();
        let mut input = input;
        let mut hidden = hidden;
        let mut outputs = Vec::with_capacity(n_step);

        for step in 0..n_step {
            let (output, next) = self.decoder.forward(input, hidden);
            debug_assert_eq!(next.dims(), shape, "decoder changed the hidden state shape");
            outputs.push(output.clone());
            input = next_input(step, output);
            hidden = next;
        }

        Tensor::cat(outputs, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forcing::{Always, Never, Presampled};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn config(kind: RnnKind) -> Seq2SeqConfig {
        Seq2SeqConfig::new(2, 8).with_n_layers(2).with_rnn_type(kind)
    }

    fn series(batch_size: usize, len: usize, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 3> {
        let values: Vec<f32> = (0..batch_size * len * 2)
            .map(|i| (i as f32 * 0.37).sin())
            .collect();
        Tensor::from_data(Data::new(values, Shape::new([batch_size, len, 2])).convert(), device)
    }

    fn max_abs_diff(a: Tensor<TestBackend, 3>, b: Tensor<TestBackend, 3>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn forward_returns_requested_steps() {
        let device = Default::default();
        for kind in [RnnKind::Rnn, RnnKind::Gru, RnnKind::Lstm] {
            let model = config(kind).init::<TestBackend>(&device);
            for n_step in [1, 4, 9] {
                let output = model.forward(series(3, 6, &device), n_step);
                assert_eq!(output.dims(), [3, n_step, 2]);
            }
        }
    }

    #[test]
    fn never_forcing_matches_forward() {
        let device = Default::default();
        let model = config(RnnKind::Lstm).init::<TestBackend>(&device);
        let enc = series(2, 5, &device);
        // Decoder inputs start with the last encoder step, as windowed data does.
        let dec_inputs = enc.clone().slice([0..2, 4..5, 0..2]);
        let targets = series(2, 4, &device);

        let predicted = model.forward(enc.clone(), 4);
        let trained = model.forward_teacher_forced(enc, dec_inputs, targets, &mut Never);

        assert!(max_abs_diff(predicted, trained) < 1e-6);
    }

    #[test]
    fn always_forcing_runs_on_ground_truth_only() {
        let device = Default::default();
        let model = config(RnnKind::Gru).init::<TestBackend>(&device);
        let enc = series(2, 5, &device);
        let dec_inputs = series(2, 3, &device);
        let targets = dec_inputs.clone().mul_scalar(-1.0);

        let trained =
            model.forward_teacher_forced(enc.clone(), dec_inputs.clone(), targets, &mut Always);

        // A forced step `i` feeds `dec_inputs[:, i]` to step `i + 1`.
        let (_, mut hidden) = model.encoder.forward(enc);
        let inputs = [
            dec_inputs.clone().slice([0..2, 0..1, 0..2]),
            dec_inputs.clone().slice([0..2, 0..1, 0..2]),
            dec_inputs.slice([0..2, 1..2, 0..2]),
        ];
        let mut expected = Vec::new();
        for input in inputs {
            let (output, next) = model.decoder.forward(input, hidden);
            expected.push(output);
            hidden = next;
        }

        assert!(max_abs_diff(Tensor::cat(expected, 1), trained) < 1e-6);
    }

    #[test]
    fn forced_steps_follow_decoder_inputs_not_targets() {
        let device = Default::default();
        let model = config(RnnKind::Lstm).init::<TestBackend>(&device);
        let enc = series(1, 4, &device);
        let dec_inputs = Tensor::<TestBackend, 3>::from_data(
            Data::new(vec![0.3, 0.3, 5.0, 5.0, -5.0, -5.0], Shape::new([1, 3, 2])).convert(),
            &device,
        );
        let targets = Tensor::<TestBackend, 3>::from_data(
            Data::new(vec![0.4, 0.4, 0.5, 0.5, 0.6, 0.6], Shape::new([1, 3, 2])).convert(),
            &device,
        );
        let shifted = Tensor::cat(
            vec![
                dec_inputs.clone().slice([0..1, 0..1, 0..2]),
                targets.clone().slice([0..1, 0..2, 0..2]),
            ],
            1,
        );

        let forced = model.forward_teacher_forced(enc.clone(), dec_inputs, targets.clone(), &mut Always);
        let other = model.forward_teacher_forced(enc, shifted, targets, &mut Always);

        assert_eq!(forced.dims(), [1, 3, 2]);
        // Same first input, so the first step agrees; later steps saw different inputs.
        let head = |t: Tensor<TestBackend, 3>| t.slice([0..1, 0..1, 0..2]);
        assert!(max_abs_diff(head(forced.clone()), head(other.clone())) < 1e-6);
        assert!(max_abs_diff(forced, other) > 1e-4);
    }

    #[test]
    fn mixed_forcing_differs_from_free_running() {
        let device = Default::default();
        let model = config(RnnKind::Rnn).init::<TestBackend>(&device);
        let enc = series(1, 4, &device);
        let first = enc.clone().slice([0..1, 3..4, 0..2]);
        let dec_inputs = Tensor::cat(vec![first, series(1, 2, &device).mul_scalar(10.0)], 1);
        let targets = series(1, 3, &device);

        let free = model.forward(enc.clone(), 3);
        let mut policy = Presampled::new(vec![false, true, false]);
        let forced = model.forward_teacher_forced(enc, dec_inputs, targets, &mut policy);

        // The first two steps are shared, the last one follows a forced input.
        let head = |t: Tensor<TestBackend, 3>| t.slice([0..1, 0..2, 0..2]);
        assert!(max_abs_diff(head(free.clone()), head(forced.clone())) < 1e-6);
        assert!(max_abs_diff(free, forced) > 1e-6);
    }

    #[test]
    fn zero_steps_yield_an_empty_forecast() {
        let device = Default::default();
        let model = config(RnnKind::Gru).init::<TestBackend>(&device);

        let output = model.forward(series(2, 5, &device), 0);
        assert_eq!(output.dims(), [2, 0, 2]);
    }

    #[test]
    fn hidden_shape_is_stable_across_decoder_steps() {
        let device = Default::default();
        let model = config(RnnKind::Lstm).init::<TestBackend>(&device);
        let enc = series(3, 5, &device);
        let (_, mut hidden) = model.encoder.forward(enc.clone());
        let shape = hidden.dims();
        assert_eq!(shape, [2, 3, 8]);

        let mut input = enc.slice([0..3, 4..5, 0..2]);
        for _ in 0..5 {
            let (output, next) = model.decoder.forward(input, hidden);
            assert_eq!(next.dims(), shape);
            assert_eq!(next.cell.as_ref().map(|c| c.dims()), Some(shape));
            input = output;
            hidden = next;
        }
    }

    #[test]
    fn rejects_empty_sizes() {
        assert!(Seq2SeqConfig::new(0, 8).validate().is_err());
        assert!(Seq2SeqConfig::new(1, 8).with_n_layers(0).validate().is_err());
        assert!(Seq2SeqConfig::new(1, 8).with_dropout(1.0).validate().is_err());
        assert!(Seq2SeqConfig::new(1, 8).validate().is_ok());
    }
}

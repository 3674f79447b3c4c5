//! The per-round training computation of one party.
//!
//! The model is a logistic regression over the union of both parties'
//! feature columns, fitted with the usual second-order approximation of the
//! sigmoid so that every cross-party term is linear in values one party can
//! encrypt and the other can scale. With `u_P(i) = w_P · x_P(i)` and
//! `t_i = y_i - 0.5`, each party publishes three per-sample series under its
//! own Paillier key:
//!
//! - residual share: `0.25 * u_P(i)` (plus `0.5 - y_i` for the label owner),
//! - cost constant: `u_P(i)^2 / 8` (plus `ln 2 - t_i * u_P(i)` for the
//!   label owner),
//! - cost linear: `u_P(i) / 4` (minus `t_i` for the label owner).
//!
//! Combining the peer's series with the locally known factors yields this
//! party's full gradient and cost as ciphertexts only the peer can open;
//! the peer decrypts them and hands the plaintexts back. Decrypted values
//! carry twice the fixed-point scale, since they are sums of products of
//! two encoded factors.

use std::f64::consts::LN_2;

use num::{bigint::BigInt, traits::identities::Zero};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use tandem_core::{
    common::{TrainModel, TrainParams},
    crypto::{Ciphertext, PaillierKeyPair, PaillierPublicKey},
    fixed,
};

use crate::{
    error::Error,
    parts::{self, EncryptedParts},
};

/// The training sub-state of a learner. All transitions run under the
/// learner's lock.
pub(crate) struct Process {
    address: String,
    params: TrainParams,
    keys: PaillierKeyPair,
    peer_pub: Option<PaillierPublicKey>,
    prng: ChaCha20Rng,
    data: Option<TrainingData>,
    weights: Vec<f64>,
    round: RoundState,
    prev_cost: Option<f64>,
    /// This party's stop decision for the current round.
    stopped: Option<bool>,
    /// The peer's stop decision for the current round.
    other_stopped: Option<bool>,
}

struct TrainingData {
    feature_names: Vec<String>,
    /// Row-major feature matrix in intersection order. The label owner
    /// carries a trailing intercept column of ones.
    features: Vec<Vec<f64>>,
    labels: Option<Vec<f64>>,
}

/// Slots of one training round. Every slot is written at most once per
/// round, which keeps duplicate deliveries harmless.
#[derive(Default)]
struct RoundState {
    round: u64,
    local: Option<LocalPart>,
    local_emitted: bool,
    /// The peer's encrypted series for this round.
    peer_parts: Option<(u64, EncryptedParts)>,
    /// The peer's series for the next round, when it runs one round ahead.
    peer_parts_ahead: Option<(u64, EncryptedParts)>,
    enc_sent: bool,
    enc_from_other: Option<(Vec<Ciphertext>, Ciphertext)>,
    dec_sent: bool,
    plain_from_other: Option<(Vec<BigInt>, BigInt)>,
}

/// The locally derivable factors of the current round, kept in plaintext
/// for folding into the peer-keyed ciphertexts.
struct LocalPart {
    u: Vec<f64>,
    share: Vec<f64>,
    cost_const: Vec<f64>,
}

impl Process {
    pub fn new(address: &str, keys: PaillierKeyPair, params: TrainParams) -> Self {
        Self {
            address: address.to_string(),
            params,
            keys,
            peer_pub: None,
            prng: ChaCha20Rng::from_entropy(),
            data: None,
            weights: Vec::new(),
            round: RoundState::default(),
            prev_cost: None,
            stopped: None,
            other_stopped: None,
        }
    }

    /// Parses the aligned rows produced by the set intersection into the
    /// feature matrix and, for the label owner, the label vector.
    pub fn init(&mut self, aligned_rows: &[Vec<String>]) -> Result<(), Error> {
        if aligned_rows.len() < 2 {
            return Err(Error::internal("no aligned samples to train on"));
        }
        let header = &aligned_rows[0];
        let id_index = header
            .iter()
            .position(|column| column == &self.params.id_name)
            .ok_or_else(|| Error::MissingColumn(self.params.id_name.clone()))?;
        let label_index = if self.params.has_labels() {
            let index = header
                .iter()
                .position(|column| column == &self.params.label_name)
                .ok_or_else(|| Error::MissingColumn(self.params.label_name.clone()))?;
            Some(index)
        } else {
            None
        };

        let feature_names: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != id_index && Some(*index) != label_index)
            .map(|(_, name)| name.clone())
            .collect();

        let mut features = Vec::with_capacity(aligned_rows.len() - 1);
        let mut labels = label_index.map(|_| Vec::with_capacity(aligned_rows.len() - 1));
        for row in &aligned_rows[1..] {
            if row.len() != header.len() {
                return Err(Error::ShapeMismatch {
                    expected: header.len(),
                    actual: row.len(),
                });
            }
            let mut sample = Vec::with_capacity(feature_names.len() + 1);
            for (index, value) in row.iter().enumerate() {
                if index == id_index {
                    continue;
                }
                let value: f64 = value
                    .parse()
                    .map_err(|_| Error::InvalidSample(value.clone()))?;
                if Some(index) == label_index {
                    // the labels vector exists whenever label_index does
                    labels.as_mut().unwrap().push(value);
                } else {
                    sample.push(value);
                }
            }
            if labels.is_some() {
                sample.push(1.0); // intercept
            }
            features.push(sample);
        }

        self.weights = vec![0.0; features[0].len()];
        self.data = Some(TrainingData {
            feature_names,
            features,
            labels,
        });
        Ok(())
    }

    /// Stores the peer's homomorphic public key.
    pub fn set_homo_pub_of_other(&mut self, key: &[u8]) -> Result<(), Error> {
        self.peer_pub = Some(PaillierPublicKey::from_slice(key)?);
        Ok(())
    }

    /// Enters round `round`: clears the round-scoped slots, promoting the
    /// peer's early-arrived series when it matches the new round.
    pub fn up_round(&mut self, round: u64) {
        let slots = [self.round.peer_parts.take(), self.round.peer_parts_ahead.take()];
        let mut state = RoundState {
            round,
            ..RoundState::default()
        };
        for slot in slots {
            if let Some((slot_round, slot_parts)) = slot {
                if slot_round == round {
                    state.peer_parts = Some((slot_round, slot_parts));
                } else if slot_round > round {
                    state.peer_parts_ahead = Some((slot_round, slot_parts));
                }
                // stale series are dropped
            }
        }
        self.round = state;
        self.stopped = None;
        self.other_stopped = None;
    }

    /// Computes this round's local series, encrypts them under our own key
    /// and returns the serialized part bytes for the peer. Returns `None`
    /// when the series were already emitted this round.
    pub fn cal_local_gradient_and_cost(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if self.round.local_emitted {
            return Ok(None);
        }
        let batch = self.batch_rows()?;
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| Error::internal("training process not initialized"))?;

        let mut u = Vec::with_capacity(batch.len());
        let mut share = Vec::with_capacity(batch.len());
        let mut cost_const = Vec::with_capacity(batch.len());
        let mut cost_lin = Vec::with_capacity(batch.len());
        for &row in &batch {
            let ui = dot(&self.weights, &data.features[row]);
            match &data.labels {
                Some(labels) => {
                    let t = labels[row] - 0.5;
                    share.push(0.25 * ui + 0.5 - labels[row]);
                    cost_const.push(LN_2 - t * ui + ui * ui / 8.0);
                    cost_lin.push(0.25 * ui - t);
                }
                None => {
                    share.push(0.25 * ui);
                    cost_const.push(ui * ui / 8.0);
                    cost_lin.push(0.25 * ui);
                }
            }
            u.push(ui);
        }

        let precision = self.params.precision;
        let encrypted = EncryptedParts {
            share: encrypt_series(&self.keys.public, &mut self.prng, &share, precision)?,
            cost_const: encrypt_series(&self.keys.public, &mut self.prng, &cost_const, precision)?,
            cost_lin: encrypt_series(&self.keys.public, &mut self.prng, &cost_lin, precision)?,
        };
        self.round.local = Some(LocalPart {
            u,
            share,
            cost_const,
        });
        self.round.local_emitted = true;
        Ok(Some(parts::encode_parts(&encrypted)))
    }

    /// Stores the peer's encrypted series for `round`, which is either the
    /// current round or the next one.
    pub fn set_part_bytes_from_other(&mut self, bytes: &[u8], round: u64) -> Result<(), Error> {
        let decoded = parts::decode_parts(bytes)?;
        if round == self.round.round {
            self.round.peer_parts = Some((round, decoded));
        } else {
            self.round.peer_parts_ahead = Some((round, decoded));
        }
        Ok(())
    }

    /// Folds the peer's series into this party's encrypted gradient and
    /// cost, both under the peer's key. Returns `None` while our own series
    /// or the peer's are still missing, or once already computed this round.
    pub fn cal_enc_gradient_and_cost(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        if self.round.enc_sent {
            return Ok(None);
        }
        if self.round.local.is_none() || self.round.peer_parts.is_none() {
            return Ok(None);
        }
        let batch = self.batch_rows()?;
        // both checked non-empty above
        let local = self.round.local.as_ref().unwrap();
        let peer_parts = &self.round.peer_parts.as_ref().unwrap().1;
        let peer_pub = self.peer_pub.as_ref().ok_or(Error::KeysNotExchanged)?;
        // init() ran before the local series could exist
        let data = self.data.as_ref().unwrap();
        if peer_parts.share.len() != batch.len() {
            return Err(Error::ShapeMismatch {
                expected: batch.len(),
                actual: peer_parts.share.len(),
            });
        }

        let precision = self.params.precision;
        let prng = &mut self.prng;

        // full residuals d_i = share_peer(i) + share_ours(i), under the peer's key
        let mut residuals = Vec::with_capacity(batch.len());
        for i in 0..batch.len() {
            let own = encode(local.share[i], precision)?;
            let enc_own = peer_pub.encrypt(&own, prng)?;
            residuals.push(peer_pub.add(&peer_parts.share[i], &enc_own));
        }

        // gradient_j = sum_i d_i * x_ij
        let width = self.weights.len();
        let mut gradient = Vec::with_capacity(width);
        for j in 0..width {
            let mut acc = peer_pub.encrypt(&BigInt::zero(), prng)?;
            for (i, &row) in batch.iter().enumerate() {
                let xij = encode(data.features[row][j], precision)?;
                acc = peer_pub.add(&acc, &peer_pub.mul_plain(&residuals[i], &xij));
            }
            gradient.push(acc);
        }

        // cost = sum_i cc_peer(i) + cl_peer(i) * coeff_i + cc_ours(i),
        // everything at twice the fixed-point scale
        let scale = fixed::scale(precision);
        let mut cost = peer_pub.encrypt(&BigInt::zero(), prng)?;
        for (i, &row) in batch.iter().enumerate() {
            let coeff = match &data.labels {
                Some(labels) => local.u[i] - 4.0 * (labels[row] - 0.5),
                None => local.u[i],
            };
            let own = peer_pub.encrypt(&encode(local.cost_const[i], 2 * precision)?, prng)?;
            cost = peer_pub.add(&cost, &peer_pub.mul_plain(&peer_parts.cost_const[i], &scale));
            cost = peer_pub.add(
                &cost,
                &peer_pub.mul_plain(&peer_parts.cost_lin[i], &encode(coeff, precision)?),
            );
            cost = peer_pub.add(&cost, &own);
        }

        self.round.enc_sent = true;
        Ok(Some((parts::encode_ct_list(&gradient), cost.to_bytes())))
    }

    /// Stores the peer's encrypted gradient and cost, which only we can
    /// open. Returns `true` on first arrival.
    pub fn set_enc_gradient_and_cost_from_other(
        &mut self,
        enc_grad: &[u8],
        enc_cost: &[u8],
    ) -> Result<bool, Error> {
        if self.round.enc_from_other.is_some() {
            return Ok(false);
        }
        let gradient = parts::decode_ct_list(enc_grad)?;
        let cost = Ciphertext::from_slice(enc_cost)?;
        self.round.enc_from_other = Some((gradient, cost));
        Ok(true)
    }

    /// Decrypts the peer's gradient and cost for it. Returns `None` while
    /// the peer's ciphertexts are missing, or once already decrypted.
    pub fn dec_gradient_and_cost(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        if self.round.dec_sent {
            return Ok(None);
        }
        let (gradient, cost) = match &self.round.enc_from_other {
            Some(stored) => stored,
            None => return Ok(None),
        };
        let gradient: Vec<BigInt> = gradient.iter().map(|c| self.keys.secret.decrypt(c)).collect();
        let cost = self.keys.secret.decrypt(cost);
        self.round.dec_sent = true;
        Ok(Some((
            parts::encode_int_list(&gradient),
            cost.to_signed_bytes_be(),
        )))
    }

    /// Accepts the peer's decryption of our ciphertexts. Returns `true` on
    /// first arrival.
    pub fn set_gradient_and_cost_from_other(
        &mut self,
        grad_bytes: &[u8],
        cost_bytes: &[u8],
    ) -> Result<bool, Error> {
        if self.round.plain_from_other.is_some() {
            return Ok(false);
        }
        let gradient = parts::decode_int_list(grad_bytes)?;
        let cost = BigInt::from_signed_bytes_be(cost_bytes);
        self.round.plain_from_other = Some((gradient, cost));
        Ok(true)
    }

    /// Applies this round's gradient, updates the cost history and decides
    /// whether this party wants to stop.
    pub fn update_cost_and_gradient(&mut self) -> Result<bool, Error> {
        if let Some(stopped) = self.stopped {
            return Ok(stopped);
        }
        let batch_len = self.batch_rows()?.len() as f64;
        let (gradient, cost_int) = self
            .round
            .plain_from_other
            .take()
            .ok_or_else(|| Error::internal("gradient pieces not received for this round"))?;
        if gradient.len() != self.weights.len() {
            return Err(Error::ShapeMismatch {
                expected: self.weights.len(),
                actual: gradient.len(),
            });
        }

        let double_precision = 2 * self.params.precision;
        let lambda = self.params.regularization;
        let mut cost = fixed::decode(&cost_int, double_precision) / batch_len;
        cost += 0.5 * lambda * self.weights.iter().map(|w| w * w).sum::<f64>();

        for (weight, piece) in self.weights.iter_mut().zip(&gradient) {
            let gradient = fixed::decode(piece, double_precision) / batch_len + lambda * *weight;
            *weight -= self.params.learning_rate * gradient;
        }

        let converged = self
            .prev_cost
            .map_or(false, |prev| (prev - cost).abs() < self.params.tolerance);
        let exhausted = self.round.round + 1 >= self.params.max_rounds;
        let stopped = converged || exhausted;
        debug!(
            party = %self.address,
            round = self.round.round,
            cost,
            stopped,
            "applied round gradient"
        );
        self.prev_cost = Some(cost);
        self.stopped = Some(stopped);
        Ok(stopped)
    }

    /// Records the peer's stop decision for the current round.
    pub fn set_other_status(&mut self, stopped: bool) {
        self.other_stopped = Some(stopped);
    }

    /// Whether both stop decisions are in, and if so whether both parties
    /// agreed to stop.
    pub fn stop(&self) -> (bool, bool) {
        match (self.stopped, self.other_stopped) {
            (Some(local), Some(other)) => (true, local && other),
            _ => (false, false),
        }
    }

    /// Emits the local portion of the trained model.
    pub fn get_train_models(&self) -> Result<TrainModel, Error> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| Error::internal("training process not initialized"))?;
        Ok(TrainModel {
            party: self.address.clone(),
            feature_names: data.feature_names.clone(),
            weights: self.weights.clone(),
            rounds: self.round.round + 1,
            params: self.params.clone(),
        })
    }

    /// The deterministic row slice of the current round. Both parties
    /// derive the same slice from the shared round counter, so batches
    /// never need coordination.
    fn batch_rows(&self) -> Result<Vec<usize>, Error> {
        let rows = self
            .data
            .as_ref()
            .ok_or_else(|| Error::internal("training process not initialized"))?
            .features
            .len();
        let size = self.params.batch_size;
        if size == 0 || size >= rows {
            Ok((0..rows).collect())
        } else {
            let offset = self.round.round as usize * size;
            Ok((0..size).map(|j| (offset + j) % rows).collect())
        }
    }

    #[cfg(test)]
    pub fn cost(&self) -> Option<f64> {
        self.prev_cost
    }

    #[cfg(test)]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

fn dot(weights: &[f64], features: &[f64]) -> f64 {
    weights.iter().zip(features).map(|(w, x)| w * x).sum()
}

fn encode(value: f64, precision: u32) -> Result<BigInt, Error> {
    fixed::encode(value, precision)
        .ok_or_else(|| Error::internal("non-finite value in round computation"))
}

fn encrypt_series(
    key: &PaillierPublicKey,
    prng: &mut ChaCha20Rng,
    values: &[f64],
    precision: u32,
) -> Result<Vec<Ciphertext>, Error> {
    values
        .iter()
        .map(|value| {
            let encoded = encode(*value, precision)?;
            key.encrypt(&encoded, prng).map_err(Error::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(label_name: &str, max_rounds: u64) -> TrainParams {
        TrainParams {
            learning_rate: 0.1,
            tolerance: 1e-4,
            max_rounds,
            regularization: 0.0,
            precision: 6,
            batch_size: 0,
            key_bits: 0,
            id_name: "id".into(),
            label_name: label_name.into(),
        }
    }

    fn process(address: &str, seed: u8, params: TrainParams) -> Process {
        let mut prng = ChaCha20Rng::from_seed([seed; 32]);
        let keys = PaillierKeyPair::generate_with_rng(&mut prng, 256);
        Process::new(address, keys, params)
    }

    fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    /// A tiny two-party dataset, already aligned.
    fn tiny_pair(max_rounds: (u64, u64)) -> (Process, Process) {
        let mut a = process("party-a", 11, params("", max_rounds.0));
        let mut b = process("party-b", 12, params("y", max_rounds.1));
        a.init(&rows(&[
            &["id", "x1"],
            &["1", "0.2"],
            &["2", "0.8"],
            &["3", "0.5"],
        ]))
        .unwrap();
        b.init(&rows(&[
            &["id", "x2", "y"],
            &["1", "1.0", "0"],
            &["2", "1.2", "1"],
            &["3", "0.9", "1"],
        ]))
        .unwrap();
        let key_a = a.keys.public.to_bytes();
        let key_b = b.keys.public.to_bytes();
        a.set_homo_pub_of_other(&key_b).unwrap();
        b.set_homo_pub_of_other(&key_a).unwrap();
        (a, b)
    }

    /// Runs one full round in lockstep, the way the learners do over the
    /// wire, and returns both stop decisions.
    fn lockstep_round(a: &mut Process, b: &mut Process, round: u64) -> (bool, bool) {
        let parts_a = a.cal_local_gradient_and_cost().unwrap().unwrap();
        let parts_b = b.cal_local_gradient_and_cost().unwrap().unwrap();
        b.set_part_bytes_from_other(&parts_a, round).unwrap();
        a.set_part_bytes_from_other(&parts_b, round).unwrap();

        let (enc_grad_a, enc_cost_a) = a.cal_enc_gradient_and_cost().unwrap().unwrap();
        let (enc_grad_b, enc_cost_b) = b.cal_enc_gradient_and_cost().unwrap().unwrap();
        assert!(b
            .set_enc_gradient_and_cost_from_other(&enc_grad_a, &enc_cost_a)
            .unwrap());
        assert!(a
            .set_enc_gradient_and_cost_from_other(&enc_grad_b, &enc_cost_b)
            .unwrap());

        let (grad_for_b, cost_for_b) = a.dec_gradient_and_cost().unwrap().unwrap();
        let (grad_for_a, cost_for_a) = b.dec_gradient_and_cost().unwrap().unwrap();
        assert!(b.set_gradient_and_cost_from_other(&grad_for_b, &cost_for_b).unwrap());
        assert!(a.set_gradient_and_cost_from_other(&grad_for_a, &cost_for_a).unwrap());

        let stopped_a = a.update_cost_and_gradient().unwrap();
        let stopped_b = b.update_cost_and_gradient().unwrap();
        a.set_other_status(stopped_b);
        b.set_other_status(stopped_a);
        (stopped_a, stopped_b)
    }

    #[test]
    fn test_training_converges_and_cost_decreases() {
        let (mut a, mut b) = tiny_pair((50, 50));
        let mut costs = Vec::new();
        let mut round = 0;
        loop {
            lockstep_round(&mut a, &mut b, round);
            costs.push(a.cost().unwrap());
            // the parties round in different places, so their costs agree
            // only up to the fixed-point quantization
            assert!((a.cost().unwrap() - b.cost().unwrap()).abs() < 1e-4);

            let (decided, stopped) = a.stop();
            assert!(decided);
            assert_eq!(a.stop(), b.stop());
            if stopped {
                break;
            }
            round += 1;
            assert!(round < 50, "training failed to stop within the round cap");
            a.up_round(round);
            b.up_round(round);
        }

        // the first round starts from w = 0; afterwards the cost may only go
        // down, up to the quantization of the encoding
        for pair in costs.windows(2).skip(1) {
            assert!(pair[1] <= pair[0] + 1e-4, "cost increased: {:?}", pair);
        }
        assert!(costs.last().unwrap() < &costs[0]);
        for weight in a.weights().iter().chain(b.weights()) {
            assert!(weight.is_finite());
        }
    }

    #[test]
    fn test_part_bytes_for_the_next_round_are_buffered() {
        let (mut a, mut b) = tiny_pair((50, 50));
        lockstep_round(&mut a, &mut b, 0);

        // b races ahead into round 1 and emits its series before a follows
        b.up_round(1);
        let parts_b = b.cal_local_gradient_and_cost().unwrap().unwrap();
        a.set_part_bytes_from_other(&parts_b, 1).unwrap();
        assert!(a.round.peer_parts.is_none());
        assert!(a.round.peer_parts_ahead.is_some());

        // entering round 1 promotes the buffered series
        a.up_round(1);
        assert!(a.round.peer_parts.is_some());
        let parts_a = a.cal_local_gradient_and_cost().unwrap().unwrap();
        b.set_part_bytes_from_other(&parts_a, 1).unwrap();
        assert!(a.cal_enc_gradient_and_cost().unwrap().is_some());
        assert!(b.cal_enc_gradient_and_cost().unwrap().is_some());
    }

    #[test]
    fn test_encrypted_math_requires_the_peer_key() {
        let mut a = process("party-a", 21, params("", 10));
        let mut b = process("party-b", 22, params("y", 10));
        a.init(&rows(&[&["id", "x1"], &["1", "0.2"]])).unwrap();
        b.init(&rows(&[&["id", "x2", "y"], &["1", "1.0", "0"]])).unwrap();

        a.cal_local_gradient_and_cost().unwrap().unwrap();
        let parts_b = b.cal_local_gradient_and_cost().unwrap().unwrap();
        a.set_part_bytes_from_other(&parts_b, 0).unwrap();
        assert!(matches!(
            a.cal_enc_gradient_and_cost(),
            Err(Error::KeysNotExchanged)
        ));
    }

    #[test]
    fn test_stop_requires_both_decisions_and_ands_them() {
        // a runs out of rounds at round 2 while b would keep going
        let (mut a, mut b) = tiny_pair((3, 50));
        for round in 0..3 {
            if round > 0 {
                a.up_round(round);
                b.up_round(round);
            }
            let (stopped_a, stopped_b) = lockstep_round(&mut a, &mut b, round);
            if round < 2 {
                assert!(!stopped_a && !stopped_b);
            } else {
                // one party wanting to stop is not enough
                assert!(stopped_a && !stopped_b);
                assert_eq!(a.stop(), (true, false));
                assert_eq!(b.stop(), (true, false));
            }
        }
    }

    #[test]
    fn test_stop_is_undecided_without_the_peer_status() {
        let (mut a, mut b) = tiny_pair((50, 50));
        let parts_a = a.cal_local_gradient_and_cost().unwrap().unwrap();
        let parts_b = b.cal_local_gradient_and_cost().unwrap().unwrap();
        a.set_part_bytes_from_other(&parts_b, 0).unwrap();
        b.set_part_bytes_from_other(&parts_a, 0).unwrap();
        assert_eq!(a.stop(), (false, false));

        let (enc_grad_a, enc_cost_a) = a.cal_enc_gradient_and_cost().unwrap().unwrap();
        let (enc_grad_b, enc_cost_b) = b.cal_enc_gradient_and_cost().unwrap().unwrap();
        b.set_enc_gradient_and_cost_from_other(&enc_grad_a, &enc_cost_a).unwrap();
        a.set_enc_gradient_and_cost_from_other(&enc_grad_b, &enc_cost_b).unwrap();
        let (grad_for_b, cost_for_b) = a.dec_gradient_and_cost().unwrap().unwrap();
        b.set_gradient_and_cost_from_other(&grad_for_b, &cost_for_b).unwrap();
        b.update_cost_and_gradient().unwrap();

        // b knows its own decision but not ours
        assert_eq!(b.stop(), (false, false));
        b.set_other_status(false);
        assert_eq!(b.stop(), (true, false));
    }

    #[test]
    fn test_round_slots_are_write_once() {
        let (mut a, mut b) = tiny_pair((50, 50));
        let parts_a = a.cal_local_gradient_and_cost().unwrap().unwrap();
        // a second computation in the same round yields nothing new
        assert!(a.cal_local_gradient_and_cost().unwrap().is_none());

        b.set_part_bytes_from_other(&parts_a, 0).unwrap();
        let parts_b = b.cal_local_gradient_and_cost().unwrap().unwrap();
        a.set_part_bytes_from_other(&parts_b, 0).unwrap();

        let (enc_grad_a, enc_cost_a) = a.cal_enc_gradient_and_cost().unwrap().unwrap();
        assert!(a.cal_enc_gradient_and_cost().unwrap().is_none());
        assert!(b
            .set_enc_gradient_and_cost_from_other(&enc_grad_a, &enc_cost_a)
            .unwrap());
        assert!(!b
            .set_enc_gradient_and_cost_from_other(&enc_grad_a, &enc_cost_a)
            .unwrap());
    }

    #[test]
    fn test_model_extraction() {
        let (mut a, mut b) = tiny_pair((2, 2));
        lockstep_round(&mut a, &mut b, 0);
        a.up_round(1);
        b.up_round(1);
        lockstep_round(&mut a, &mut b, 1);

        let model_a = a.get_train_models().unwrap();
        assert_eq!(model_a.party, "party-a");
        assert_eq!(model_a.feature_names, vec!["x1"]);
        assert_eq!(model_a.weights.len(), 1);
        assert_eq!(model_a.rounds, 2);

        let model_b = b.get_train_models().unwrap();
        assert_eq!(model_b.feature_names, vec!["x2"]);
        // one weight per feature plus the intercept
        assert_eq!(model_b.weights.len(), 2);
    }

    #[test]
    fn test_deterministic_batches() {
        let mut p = params("y", 10);
        p.batch_size = 2;
        let mut a = process("party-a", 31, p);
        a.init(&rows(&[
            &["id", "x", "y"],
            &["1", "0.1", "0"],
            &["2", "0.2", "1"],
            &["3", "0.3", "1"],
        ]))
        .unwrap();
        assert_eq!(a.batch_rows().unwrap(), vec![0, 1]);
        a.up_round(1);
        assert_eq!(a.batch_rows().unwrap(), vec![2, 0]);
        a.up_round(2);
        assert_eq!(a.batch_rows().unwrap(), vec![1, 2]);
    }
}

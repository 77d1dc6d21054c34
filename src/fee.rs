//! Fee estimation and change distribution.
//!
//! **Reference**: wallet-core `methods::create_action` fee-model math
//! (`crates/wallet-core/src/methods/create_action.rs`):
//! `estimated_fee = ceil(estimated_size * rate / 1000)`.

use crate::transaction::{Transaction, TransactionError};
use async_trait::async_trait;
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeeError {
    #[error("input {0} has no resolvable source_transaction")]
    MissingSource(usize),

    #[error("input {0} references a source output with no satoshis")]
    MissingSourceAmount(usize),

    #[error("output {0} is not change and has no satoshis amount")]
    MissingOutputAmount(usize),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

pub type FeeResult<T> = Result<T, FeeError>;

/// Estimates a transaction's size in bytes for fee purposes. Scripts already
/// present are measured directly; an input still carrying only an
/// `unlocking_script_template` is measured by `UnlockingTemplate::estimate_length`.
fn estimate_size(tx: &Transaction) -> u64 {
    let mut size = 4 + 1 + 1 + 4; // version, n_inputs varint (1-byte case), n_outputs varint, lock_time
    for input in &tx.inputs {
        let script_len = match (&input.unlocking_script, &input.unlocking_script_template) {
            (Some(script), _) => script.len() as u64,
            (None, Some(template)) => template.estimate_length(),
            (None, None) => 0,
        };
        size += 32 + 4 + varint_len(script_len) + script_len + 4;
    }
    for output in &tx.outputs {
        let script_len = output.locking_script.len() as u64;
        size += 8 + varint_len(script_len) + script_len;
    }
    size
}

fn varint_len(n: u64) -> u64 {
    if n < 0xFD {
        1
    } else if n <= 0xFFFF {
        3
    } else if n <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// A pluggable fee-estimation strategy, queried once per [`FeeEngine::apply`].
#[async_trait]
pub trait FeeModel: Send + Sync {
    async fn compute_fee(&self, tx: &Transaction) -> FeeResult<u64>;
}

/// `ceil(estimated_size * rate / 1000)`, matching the sats-per-kilobyte model.
#[derive(Debug, Clone, Copy)]
pub struct SatoshisPerKilobyte {
    pub rate: u64,
}

impl SatoshisPerKilobyte {
    pub fn new(rate: u64) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl FeeModel for SatoshisPerKilobyte {
    async fn compute_fee(&self, tx: &Transaction) -> FeeResult<u64> {
        let size = estimate_size(tx);
        Ok(((size as f64 * self.rate as f64) / 1000.0).ceil() as u64)
    }
}

/// A flat fee regardless of transaction size.
#[derive(Debug, Clone, Copy)]
pub struct FixedFee {
    pub fee: u64,
}

impl FixedFee {
    pub fn new(fee: u64) -> Self {
        Self { fee }
    }
}

#[async_trait]
impl FeeModel for FixedFee {
    async fn compute_fee(&self, _tx: &Transaction) -> FeeResult<u64> {
        Ok(self.fee)
    }
}

/// How leftover satoshis are spread across a transaction's `change` outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDistribution {
    /// Floor-divide evenly; any remainder is folded into the transaction's
    /// last output (not necessarily the last change output).
    Equal,
    /// Benford-biased random weights, proportionally splitting the leftover;
    /// any rounding remainder is folded into the transaction's last output.
    Random,
}

/// Computes a fee via a [`FeeModel`] and distributes the remaining inputs'
/// value across a transaction's `change` outputs.
pub struct FeeEngine {
    model: Arc<dyn FeeModel>,
    distribution: ChangeDistribution,
}

impl FeeEngine {
    pub fn new(model: Arc<dyn FeeModel>, distribution: ChangeDistribution) -> Self {
        Self { model, distribution }
    }

    async fn totals(&self, tx: &Transaction) -> FeeResult<(u64, u64, Vec<usize>)> {
        let mut total_in: u64 = 0;
        for (i, input) in tx.inputs.iter().enumerate() {
            let src = input
                .source_transaction
                .as_ref()
                .ok_or(FeeError::MissingSource(i))?;
            let guard = src.read().await;
            let out = guard
                .outputs
                .get(input.source_output_index as usize)
                .ok_or(FeeError::MissingSourceAmount(i))?;
            total_in += out.satoshis.ok_or(FeeError::MissingSourceAmount(i))?;
        }

        let mut fixed_out: u64 = 0;
        let mut change_indices = Vec::new();
        for (i, output) in tx.outputs.iter().enumerate() {
            if output.change {
                change_indices.push(i);
            } else {
                fixed_out += output.satoshis.ok_or(FeeError::MissingOutputAmount(i))?;
            }
        }

        Ok((total_in, fixed_out, change_indices))
    }

    /// Resolves every `change` output's `satoshis` and invalidates the
    /// transaction's hash cache. Uses `rand::thread_rng()` for
    /// [`ChangeDistribution::Random`]; see [`FeeEngine::apply_with_rng`] to
    /// inject a deterministic source.
    pub async fn apply(&self, tx: &mut Transaction) -> FeeResult<()> {
        self.apply_with_rng(tx, &mut rand::thread_rng()).await
    }

    /// Per spec: a non-positive `change` drops every `change`-flagged output
    /// from the transaction entirely rather than failing; it does not mean
    /// the inputs were insufficient to cover the fixed outputs and fee, just
    /// that there is nothing left to hand back.
    pub async fn apply_with_rng(&self, tx: &mut Transaction, rng: &mut dyn RngCore) -> FeeResult<()> {
        let fee = self.model.compute_fee(tx).await?;
        let (total_in, fixed_out, change_indices) = self.totals(tx).await?;

        let change = total_in as i64 - fee as i64 - fixed_out as i64;

        if change <= 0 || change_indices.is_empty() {
            if change <= 0 {
                tx.outputs.retain(|o| !o.change);
                tx.invalidate_cache();
            }
            return Ok(());
        }
        let leftover = change as u64;

        let assigned = match self.distribution {
            ChangeDistribution::Equal => distribute_equal(leftover, change_indices.len()),
            ChangeDistribution::Random => distribute_random(leftover, change_indices.len(), rng),
        };

        let assigned_sum: u64 = assigned.iter().sum();
        let remainder = leftover - assigned_sum;

        for (slot, &idx) in change_indices.iter().enumerate() {
            tx.outputs[idx].satoshis = Some(assigned[slot]);
        }

        let last = tx.outputs.len() - 1;
        let bumped = tx.outputs[last].satoshis.unwrap_or(0) + remainder;
        tx.outputs[last].satoshis = Some(bumped);

        tx.invalidate_cache();
        Ok(())
    }
}

/// Base amount to every change output, with the division remainder folded in
/// separately by the caller (into the transaction's last output, not
/// necessarily the last of these).
fn distribute_equal(leftover: u64, n: usize) -> Vec<u64> {
    let base = leftover / n as u64;
    vec![base; n]
}

/// Each change output reserves 1 satoshi of `leftover` up front. Then, for
/// every change output but the last, a digit `d` is drawn uniformly from
/// `1..=9` and `floor(remaining * log10(1 + 1/d))` satoshis are folded into
/// that output, shrinking `remaining` for the next draw. The last change
/// output is left at its reserved 1 satoshi: whatever `remaining` is left
/// over after the loop is not assigned here, matching the caller's
/// `leftover - assigned.sum()` remainder, which always lands on the
/// transaction's last output (see `FeeEngine::apply_with_rng`).
fn distribute_random(leftover: u64, n: usize, rng: &mut dyn RngCore) -> Vec<u64> {
    if n == 0 || leftover < n as u64 {
        return vec![leftover / n.max(1) as u64; n];
    }

    let mut assigned = vec![1u64; n];
    let mut remaining = leftover - n as u64;
    for slot in assigned.iter_mut().take(n - 1) {
        let d = uniform_digit(rng);
        let amount = ((remaining as f64) * (1.0 + 1.0 / d as f64).log10()).floor() as u64;
        let amount = amount.min(remaining);
        *slot += amount;
        remaining -= amount;
    }
    assigned
}

/// Draws a digit uniformly from `1..=9` (not Benford-weighted; the Benford
/// bias comes from how heavily each digit's draw shrinks `remaining`, via
/// `log10(1 + 1/d)`, not from the draw itself).
fn uniform_digit(rng: &mut dyn RngCore) -> u8 {
    (rng.next_u32() % 9) as u8 + 1
}

impl Transaction {
    /// Convenience wrapper around [`FeeEngine::apply`] for the common
    /// sats-per-kilobyte, equal-distribution case.
    pub async fn fee(&mut self, rate: u64) -> FeeResult<()> {
        let engine = FeeEngine::new(Arc::new(SatoshisPerKilobyte::new(rate)), ChangeDistribution::Equal);
        engine.apply(self).await
    }

    /// Returns what a given model would charge this transaction, without
    /// mutating it.
    pub async fn get_fee(&self, model: &dyn FeeModel) -> FeeResult<u64> {
        model.compute_fee(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput};
    use rand::rngs::mock::StepRng;

    #[tokio::test]
    async fn equal_distribution_splits_evenly_across_change_outputs() {
        let source = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1_000, vec![0x51])], 0)
            .into_shared();

        let mut tx = Transaction::new();
        let mut input = TxInput::with_source_transaction(source, 0);
        input.unlocking_script = Some(vec![0x51]);
        tx.inputs.push(input);
        tx.add_output(TxOutput::new_change(vec![0x51]));
        tx.add_output(TxOutput::new_change(vec![0x51]));
        tx.add_output(TxOutput::new_change(vec![0x51]));

        let engine = FeeEngine::new(Arc::new(FixedFee::new(10)), ChangeDistribution::Equal);
        engine.apply(&mut tx).await.unwrap();

        let total: u64 = tx.outputs.iter().map(|o| o.satoshis.unwrap()).sum();
        assert_eq!(total, 990);
        // 990 / 3 == 330 exactly, so no remainder to observe; the next test
        // uses an input that doesn't divide evenly to confirm placement.
        assert_eq!(tx.outputs[0].satoshis, Some(330));
        assert_eq!(tx.outputs[1].satoshis, Some(330));
        assert_eq!(tx.outputs[2].satoshis, Some(330));
    }

    #[tokio::test]
    async fn equal_distribution_remainder_lands_on_the_transactions_final_output() {
        let source = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1_001, vec![0x51])], 0)
            .into_shared();

        let mut tx = Transaction::new();
        let mut input = TxInput::with_source_transaction(source, 0);
        input.unlocking_script = Some(vec![0x51]);
        tx.inputs.push(input);
        tx.add_output(TxOutput::new_change(vec![0x51]));
        tx.add_output(TxOutput::new_change(vec![0x51]));

        let engine = FeeEngine::new(Arc::new(FixedFee::new(0)), ChangeDistribution::Equal);
        engine.apply(&mut tx).await.unwrap();

        // 1001 / 2 == 500 base each, remainder 1 goes to the last output.
        assert_eq!(tx.outputs[0].satoshis, Some(500));
        assert_eq!(tx.outputs[1].satoshis, Some(501));
    }

    #[tokio::test]
    async fn non_positive_change_drops_every_change_output() {
        let source = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(100, vec![0x51])], 0)
            .into_shared();

        let mut tx = Transaction::new();
        let mut input = TxInput::with_source_transaction(source, 0);
        input.unlocking_script = Some(vec![0x51]);
        tx.inputs.push(input);
        tx.add_output(TxOutput::new(90, vec![0x51]));
        tx.add_output(TxOutput::new_change(vec![0x51]));

        let engine = FeeEngine::new(Arc::new(FixedFee::new(20)), ChangeDistribution::Equal);
        engine.apply(&mut tx).await.unwrap();

        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].satoshis, Some(90));
    }

    #[tokio::test]
    async fn random_distribution_is_deterministic_under_an_injected_rng_and_conserves_value() {
        let source = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(50_000, vec![0x51])], 0)
            .into_shared();

        let mut tx = Transaction::new();
        let mut input = TxInput::with_source_transaction(source, 0);
        input.unlocking_script = Some(vec![0x51]);
        tx.inputs.push(input);
        tx.add_output(TxOutput::new_change(vec![0x51]));
        tx.add_output(TxOutput::new_change(vec![0x51]));

        let engine = FeeEngine::new(Arc::new(FixedFee::new(0)), ChangeDistribution::Random);
        let mut rng = StepRng::new(0x1234_5678_9abc_def0, 0x9e37_79b9_7f4a_7c15);
        engine.apply_with_rng(&mut tx, &mut rng).await.unwrap();

        let total: u64 = tx.outputs.iter().map(|o| o.satoshis.unwrap()).sum();
        assert_eq!(total, 50_000);
    }

    #[tokio::test]
    async fn fixed_fee_ignores_transaction_shape() {
        let tx = Transaction::new();
        let model = FixedFee::new(250);
        assert_eq!(model.compute_fee(&tx).await.unwrap(), 250);
    }
}

//! Concurrent unlocking-script signing.
//!
//! **Reference**: wallet-core's concurrent per-input fan-out in
//! `methods::sign_action` (`crates/wallet-core/src/methods/sign_action.rs`),
//! generalized here to the pluggable `UnlockingTemplate` capability.

use crate::templates::{TemplateError, UnlockingTemplate};
use crate::transaction::Transaction;
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("output {0} has no satoshis amount")]
    MissingAmount(usize),

    #[error("change output {0} has no resolved satoshis amount")]
    MissingChangeAmount(usize),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

pub type SignResult<T> = Result<T, SignError>;

impl Transaction {
    /// Signs every input carrying an `unlocking_script_template`. Every
    /// template's `sign` is issued concurrently (`join_all`) and all are
    /// awaited before any result is assigned back onto an input, in input
    /// order, so a partial rejection leaves the transaction untouched only
    /// when every template call either all succeed or all fail together.
    ///
    /// Requires every output to already carry a resolved `satoshis` amount —
    /// run `FeeEngine::apply` first if any outputs are still `change`.
    pub async fn sign(&mut self) -> SignResult<()> {
        for (i, output) in self.outputs.iter().enumerate() {
            if output.satoshis.is_none() {
                return Err(if output.change {
                    SignError::MissingChangeAmount(i)
                } else {
                    SignError::MissingAmount(i)
                });
            }
        }

        let snapshot = self.clone();
        let templates: Vec<(usize, Option<Arc<dyn UnlockingTemplate>>)> = self
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| (i, input.unlocking_script_template.clone()))
            .collect();

        let sign_futures = templates.into_iter().map(|(i, template)| {
            let snapshot = &snapshot;
            async move {
                match template {
                    Some(t) => Some((i, t.sign(snapshot, i).await)),
                    None => None,
                }
            }
        });

        let results = join_all(sign_futures).await;
        for result in results {
            if let Some((i, script)) = result {
                self.inputs[i].unlocking_script = Some(script?);
            }
        }

        self.invalidate_cache();
        Ok(())
    }
}

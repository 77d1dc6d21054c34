//! Pay-to-Public-Key-Hash locking/unlocking templates.
//!
//! **Reference**: ts-sdk `P2PKH` template (`script/template/P2PKH.ts`).

use super::{LockingTemplate, TemplateError, TemplateResult, UnlockingTemplate};
use crate::transaction::sighash::legacy_sighash_all;
use crate::transaction::Transaction;
use async_trait::async_trait;
use base58check::FromBase58Check;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

/// Mainnet P2PKH address version byte.
const P2PKH_VERSION: u8 = 0x00;

/// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG` from a Base58Check address.
#[derive(Debug, Clone, Copy, Default)]
pub struct P2pkhLockingTemplate;

impl LockingTemplate for P2pkhLockingTemplate {
    fn lock(&self, address: &str) -> TemplateResult<Vec<u8>> {
        let (version, hash) = address
            .from_base58check()
            .map_err(|e| TemplateError::InvalidAddress(format!("{e:?}")))?;

        if version != P2PKH_VERSION {
            return Err(TemplateError::InvalidAddress(format!(
                "unexpected version byte {version:#04x}"
            )));
        }
        if hash.len() != 20 {
            return Err(TemplateError::InvalidAddress(format!(
                "public key hash must be 20 bytes, got {}",
                hash.len()
            )));
        }

        let mut script = Vec::with_capacity(25);
        script.push(0x76); // OP_DUP
        script.push(0xa9); // OP_HASH160
        script.push(0x14); // push 20 bytes
        script.extend_from_slice(&hash);
        script.push(0x88); // OP_EQUALVERIFY
        script.push(0xac); // OP_CHECKSIG
        Ok(script)
    }
}

/// `<sig> <pubkey>`, signing the legacy SIGHASH_ALL digest against a known
/// source output.
pub struct P2pkhUnlockingTemplate {
    private_key: SecretKey,
    public_key: PublicKey,
    source_locking_script: Vec<u8>,
}

impl P2pkhUnlockingTemplate {
    pub fn new(private_key: SecretKey, source_locking_script: Vec<u8>) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &private_key);
        Self {
            private_key,
            public_key,
            source_locking_script,
        }
    }
}

#[async_trait]
impl UnlockingTemplate for P2pkhUnlockingTemplate {
    async fn sign(&self, tx: &Transaction, input_index: usize) -> TemplateResult<Vec<u8>> {
        if input_index >= tx.inputs.len() {
            return Err(TemplateError::InputOutOfRange(input_index));
        }

        let digest = legacy_sighash_all(tx, input_index, &self.source_locking_script)
            .map_err(|e| TemplateError::Signing(e.to_string()))?;
        let msg = Message::from_slice(&digest).map_err(|e| TemplateError::Signing(e.to_string()))?;

        let secp = Secp256k1::signing_only();
        let sig = secp.sign_ecdsa(&msg, &self.private_key);

        let mut der = sig.serialize_der().to_vec();
        der.push(0x01); // SIGHASH_ALL

        let pubkey = self.public_key.serialize();

        let mut script = Vec::with_capacity(1 + der.len() + 1 + pubkey.len());
        script.push(der.len() as u8);
        script.extend_from_slice(&der);
        script.push(pubkey.len() as u8);
        script.extend_from_slice(&pubkey);
        Ok(script)
    }

    fn estimate_length(&self) -> u64 {
        // 1-byte push + up to 72-byte DER sig + 1 sighash byte + 1-byte push + 33-byte compressed pubkey
        1 + 72 + 1 + 1 + 33
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eater_address_decodes_to_the_well_known_hash() {
        let script = P2pkhLockingTemplate
            .lock("1BitcoinEaterAddressDontSendf59kuE")
            .unwrap();
        assert_eq!(script.len(), 25);
        assert_eq!(script[0], 0x76);
        assert_eq!(script[1], 0xa9);
        assert_eq!(script[2], 0x14);
        assert_eq!(script[23], 0x88);
        assert_eq!(script[24], 0xac);
    }

    #[test]
    fn wrong_version_byte_is_rejected() {
        // A testnet address (version 0x6f) should not decode as mainnet P2PKH.
        let testnet_addr = "mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8";
        assert!(P2pkhLockingTemplate.lock(testnet_addr).is_err());
    }

    #[tokio::test]
    async fn unlocking_script_carries_sig_then_pubkey_pushes() {
        let key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let prev_script = P2pkhLockingTemplate
            .lock("1BitcoinEaterAddressDontSendf59kuE")
            .unwrap();
        let template = P2pkhUnlockingTemplate::new(key, prev_script.clone());

        let mut tx = Transaction::new();
        let txid = crate::transaction::Txid::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        tx.add_input(crate::transaction::TxInput::with_source_txid(txid, 0))
            .await
            .unwrap();
        tx.add_output(crate::transaction::TxOutput::new(900, vec![0x76, 0xa9]));

        let script = template.sign(&tx, 0).await.unwrap();
        let sig_len = script[0] as usize;
        let pubkey_len = script[1 + sig_len];
        assert_eq!(pubkey_len as usize, 33);
        assert_eq!(script.len(), 1 + sig_len + 1 + 33);
    }
}

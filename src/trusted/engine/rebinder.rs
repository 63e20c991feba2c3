//! Binds a template to the coin that finally showed up and re-signs it.
//!
//! The template was signed against a placeholder outpoint, so its signature
//! is worthless; a fresh `SIGHASH_ALL` signature is produced over the real
//! outpoint and value. ECDSA nonces are RFC6979, so the same template and
//! coin always give byte-identical transactions.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ScriptBuf, Transaction, Witness};

use crate::error::RebindError;
use crate::trusted::domain::request::{ResolvedCoin, SpendPath, TransactionTemplate};
use crate::trusted::keys::KeyStore;

/// Index of the input a template leaves open.
pub const BOUND_INPUT: usize = 0;

fn signing_error(e: impl std::fmt::Display) -> RebindError {
    RebindError::Signing(e.to_string())
}

/// Produces the final transaction spending `coin` through `template`.
pub fn rebind<K: KeyStore + ?Sized>(
    template: &TransactionTemplate,
    coin: &ResolvedCoin,
    keys: &K,
) -> Result<Transaction, RebindError> {
    if template.transaction.input.len() <= BOUND_INPUT {
        return Err(RebindError::NoInput);
    }

    let required = template
        .required_value()
        .ok_or(RebindError::ValueOverflow)?;
    if coin.value < required {
        return Err(RebindError::InsufficientValue {
            outpoint: coin.outpoint,
            required,
            available: coin.value,
        });
    }

    match template.spend.locking_script(&template.signer) {
        Some(spk) if spk == coin.script => {}
        _ => return Err(RebindError::ScriptMismatch(coin.outpoint)),
    }

    let secret = keys
        .secret_key(&template.signer)
        .ok_or(RebindError::MissingKey(template.signer))?;

    let mut tx = template.transaction.clone();
    {
        let input = &mut tx.input[BOUND_INPUT];
        input.previous_output = coin.outpoint;
        input.script_sig = ScriptBuf::new();
        input.witness = Witness::new();
    }

    let sighash_type = EcdsaSighashType::All;
    let digest = {
        let mut cache = SighashCache::new(&tx);
        match &template.spend {
            SpendPath::P2pkh => cache
                .legacy_signature_hash(BOUND_INPUT, &coin.script, sighash_type.to_u32())
                .map_err(signing_error)?
                .to_byte_array(),
            SpendPath::P2wpkh => cache
                .p2wpkh_signature_hash(BOUND_INPUT, &coin.script, coin.value, sighash_type)
                .map_err(signing_error)?
                .to_byte_array(),
            SpendPath::P2wsh { witness_script } => cache
                .p2wsh_signature_hash(BOUND_INPUT, witness_script, coin.value, sighash_type)
                .map_err(signing_error)?
                .to_byte_array(),
        }
    };

    let secp = Secp256k1::signing_only();
    let signature = ecdsa::Signature {
        signature: secp.sign_ecdsa(&Message::from_digest(digest), &secret),
        sighash_type,
    };

    let input = &mut tx.input[BOUND_INPUT];
    match &template.spend {
        SpendPath::P2pkh => {
            let sig = PushBytesBuf::try_from(signature.to_vec()).map_err(signing_error)?;
            input.script_sig = Builder::new()
                .push_slice(sig)
                .push_key(&template.signer)
                .into_script();
        }
        SpendPath::P2wpkh => {
            let mut witness = Witness::new();
            witness.push(signature.to_vec());
            witness.push(template.signer.to_bytes());
            input.witness = witness;
        }
        SpendPath::P2wsh { witness_script } => {
            let mut witness = Witness::new();
            witness.push(signature.to_vec());
            witness.push(witness_script.as_bytes());
            input.witness = witness;
        }
    }

    log::debug!(
        "[REBIND] {} bound to {} ({})",
        tx.compute_txid(),
        coin.outpoint,
        coin.value
    );
    Ok(tx)
}

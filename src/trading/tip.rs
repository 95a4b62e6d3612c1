//! Tip transfer injection and signing
//!
//! The relay route needs a SOL transfer to the relay's tip account inside the
//! swap transaction itself. Lookup-table accounts are never resolved: new
//! static keys are spliced into the header-ordered key list and every compiled
//! index at or after the splice point is shifted, which also moves the
//! lookup-loaded indexes that follow the static keys.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::hash::Hash;
use solana_sdk::instruction::CompiledInstruction;
use solana_sdk::message::{MessageHeader, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::system_instruction;
use solana_sdk::system_program;
use solana_sdk::transaction::VersionedTransaction;

use crate::error::{Error, Result};

/// Decode a base64 serialized transaction from the routing service
pub fn decode_transaction(encoded: &str) -> Result<VersionedTransaction> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::TransactionBuild(format!("invalid base64 transaction: {}", e)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| Error::TransactionBuild(format!("invalid transaction bytes: {}", e)))
}

/// Sign `message` with the single wallet signer
pub fn sign_message(message: VersionedMessage, keypair: &Keypair) -> Result<VersionedTransaction> {
    VersionedTransaction::try_new(message, &[keypair])
        .map_err(|e| Error::TransactionBuild(format!("signing failed: {}", e)))
}

/// Append `SystemProgram::transfer(payer -> tip_account, lamports)` and swap in
/// a fresh blockhash
pub fn append_tip_transfer(
    message: &mut VersionedMessage,
    payer: &Pubkey,
    tip_account: &Pubkey,
    lamports: u64,
    blockhash: Hash,
) -> Result<()> {
    match message {
        VersionedMessage::Legacy(m) => {
            append_transfer(
                &mut m.header,
                &mut m.account_keys,
                &mut m.instructions,
                payer,
                tip_account,
                lamports,
            )?;
        }
        VersionedMessage::V0(m) => {
            append_transfer(
                &mut m.header,
                &mut m.account_keys,
                &mut m.instructions,
                payer,
                tip_account,
                lamports,
            )?;
        }
    }
    message.set_recent_blockhash(blockhash);
    Ok(())
}

fn append_transfer(
    header: &mut MessageHeader,
    keys: &mut Vec<Pubkey>,
    instructions: &mut Vec<CompiledInstruction>,
    payer: &Pubkey,
    tip_account: &Pubkey,
    lamports: u64,
) -> Result<()> {
    let signers = header.num_required_signatures as usize;
    let readonly_signers = header.num_readonly_signed_accounts as usize;

    let payer_index = keys
        .iter()
        .position(|k| k == payer)
        .ok_or_else(|| Error::TransactionBuild(format!("payer {} not in message", payer)))?;
    if payer_index >= signers.saturating_sub(readonly_signers) {
        return Err(Error::TransactionBuild(format!(
            "payer {} is not a writable signer",
            payer
        )));
    }

    let tip_index = ensure_key(header, keys, instructions, tip_account, true)?;
    let program_index = ensure_key(header, keys, instructions, &system_program::ID, false)?;

    let transfer = system_instruction::transfer(payer, tip_account, lamports);
    instructions.push(CompiledInstruction {
        program_id_index: program_index,
        accounts: vec![payer_index as u8, tip_index],
        data: transfer.data,
    });
    Ok(())
}

/// Index of `key` among the static keys, inserting it as a non-signer if absent
fn ensure_key(
    header: &mut MessageHeader,
    keys: &mut Vec<Pubkey>,
    instructions: &mut [CompiledInstruction],
    key: &Pubkey,
    writable: bool,
) -> Result<u8> {
    let readonly_unsigned = header.num_readonly_unsigned_accounts as usize;
    let writable_end = keys.len() - readonly_unsigned;

    if let Some(index) = keys.iter().position(|k| k == key) {
        let is_signer = index < header.num_required_signatures as usize;
        let is_writable_unsigned = !is_signer && index < writable_end;
        if writable && !is_writable_unsigned && !is_signer {
            return Err(Error::TransactionBuild(format!(
                "account {} is read-only in message",
                key
            )));
        }
        return Ok(index as u8);
    }

    let lookup_count = instructions
        .iter()
        .flat_map(|ix| ix.accounts.iter().copied().chain(std::iter::once(ix.program_id_index)))
        .map(|i| i as usize + 1)
        .max()
        .unwrap_or(0)
        .saturating_sub(keys.len());
    if keys.len() + lookup_count >= u8::MAX as usize {
        return Err(Error::TransactionBuild("too many accounts for tip".into()));
    }

    let insert_at = if writable { writable_end } else { keys.len() };
    keys.insert(insert_at, *key);
    if !writable {
        header.num_readonly_unsigned_accounts += 1;
    }

    let shift = |index: &mut u8| {
        if *index as usize >= insert_at {
            *index += 1;
        }
    };
    for ix in instructions.iter_mut() {
        shift(&mut ix.program_id_index);
        ix.accounts.iter_mut().for_each(shift);
    }

    Ok(insert_at as u8)
}

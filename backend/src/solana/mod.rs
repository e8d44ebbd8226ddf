use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::{hash, Hash},
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::Signature,
    system_program,
    transaction::Transaction,
};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::Listing;

pub const TOKEN_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

const CLAIM_METHOD: &str = "global:claim_reward";

#[derive(Debug, Error)]
pub enum RewardError {
    #[error("invalid public key: {0}")]
    ParsePubkey(#[from] solana_sdk::pubkey::ParsePubkeyError),
    #[error("transaction is not valid base58")]
    Encoding,
    #[error("bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("transaction signatures do not verify")]
    Unsigned,
    #[error("transaction does not match the prepared claim: {0}")]
    Mismatch(&'static str),
    #[error("listing has no reward to claim")]
    NothingToClaim,
    #[error("rpc error: {0}")]
    Rpc(String),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TransactionResponse {
    /// Base58 bincode of the unsigned transaction.
    pub transaction: String,
    pub amount: u64,
    pub message: String,
}

/// First eight bytes of `sha256("global:claim_reward")`.
pub fn claim_discriminator() -> [u8; 8] {
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash(CLAIM_METHOD.as_bytes()).to_bytes()[..8]);
    discriminator
}

/// Discriminator, then `amount: u64` and `listing_id: [u8; 16]`, little-endian.
pub fn claim_instruction_data(amount: u64, listing_id: Uuid) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + 8 + 16);
    data.extend_from_slice(&claim_discriminator());
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(listing_id.as_bytes());
    data
}

pub fn associated_token_address(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[wallet.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

pub fn encode_transaction(tx: &Transaction) -> Result<String, RewardError> {
    Ok(bs58::encode(bincode::serialize(tx)?).into_string())
}

pub fn decode_transaction(encoded: &str) -> Result<Transaction, RewardError> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|_| RewardError::Encoding)?;
    Ok(bincode::deserialize(&bytes)?)
}

/// The reward program and mint the claims are made against.
#[derive(Debug, Clone)]
pub struct RewardProgram {
    pub program_id: Pubkey,
    pub mint: Pubkey,
    pub decimals: u8,
    pub tokens_per_kg: u64,
}

impl RewardProgram {
    /// `ceil(kg) × tokens_per_kg`, doubled for donations, in base units.
    pub fn reward_amount(&self, listing: &Listing) -> u64 {
        let kilograms = listing.unit.kilograms(listing.quantity).max(0.0).ceil() as u64;
        let multiplier = if listing.is_donation { 2 } else { 1 };
        kilograms
            .saturating_mul(self.tokens_per_kg)
            .saturating_mul(multiplier)
            .saturating_mul(10u64.saturating_pow(u32::from(self.decimals)))
    }

    pub fn pool_address(&self) -> Pubkey {
        Pubkey::find_program_address(&[b"reward_pool", self.mint.as_ref()], &self.program_id).0
    }

    pub fn claim_record_address(&self, listing_id: Uuid) -> Pubkey {
        Pubkey::find_program_address(&[b"claim", listing_id.as_bytes()], &self.program_id).0
    }

    pub fn claim_instruction(&self, recipient: &Pubkey, listing_id: Uuid, amount: u64) -> Instruction {
        let pool = self.pool_address();
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(pool, false),
                AccountMeta::new(associated_token_address(&pool, &self.mint), false),
                AccountMeta::new(associated_token_address(recipient, &self.mint), false),
                AccountMeta::new(self.claim_record_address(listing_id), false),
                AccountMeta::new(*recipient, true),
                AccountMeta::new_readonly(self.mint, false),
                AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
                AccountMeta::new_readonly(ASSOCIATED_TOKEN_PROGRAM_ID, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: claim_instruction_data(amount, listing_id),
        }
    }

    /// The recipient pays the fee and is the only signer.
    pub fn unsigned_claim(
        &self,
        recipient: &Pubkey,
        listing_id: Uuid,
        amount: u64,
        recent_blockhash: Hash,
    ) -> Transaction {
        let ix = self.claim_instruction(recipient, listing_id, amount);
        let mut tx = Transaction::new_with_payer(&[ix], Some(recipient));
        tx.message.recent_blockhash = recent_blockhash;
        tx
    }

    /// Checks a wallet-signed transaction is exactly the claim we prepared.
    pub fn verify_signed_claim(
        &self,
        tx: &Transaction,
        recipient: &Pubkey,
        listing_id: Uuid,
        amount: u64,
    ) -> Result<(), RewardError> {
        tx.verify().map_err(|_| RewardError::Unsigned)?;
        let keys = &tx.message.account_keys;
        if keys.first() != Some(recipient) {
            return Err(RewardError::Mismatch("fee payer"));
        }
        let [ix] = tx.message.instructions.as_slice() else {
            return Err(RewardError::Mismatch("instruction count"));
        };
        if keys.get(usize::from(ix.program_id_index)) != Some(&self.program_id) {
            return Err(RewardError::Mismatch("program"));
        }
        if ix.data != claim_instruction_data(amount, listing_id) {
            return Err(RewardError::Mismatch("instruction data"));
        }
        Ok(())
    }
}

pub struct RewardClient {
    rpc: RpcClient,
    program: RewardProgram,
}

impl RewardClient {
    pub fn new(rpc_url: &str, program: RewardProgram) -> Self {
        let rpc = RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed());
        Self { rpc, program }
    }

    /// `Ok(None)` unless both the program id and the mint are configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, RewardError> {
        let (Some(program_id), Some(mint)) = (&config.reward_program_id, &config.reward_mint) else {
            return Ok(None);
        };
        let program = RewardProgram {
            program_id: Pubkey::from_str(program_id)?,
            mint: Pubkey::from_str(mint)?,
            decimals: config.reward_decimals,
            tokens_per_kg: config.reward_tokens_per_kg,
        };
        Ok(Some(Self::new(&config.solana_rpc_url, program)))
    }

    pub async fn prepare_claim(
        &self,
        recipient: &Pubkey,
        listing: &Listing,
    ) -> Result<TransactionResponse, RewardError> {
        let amount = self.program.reward_amount(listing);
        if amount == 0 {
            return Err(RewardError::NothingToClaim);
        }
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| RewardError::Rpc(e.to_string()))?;
        let tx = self.program.unsigned_claim(recipient, listing.id, amount, blockhash);
        log::info!("Prepared reward claim of {} for listing {}", amount, listing.id);
        Ok(TransactionResponse {
            transaction: encode_transaction(&tx)?,
            amount,
            message: "Sign and submit this transaction with your wallet".to_string(),
        })
    }

    /// Verifies the signed claim and sends it, returning the signature.
    pub async fn submit(
        &self,
        encoded: &str,
        recipient: &Pubkey,
        listing: &Listing,
    ) -> Result<Signature, RewardError> {
        let tx = decode_transaction(encoded)?;
        let amount = self.program.reward_amount(listing);
        self.program
            .verify_signed_claim(&tx, recipient, listing.id, amount)?;
        self.rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| RewardError::Rpc(e.to_string()))
    }
}

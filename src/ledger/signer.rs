//! Local transaction signing
//!
//! Legacy (EIP-155) transactions, RLP-encoded and signed with secp256k1.
//! Used when a private key is configured; otherwise the node signs for an
//! unlocked account.

use k256::ecdsa::SigningKey;
use zeroize::Zeroizing;

use super::abi::keccak256;
use super::LedgerError;
use crate::config::SigningSecret;

/// Unsigned legacy transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
}

/// Holds the account key and its derived address
pub struct LocalSigner {
    key: SigningKey,
    address: String,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    pub fn from_secret(secret: &SigningSecret) -> Result<Self, LedgerError> {
        let raw = secret.expose().trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = Zeroizing::new(
            hex::decode(raw)
                .map_err(|_| LedgerError::NotConfigured("private key is not valid hex".into()))?,
        );
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| LedgerError::NotConfigured("private key is not a valid secp256k1 scalar".into()))?;

        let point = key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let address = format!("0x{}", hex::encode(&hash[12..]));

        Ok(Self { key, address })
    }

    /// Lowercase 0x-prefixed account address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign and return the raw transaction bytes for `eth_sendRawTransaction`
    pub fn sign_legacy(&self, tx: &LegacyTransaction, chain_id: u64) -> Result<Vec<u8>, LedgerError> {
        let mut unsigned = Vec::new();
        encode_common_fields(&mut unsigned, tx);
        rlp_uint(&mut unsigned, chain_id as u128);
        rlp_uint(&mut unsigned, 0);
        rlp_uint(&mut unsigned, 0);
        let sighash = keccak256(&rlp_list(&unsigned));

        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&sighash)
            .map_err(|e| LedgerError::Rpc(format!("signing failed: {}", e)))?;
        let sig_bytes = signature.to_bytes();
        let v = recovery_id.to_byte() as u128 + chain_id as u128 * 2 + 35;

        let mut signed = Vec::new();
        encode_common_fields(&mut signed, tx);
        rlp_uint(&mut signed, v);
        rlp_bytes(&mut signed, strip_leading_zeros(&sig_bytes[..32]));
        rlp_bytes(&mut signed, strip_leading_zeros(&sig_bytes[32..]));
        Ok(rlp_list(&signed))
    }
}

/// Parse a 0x-prefixed 20-byte address
pub fn parse_address(address: &str) -> Result<[u8; 20], LedgerError> {
    let trimmed = address.trim();
    let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(raw)
        .map_err(|_| LedgerError::NotConfigured(format!("invalid address: {}", address)))?;
    if bytes.len() != 20 {
        return Err(LedgerError::NotConfigured(format!("invalid address length: {}", address)));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn encode_common_fields(out: &mut Vec<u8>, tx: &LegacyTransaction) {
    rlp_uint(out, tx.nonce as u128);
    rlp_uint(out, tx.gas_price);
    rlp_uint(out, tx.gas_limit as u128);
    rlp_bytes(out, &tx.to);
    rlp_uint(out, tx.value);
    rlp_bytes(out, &tx.data);
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn rlp_length_prefix(out: &mut Vec<u8>, len: usize, short_base: u8, long_base: u8) {
    if len <= 55 {
        out.push(short_base + len as u8);
    } else {
        let len_bytes = len.to_be_bytes();
        let len_bytes = strip_leading_zeros(&len_bytes);
        out.push(long_base + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
}

fn rlp_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        rlp_length_prefix(out, bytes.len(), 0x80, 0xb7);
        out.extend_from_slice(bytes);
    }
}

fn rlp_uint(out: &mut Vec<u8>, value: u128) {
    let bytes = value.to_be_bytes();
    rlp_bytes(out, strip_leading_zeros(&bytes));
}

fn rlp_list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    rlp_length_prefix(&mut out, payload.len(), 0xc0, 0xf7);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_derivation() {
        let signer = LocalSigner::from_secret(&SigningSecret::new(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        ))
        .unwrap();
        assert_eq!(signer.address(), "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23");
    }

    #[test]
    fn test_eip155_reference_transaction() {
        let signer = LocalSigner::from_secret(&SigningSecret::new("46".repeat(32))).unwrap();
        let tx = LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: [0x35; 20],
            value: 1_000_000_000_000_000_000,
            data: vec![],
        };
        let raw = signer.sign_legacy(&tx, 1).unwrap();
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_rlp_short_and_long_strings() {
        let mut out = Vec::new();
        rlp_bytes(&mut out, b"dog");
        assert_eq!(out, vec![0x83, b'd', b'o', b'g']);

        let mut out = Vec::new();
        rlp_uint(&mut out, 0);
        assert_eq!(out, vec![0x80]);

        let long = vec![0xaa; 56];
        let mut out = Vec::new();
        rlp_bytes(&mut out, &long);
        assert_eq!(&out[..2], &[0xb8, 56]);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        assert!(LocalSigner::from_secret(&SigningSecret::new("not-hex")).is_err());
        assert!(LocalSigner::from_secret(&SigningSecret::new("00".repeat(32))).is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address(&format!("0x{}", "35".repeat(20))).is_ok());
    }
}

//! EIP-712 hashing utilities for the permit schemes.
//!
//! These helpers provide:
//! - Domain hash computation, with or without a `version` member
//! - Struct hashes for EIP-2612 `Permit` and Permit2 `PermitTransferFrom`
//! - Final digest computation (0x1901 || domainHash || structHash)
//! - A minimal ABI encoder for the static field types those structs use

use alloy_primitives::{keccak256, Address, B256, U256};

pub const DOMAIN_TYPE: &str = "EIP712Domain(string name,uint256 chainId,address verifyingContract)";
pub const DOMAIN_TYPE_WITH_VERSION: &str =
	"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const NAME_PERMIT2: &str = "Permit2";
pub const PERMIT_TYPE: &str =
	"Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";
pub const TOKEN_PERMISSIONS_TYPE: &str = "TokenPermissions(address token,uint256 amount)";
pub const PERMIT_TRANSFER_FROM_TYPE: &str =
	"PermitTransferFrom(TokenPermissions permitted,address spender,uint256 nonce,uint256 deadline)";

/// Compute the EIP-712 domain hash.
///
/// Permit2 omits the `version` member, EIP-2612 tokens include it; the type
/// string is chosen accordingly.
pub fn compute_domain_hash(
	name: &str,
	version: Option<&str>,
	chain_id: u64,
	verifying_contract: &Address,
) -> B256 {
	let mut enc = Eip712AbiEncoder::new();
	match version {
		Some(version) => {
			enc.push_b256(&keccak256(DOMAIN_TYPE_WITH_VERSION.as_bytes()));
			enc.push_b256(&keccak256(name.as_bytes()));
			enc.push_b256(&keccak256(version.as_bytes()));
		}
		None => {
			enc.push_b256(&keccak256(DOMAIN_TYPE.as_bytes()));
			enc.push_b256(&keccak256(name.as_bytes()));
		}
	}
	enc.push_u256(U256::from(chain_id));
	enc.push_address(verifying_contract);
	keccak256(enc.finish())
}

/// Struct hash of an EIP-2612 `Permit`.
pub fn permit_struct_hash(
	owner: &Address,
	spender: &Address,
	value: U256,
	nonce: U256,
	deadline: U256,
) -> B256 {
	let mut enc = Eip712AbiEncoder::new();
	enc.push_b256(&keccak256(PERMIT_TYPE.as_bytes()));
	enc.push_address(owner);
	enc.push_address(spender);
	enc.push_u256(value);
	enc.push_u256(nonce);
	enc.push_u256(deadline);
	keccak256(enc.finish())
}

/// Struct hash of a Permit2 `PermitTransferFrom` for a single token.
pub fn permit_transfer_from_struct_hash(
	token: &Address,
	amount: U256,
	spender: &Address,
	nonce: U256,
	deadline: U256,
) -> B256 {
	let mut enc = Eip712AbiEncoder::new();
	enc.push_b256(&keccak256(TOKEN_PERMISSIONS_TYPE.as_bytes()));
	enc.push_address(token);
	enc.push_u256(amount);
	let permitted_hash = keccak256(enc.finish());

	// Referenced struct types are appended to the primary type string.
	let type_hash =
		keccak256(format!("{}{}", PERMIT_TRANSFER_FROM_TYPE, TOKEN_PERMISSIONS_TYPE).as_bytes());

	let mut enc = Eip712AbiEncoder::new();
	enc.push_b256(&type_hash);
	enc.push_b256(&permitted_hash);
	enc.push_address(spender);
	enc.push_u256(nonce);
	enc.push_u256(deadline);
	keccak256(enc.finish())
}

/// Compute the final EIP-712 digest: keccak256(0x1901 || domainHash || structHash).
pub fn compute_final_digest(domain_hash: &B256, struct_hash: &B256) -> B256 {
	let mut out = Vec::with_capacity(2 + 32 + 32);
	out.push(0x19);
	out.push(0x01);
	out.extend_from_slice(domain_hash.as_slice());
	out.extend_from_slice(struct_hash.as_slice());
	keccak256(out)
}

/// Minimal ABI encoder for static types used in EIP-712 struct hashing.
#[derive(Default)]
pub struct Eip712AbiEncoder {
	buf: Vec<u8>,
}

impl Eip712AbiEncoder {
	pub fn new() -> Self {
		Self { buf: Vec::new() }
	}

	pub fn push_b256(&mut self, v: &B256) {
		self.buf.extend_from_slice(v.as_slice());
	}

	pub fn push_address(&mut self, addr: &Address) {
		let mut word = [0u8; 32];
		word[12..].copy_from_slice(addr.as_slice());
		self.buf.extend_from_slice(&word);
	}

	pub fn push_u256(&mut self, v: U256) {
		self.buf.extend_from_slice(&v.to_be_bytes::<32>());
	}

	pub fn finish(self) -> Vec<u8> {
		self.buf
	}
}

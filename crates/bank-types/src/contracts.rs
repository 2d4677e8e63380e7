//! Solidity call bindings for the contracts the bank client talks to.
//!
//! Only the functions the client reads or submits are declared. Calls are
//! encoded with `abi_encode()` and return data decoded with
//! `abi_decode_returns(data, true)`.

use alloy_sol_types::sol;

sol! {
	/// Permit-enabled ERC-20 token with a push-style callback transfer.
	interface IBankToken {
		function balanceOf(address account) external view returns (uint256);
		function allowance(address owner, address spender) external view returns (uint256);
		function nonces(address owner) external view returns (uint256);
		function symbol() external view returns (string);
		function approve(address spender, uint256 amount) external returns (bool);
		function transferFrom(address from, address to, uint256 amount) external returns (bool);
		function transferWithCallback(address to, uint256 amount) external returns (bool);
	}

	/// Token amount pair inside a Permit2 transfer permit.
	struct TokenPermissions {
		address token;
		uint256 amount;
	}

	/// Permit2 single-token transfer permit as accepted by the bank.
	struct PermitTransferFrom {
		TokenPermissions permitted;
		uint256 nonce;
		uint256 deadline;
	}

	/// Custodial ledger contract.
	interface ITokenBank {
		function balanceOf(address account) external view returns (uint256);
		function deposit(uint256 amount) external;
		function withdraw(uint256 amount) external;
		function depositFor(address account, uint256 amount) external;
		function permitDeposit(uint256 amount, uint256 deadline, uint8 v, bytes32 r, bytes32 s) external;
		function depositWithPermit2(PermitTransferFrom permitTransfer, address owner, bytes signature) external;
	}

	/// One call of a delegated batch.
	struct Call {
		address target;
		uint256 value;
		bytes data;
	}

	/// Delegate contract executing multi-step batches for an account.
	interface IBatchDelegate {
		function executeBatch(Call[] calls) external payable returns (bytes[] results);
		function depositToBank(address token, address bank, uint256 amount) external;
	}
}

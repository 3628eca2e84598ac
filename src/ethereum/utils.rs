use alloy::primitives::Address;
use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Validates and normalizes a hex contract address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(anyhow!(
            "Invalid address format: '{}'. Addresses must start with '0x'",
            address
        ));
    }

    if address.len() != 42 {
        return Err(anyhow!(
            "Invalid address length: '{}'. Addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        ));
    }

    if !address[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "Invalid address format: '{}'. Contains non-hexadecimal characters",
            address
        ));
    }

    // Alloy checks the EIP-55 checksum on mixed-case input
    Address::from_str(address).map_err(|e| anyhow!("Invalid address: '{}'. Error: {}", address, e))
}

/// Turns a raw node error into a hint about the likely cause
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("execution reverted") {
        "Execution reverted: the contract rejected the call. Check the decoded revert reason."
            .to_string()
    } else if error.contains("insufficient funds") {
        "Transaction failed: insufficient funds to cover value plus gas.".to_string()
    } else if error.contains("gas required exceeds allowance") {
        "Transaction failed: gas limit too low for this transaction.".to_string()
    } else if error.contains("nonce too low") {
        "Transaction failed: nonce too low, another transaction already used it.".to_string()
    } else if error.contains("replacement transaction underpriced") {
        "Transaction failed: gas price too low to replace the pending transaction.".to_string()
    } else if error.contains("filter not found") {
        "Log filter expired on the node; the subscription has to be recreated.".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Network error: cannot connect to the RPC endpoint.".to_string()
    } else if error.contains("timeout") {
        "Network error: request timed out.".to_string()
    } else if error.contains("rate limit") {
        "Rate limit error: too many requests to the RPC endpoint.".to_string()
    } else if error.contains("method not found") {
        "RPC error: method not supported by this endpoint.".to_string()
    } else {
        format!("RPC error: {}", error)
    }
}

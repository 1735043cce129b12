//! Log sanitization
//!
//! Invitations carry a funding account address, its private key, and an
//! invite code that doubles as an access token. None of these may appear in
//! full in logs: full addresses and tx hashes allow chain correlation, and
//! the key/code grant access outright.

/// Sanitize an EOA address for logs
///
/// Format: "0x5209...7069" (first 6 + last 4 chars). Enough to tell
/// addresses apart in debug output without enabling chain correlation.
pub fn sanitize_address(address: &str) -> String {
    if address.len() < 12 {
        return "<invalid-address>".to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Sanitize a transaction hash for logs
///
/// Format: "0xdeadbe...beef" (first 8 + last 4 chars)
pub fn sanitize_tx_hash(tx_hash: &str) -> String {
    if tx_hash.len() < 16 {
        return "<invalid-tx-hash>".to_string();
    }
    format!("{}...{}", &tx_hash[..8], &tx_hash[tx_hash.len() - 4..])
}

/// Sanitize an invitation code - only reveal enough to correlate a log line
/// with a support ticket
pub fn sanitize_code(code: &str) -> String {
    if code.len() < 6 {
        return "<invalid-code>".to_string();
    }
    format!("{}...{}", &code[..2], &code[code.len() - 2..])
}

/// Invitation funding keys are never logged, not even partially
pub fn sanitize_key(_key: &str) -> &'static str {
    "[invite_key_redacted]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_address() {
        let addr = "0x52098ce3e9f5a19f0e9ba9a57d466e0b3ca27069";
        assert_eq!(sanitize_address(addr), "0x5209...7069");
        assert_eq!(sanitize_address("0x12"), "<invalid-address>");
    }

    #[test]
    fn test_sanitize_tx_hash() {
        let hash = "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";
        assert_eq!(sanitize_tx_hash(hash), "0x88df01...944b");
        assert_eq!(sanitize_tx_hash("0xabc"), "<invalid-tx-hash>");
    }

    #[test]
    fn test_sanitize_code() {
        assert_eq!(sanitize_code("ABCDEF234567"), "AB...67");
    }

    #[test]
    fn test_key_fully_redacted() {
        assert_eq!(sanitize_key("super-secret"), "[invite_key_redacted]");
    }
}

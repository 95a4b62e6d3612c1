//! Trading wallet: keypair loading and balance pre-checks

use solana_sdk::signature::Keypair;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::trading::lamports_to_sol;

/// Base58 secret key, takes precedence over the file
pub const PRIVATE_KEY_ENV: &str = "SNIPER_PRIVATE_KEY";
/// Path to a JSON byte-array keypair file
pub const KEYPAIR_PATH_ENV: &str = "KEYPAIR_PATH";

const DEFAULT_KEYPAIR_PATH: &str = "credentials/keypair.json";

/// Load the signing keypair from the environment
pub fn load_keypair() -> Result<Keypair> {
    if let Ok(secret) = std::env::var(PRIVATE_KEY_ENV) {
        if !secret.trim().is_empty() {
            return parse_secret(secret.trim());
        }
    }

    let path = std::env::var(KEYPAIR_PATH_ENV).unwrap_or_else(|_| DEFAULT_KEYPAIR_PATH.to_string());
    load_keypair_file(Path::new(&path))
}

pub fn load_keypair_file(path: &Path) -> Result<Keypair> {
    debug!("Loading keypair from: {:?}", path);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                tracing::warn!(
                    "Keypair {} has permissions {:o}; consider 'chmod 600'",
                    path.display(),
                    mode & 0o777
                );
            }
        }
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidKeypair(format!("Failed to read keypair {}: {}", path.display(), e))
    })?;
    parse_secret(contents.trim())
}

/// Accepts a JSON byte array or a base58 string
pub fn parse_secret(secret: &str) -> Result<Keypair> {
    let bytes: Vec<u8> = if secret.starts_with('[') {
        serde_json::from_str(secret)
            .map_err(|e| Error::InvalidKeypair(format!("Failed to parse keypair JSON: {}", e)))?
    } else {
        bs58::decode(secret)
            .into_vec()
            .map_err(|e| Error::InvalidKeypair(format!("Invalid base58 key: {}", e)))?
    };

    Keypair::from_bytes(&bytes)
        .map_err(|e| Error::InvalidKeypair(format!("Invalid keypair bytes: {}", e)))
}

/// Fail unless `lamports` covers `required_sol`
pub fn ensure_balance(lamports: u64, required_sol: f64) -> Result<()> {
    let available = lamports_to_sol(lamports);
    if available < required_sol {
        return Err(Error::InsufficientBalance {
            available,
            required: required_sol,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Signer;
    use std::io::Write;

    #[test]
    fn test_parse_base58_and_json() {
        let keypair = Keypair::new();

        let from_b58 = parse_secret(&keypair.to_base58_string()).unwrap();
        assert_eq!(from_b58.pubkey(), keypair.pubkey());

        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let from_json = parse_secret(&json).unwrap();
        assert_eq!(from_json.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_invalid_secret() {
        assert!(matches!(parse_secret("0OIl"), Err(Error::InvalidKeypair(_))));
        assert!(matches!(parse_secret("[1,2,3]"), Err(Error::InvalidKeypair(_))));
    }

    #[test]
    fn test_load_file() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{:?}", keypair.to_bytes().to_vec()).unwrap();

        let loaded = load_keypair_file(file.path()).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_ensure_balance() {
        use tokio_test::assert_ok;
        assert_ok!(ensure_balance(1_000_000_000, 1.0));
        assert!(matches!(
            ensure_balance(999_999_999, 1.0),
            Err(Error::InsufficientBalance { .. })
        ));
    }
}

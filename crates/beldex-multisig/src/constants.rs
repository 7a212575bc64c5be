use serde::{Deserialize, Serialize};

/// Maximum number of signers allowed in a multisig group.
pub const MULTISIG_MAX_SIGNERS: usize = 16;

/// Minimum threshold required for a valid multisig configuration.
pub const MULTISIG_MIN_THRESHOLD: usize = 2;

/// Prefix of encoded key-exchange messages.
pub const MULTISIG_INFO_PREFIX: &str = "MultisigV1";

/// Prefix of encoded signing sets.
pub const MULTISIG_TX_SET_PREFIX: &str = "MultisigTxSetV1";

/// Kinds of key-exchange message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultisigMsgType {
    /// Round 1: signer key and view share.
    KexInit,
    /// Intermediate group keys.
    KexRound,
    /// Full-size group keys, consumed by finalize.
    KexFinal,
}

impl MultisigMsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultisigMsgType::KexInit => "kex_init",
            MultisigMsgType::KexRound => "kex_round",
            MultisigMsgType::KexFinal => "kex_final",
        }
    }
}

/// Size of the signer groups for an `threshold`-of-`signers` wallet.
///
/// Any `threshold` signers include at least one member of every group of
/// this size.
pub fn group_size(threshold: usize, signers: usize) -> usize {
    signers + 1 - threshold
}

/// Number of `exchange` rounds needed between `make` and `finalize`.
pub fn kex_rounds_required(threshold: usize, signers: usize) -> usize {
    group_size(threshold, signers).saturating_sub(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_size() {
        assert_eq!(group_size(2, 2), 1);
        assert_eq!(group_size(2, 3), 2);
        assert_eq!(group_size(2, 4), 3);
        assert_eq!(group_size(3, 3), 1);
    }

    #[test]
    fn test_kex_rounds_required() {
        assert_eq!(kex_rounds_required(2, 2), 0);
        assert_eq!(kex_rounds_required(2, 3), 0);
        assert_eq!(kex_rounds_required(2, 4), 1);
        assert_eq!(kex_rounds_required(2, 5), 2);
        assert_eq!(kex_rounds_required(4, 5), 0);
    }

    #[test]
    fn test_msg_type_serde() {
        let json = serde_json::to_string(&MultisigMsgType::KexFinal).unwrap();
        assert_eq!(json, "\"kex_final\"");
        assert_eq!(MultisigMsgType::KexInit.as_str(), "kex_init");
    }
}

//! Per channel configuration.

use crate::error::Error;

/// Parameters governing the updates accepted by a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "use-serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase", default)
)]
pub struct ChannelConfig {
    /// Maximum number of HTLCs that can be pending at the same time.
    pub max_pending_htlcs: usize,
    /// Relative delay, in blocks, before the owner of a commitment can spend
    /// its output.
    pub csv_delay_blocks: u32,
    /// Number of blocks before a pending HTLC times out.
    pub htlc_timeout_blocks: u32,
    /// Minimum amount accepted for an HTLC.
    pub min_htlc_amount: u64,
    /// Fee rate used for close and punish transactions.
    pub fee_rate_per_vb: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_pending_htlcs: 10,
            csv_delay_blocks: 144,
            htlc_timeout_blocks: 40,
            min_htlc_amount: 1,
            fee_rate_per_vb: 2,
        }
    }
}

impl ChannelConfig {
    /// Checks that the configuration can be used to open a channel.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_pending_htlcs == 0 {
            return Err(Error::InvalidParameters(
                "At least one pending htlc must be allowed".to_string(),
            ));
        }

        // A zero delay cannot be expressed by `older` and would remove the
        // revocation window.
        if self.csv_delay_blocks == 0 || self.csv_delay_blocks >= 1 << 16 {
            return Err(Error::InvalidParameters(format!(
                "Invalid csv delay {}",
                self.csv_delay_blocks
            )));
        }

        if self.htlc_timeout_blocks == 0 {
            return Err(Error::InvalidParameters(
                "Htlc timeout must be greater than zero".to_string(),
            ));
        }

        if self.min_htlc_amount == 0 {
            return Err(Error::InvalidParameters(
                "Minimum htlc amount must be greater than zero".to_string(),
            ));
        }

        lnchannel::util::validate_fee_rate(self.fee_rate_per_vb)
            .map_err(|_| Error::InvalidParameters("Fee rate too high".to_string()))
    }
}

//! Per-generation auction parameter access.
//!
//! Different contract generations expose different accessor sets. This
//! module models that as a small capability interface with one
//! implementation per generation, selected from the stored version tag,
//! instead of scattering per-call fallbacks through the reconciler.
//! Fields an accessor cannot provide fall back to documented historical
//! defaults.

use alloy::primitives::{Address, U256};
use alloy::providers::DynProvider;
use tracing::debug;

use super::contracts::{IAuctionV0, IAuctionV1};
use crate::domain::AuctionVersion;
use crate::error::IndexerError;

/// Historical decay rate (0.995 per step, ray-scaled) used by contracts
/// whose accessor is absent or reverts.
fn default_step_decay_rate() -> U256 {
    U256::from(995_000_000_000_000_000_000_000_000_u128)
}

/// Historical starting price for contracts without the accessor.
fn default_starting_price() -> U256 {
    U256::from(1_000_000_u64)
}

/// Seconds between price steps on contracts without the accessor.
const DEFAULT_STEP_DURATION: u64 = 36;

/// Round length in seconds (one day) on contracts without the accessor.
const DEFAULT_ROUND_LENGTH: u64 = 86_400;

/// Auction parameters resolved at deployment time, after per-field
/// fallbacks have been applied.
#[derive(Debug, Clone)]
pub struct AuctionParams {
    /// Price decay rate per step.
    pub step_decay_rate: U256,
    /// Starting price of each round.
    pub starting_price: U256,
    /// Seconds between price updates.
    pub step_duration: u64,
    /// Round length in seconds.
    pub round_length: u64,
}

/// Capability set a contract generation may provide. Absent capabilities
/// return an error which [`VersionedAuction::params_with_defaults`] maps
/// to the historical default.
trait AuctionCapabilities {
    async fn want_token(&self) -> Result<Address, IndexerError>;
    async fn step_decay_rate(&self) -> Result<U256, IndexerError>;
    async fn step_duration(&self) -> Result<u64, IndexerError>;
    async fn round_length(&self) -> Result<u64, IndexerError>;
    async fn starting_price(&self) -> Result<U256, IndexerError>;
}

struct V0Abi {
    contract: IAuctionV0::IAuctionV0Instance<DynProvider>,
}

impl AuctionCapabilities for V0Abi {
    async fn want_token(&self) -> Result<Address, IndexerError> {
        self.contract.want().call().await.map_err(IndexerError::rpc)
    }

    async fn step_decay_rate(&self) -> Result<U256, IndexerError> {
        self.contract
            .stepDecayRate()
            .call()
            .await
            .map_err(IndexerError::rpc)
    }

    async fn step_duration(&self) -> Result<u64, IndexerError> {
        // No accessor on this generation.
        Err(IndexerError::Decode(
            "step duration accessor absent on legacy abi".to_string(),
        ))
    }

    async fn round_length(&self) -> Result<u64, IndexerError> {
        let raw = self
            .contract
            .auctionLength()
            .call()
            .await
            .map_err(IndexerError::rpc)?;
        u64::try_from(raw).map_err(|_| IndexerError::Decode("round length overflow".to_string()))
    }

    async fn starting_price(&self) -> Result<U256, IndexerError> {
        self.contract
            .startingPrice()
            .call()
            .await
            .map_err(IndexerError::rpc)
    }
}

struct V1Abi {
    contract: IAuctionV1::IAuctionV1Instance<DynProvider>,
}

impl AuctionCapabilities for V1Abi {
    async fn want_token(&self) -> Result<Address, IndexerError> {
        self.contract.want().call().await.map_err(IndexerError::rpc)
    }

    async fn step_decay_rate(&self) -> Result<U256, IndexerError> {
        self.contract
            .stepDecayRate()
            .call()
            .await
            .map_err(IndexerError::rpc)
    }

    async fn step_duration(&self) -> Result<u64, IndexerError> {
        let raw = self
            .contract
            .stepDuration()
            .call()
            .await
            .map_err(IndexerError::rpc)?;
        u64::try_from(raw).map_err(|_| IndexerError::Decode("step duration overflow".to_string()))
    }

    async fn round_length(&self) -> Result<u64, IndexerError> {
        let raw = self
            .contract
            .auctionLength()
            .call()
            .await
            .map_err(IndexerError::rpc)?;
        u64::try_from(raw).map_err(|_| IndexerError::Decode("round length overflow".to_string()))
    }

    async fn starting_price(&self) -> Result<U256, IndexerError> {
        self.contract
            .startingPrice()
            .call()
            .await
            .map_err(IndexerError::rpc)
    }
}

enum Abi {
    V0(V0Abi),
    V1(V1Abi),
}

/// Accessor facade over one deployed auction, dispatching to the
/// capability implementation matching its ABI generation.
pub struct VersionedAuction {
    version: AuctionVersion,
    abi: Abi,
}

impl VersionedAuction {
    /// Binds the accessor set matching `version` to the contract at
    /// `address`.
    #[must_use]
    pub fn new(version: AuctionVersion, address: Address, provider: DynProvider) -> Self {
        let abi = match version {
            AuctionVersion::V0 => Abi::V0(V0Abi {
                contract: IAuctionV0::new(address, provider),
            }),
            AuctionVersion::V1 => Abi::V1(V1Abi {
                contract: IAuctionV1::new(address, provider),
            }),
        };
        Self { version, abi }
    }

    /// ABI generation this facade dispatches to.
    #[must_use]
    pub const fn version(&self) -> AuctionVersion {
        self.version
    }

    /// Resolves the want token via contract call.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Rpc`] when the call fails; there is no
    /// meaningful default for the want token, so the caller retries.
    pub async fn want_token(&self) -> Result<Address, IndexerError> {
        match &self.abi {
            Abi::V0(abi) => abi.want_token().await,
            Abi::V1(abi) => abi.want_token().await,
        }
    }

    /// Fetches all decay parameters, substituting the documented default
    /// for any field whose accessor reverts or is absent.
    pub async fn params_with_defaults(&self) -> AuctionParams {
        let step_decay_rate = match self.step_decay_rate().await {
            Ok(v) => v,
            Err(e) => {
                debug!(version = %self.version, error = %e, "step decay rate unavailable, using default");
                default_step_decay_rate()
            }
        };
        let starting_price = match self.starting_price().await {
            Ok(v) => v,
            Err(e) => {
                debug!(version = %self.version, error = %e, "starting price unavailable, using default");
                default_starting_price()
            }
        };
        let step_duration = match self.step_duration().await {
            Ok(v) => v,
            Err(e) => {
                debug!(version = %self.version, error = %e, "step duration unavailable, using default");
                DEFAULT_STEP_DURATION
            }
        };
        let round_length = match self.round_length().await {
            Ok(v) => v,
            Err(e) => {
                debug!(version = %self.version, error = %e, "round length unavailable, using default");
                DEFAULT_ROUND_LENGTH
            }
        };

        AuctionParams {
            step_decay_rate,
            starting_price,
            step_duration,
            round_length,
        }
    }

    async fn step_decay_rate(&self) -> Result<U256, IndexerError> {
        match &self.abi {
            Abi::V0(abi) => abi.step_decay_rate().await,
            Abi::V1(abi) => abi.step_decay_rate().await,
        }
    }

    async fn step_duration(&self) -> Result<u64, IndexerError> {
        match &self.abi {
            Abi::V0(abi) => abi.step_duration().await,
            Abi::V1(abi) => abi.step_duration().await,
        }
    }

    async fn round_length(&self) -> Result<u64, IndexerError> {
        match &self.abi {
            Abi::V0(abi) => abi.round_length().await,
            Abi::V1(abi) => abi.round_length().await,
        }
    }

    async fn starting_price(&self) -> Result<U256, IndexerError> {
        match &self.abi {
            Abi::V0(abi) => abi.starting_price().await,
            Abi::V1(abi) => abi.starting_price().await,
        }
    }
}

impl std::fmt::Debug for VersionedAuction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedAuction")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

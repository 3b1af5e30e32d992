//! Solidity bindings for the tracked contracts.
//!
//! Events and call interfaces are generated with `alloy::sol!`. The two
//! factory generations emit deployment events with different argument
//! lists, so each lives in its own module and is re-exported under a
//! versioned name.

use alloy::sol;

sol! {
    /// Round start. Emitted by every auction generation.
    #[derive(Debug)]
    event AuctionKicked(address indexed from, uint256 available);

    /// Purchase. Only emitted reliably by the modern generation.
    #[derive(Debug)]
    event AuctionTaken(address indexed from, address indexed taker, uint256 amountTaken, uint256 amountPaid);

    /// ERC-20 transfer, used by the purchase fallback for legacy auctions.
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    #[sol(rpc)]
    interface IERC20 {
        function symbol() external view returns (string);
        function name() external view returns (string);
        function decimals() external view returns (uint8);
    }

    /// Legacy auction accessors. No step-duration getter exists on this
    /// generation; the reconciler substitutes a historical default.
    #[sol(rpc)]
    interface IAuctionV0 {
        function want() external view returns (address);
        function stepDecayRate() external view returns (uint256);
        function auctionLength() external view returns (uint256);
        function startingPrice() external view returns (uint256);
    }

    /// Modern auction accessors (full set).
    #[sol(rpc)]
    interface IAuctionV1 {
        function want() external view returns (address);
        function stepDecayRate() external view returns (uint256);
        function stepDuration() external view returns (uint256);
        function auctionLength() external view returns (uint256);
        function startingPrice() external view returns (uint256);
    }
}

mod v0 {
    use alloy::sol;

    sol! {
        /// Legacy factory deployment: want token in the arguments.
        #[derive(Debug)]
        event DeployedNewAuction(address indexed auction, address indexed want, address deployer);
    }
}

mod v1 {
    use alloy::sol;

    sol! {
        /// Modern factory deployment: want token resolved via `want()`.
        #[derive(Debug)]
        event DeployedNewAuction(address indexed auction, address deployer);
    }
}

pub(crate) use v0::DeployedNewAuction as DeployedNewAuctionV0;
pub(crate) use v1::DeployedNewAuction as DeployedNewAuctionV1;

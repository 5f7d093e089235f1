//! Contract bindings for the lending platform and its token.
//!
//! Bindings are a deliberate subset: only the read/write surface the
//! monitor actually uses. The platform also exposes borrower/lender flows
//! (requestLoan, fundLoan, repayLoan) that belong to the web front end.

use alloy::sol;

sol! {
    /// Loan record as stored by the platform.
    ///
    /// `getLoanDetails` returns a zeroed struct for ids that were never
    /// assigned, so callers must check the borrower address before
    /// trusting the rest of the fields.
    #[derive(Debug)]
    struct LoanRecord {
        uint256 id;
        address borrower;
        address lender;
        uint256 amount;
        uint256 collateralAmount;
        uint256 interest;
        uint256 startTime;
        uint256 duration;
        bool active;
        bool funded;
        string ipfsHash;
        bytes32 loanAgreementHash;
    }

    /// LendingPlatform interface (subset for liquidation monitoring).
    #[sol(rpc)]
    interface ILendingPlatform {
        /// Highest assigned loan id. Ids are 1-based and never reused.
        function loanCounter() external view returns (uint256);

        function getLoanDetails(uint256 _id) external view returns (LoanRecord memory);

        /// Collateral price in borrowed-asset terms, 1e18 fixed-point.
        ///
        /// This is the accessor the platform's own `liquidate` precondition
        /// reads. A separate 8-decimal feed exists for the admin panel and
        /// must not be used for liquidation math.
        function getEthPrice() external view returns (uint256);

        /// Force-close an under-collateralized loan. Reverts if the
        /// platform's own collateral check no longer passes.
        function liquidate(uint256 _id) external;
    }

    /// LendingToken interface (borrowed asset).
    #[sol(rpc)]
    interface ILendingToken {
        function balanceOf(address account) external view returns (uint256);

        function approve(address spender, uint256 amount) external returns (bool);

        /// Demo-only mint so a fresh account can cover liquidation repayments.
        function faucet() external;
    }
}

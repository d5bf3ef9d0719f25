//! On-chain ABI of the payroll ledger and the stablecoin it holds.

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolInterface;

use crate::ledger::types::{LedgerError, Payee, PaymentRequest};

sol! {
    interface IPayrollLedger {
        struct PayeeInfo {
            address wallet;
            uint256 salary;
            uint256 lastPayment;
            bool active;
        }

        struct PaymentRequestInfo {
            uint256 requestId;
            address payee;
            uint256 amount;
            uint256 createdAt;
            bytes32 settlementId;
            bool settled;
        }

        function addPayee(address payee, uint256 salary) external;
        function addPayees(address[] calldata payees, uint256[] calldata salaries) external;
        function updatePayeeSalary(address payee, uint256 newSalary) external;
        function deactivatePayee(address payee) external;
        function createPaymentRequests() external returns (uint256[] memory requestIds, uint256 totalAmount);
        function markPaymentSettled(uint256 requestId, bytes32 settlementId, bytes32 txHash) external;
        function setRevenueThreshold(uint256 threshold) external;

        function getActivePayees() external view returns (address[] memory);
        function getPayee(address payee) external view returns (PayeeInfo memory);
        function getPaymentRequest(uint256 requestId) external view returns (PaymentRequestInfo memory);
        function getTreasuryBalance() external view returns (uint256);
        function shouldTriggerPayroll(uint256 currentRevenue) external view returns (bool);
        function revenueThreshold() external view returns (uint256);

        #[derive(Debug, PartialEq, Eq)]
        event PayeeAdded(address indexed payee, uint256 salary);
        #[derive(Debug, PartialEq, Eq)]
        event PayeeUpdated(address indexed payee, uint256 oldSalary, uint256 newSalary);
        #[derive(Debug, PartialEq, Eq)]
        event PayeeDeactivated(address indexed payee);
        #[derive(Debug, PartialEq, Eq)]
        event PaymentRequestCreated(uint256 indexed requestId, address indexed payee, uint256 amount);
        #[derive(Debug, PartialEq, Eq)]
        event PaymentSettled(uint256 indexed requestId, bytes32 settlementId, bytes32 txHash);
        #[derive(Debug, PartialEq, Eq)]
        event PayrollTriggered(uint256 totalAmount, uint256 payeeCount);
        #[derive(Debug, PartialEq, Eq)]
        event TreasuryFunded(address indexed from, uint256 amount);
        #[derive(Debug, PartialEq, Eq)]
        event RevenueThresholdUpdated(uint256 oldThreshold, uint256 newThreshold);

        error PayeeAlreadyExists(address payee);
        error PayeeNotFound(address payee);
        error InvalidAddress();
        error ZeroAmount();
        error ArrayLengthMismatch();
        error InsufficientBalance(uint256 required, uint256 available);
        error OnlyX402Facilitator();
        error OwnableUnauthorizedAccount(address account);
        error PaymentAlreadySettled(uint256 requestId);
        error PaymentRequestNotFound(uint256 requestId);
    }

    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

pub use IPayrollLedger::{
    PayeeAdded, PayeeDeactivated, PayeeUpdated, PaymentRequestCreated, PaymentSettled,
    PayrollTriggered, RevenueThresholdUpdated, TreasuryFunded,
};

/// Request ids and timestamps are uint256 on-chain but always fit in u64.
pub(crate) fn to_u64(value: U256) -> u64 {
    value.saturating_to()
}

/// Decode revert data into a typed ledger error, if it is one of ours.
pub fn decode_ledger_error(data: &[u8]) -> Option<LedgerError> {
    use IPayrollLedger::IPayrollLedgerErrors as E;

    let err = match E::abi_decode(data).ok()? {
        E::PayeeAlreadyExists(e) => LedgerError::PayeeAlreadyExists(e.payee),
        E::PayeeNotFound(e) => LedgerError::PayeeNotFound(e.payee),
        E::InvalidAddress(_) => LedgerError::InvalidAddress,
        E::ZeroAmount(_) => LedgerError::ZeroAmount,
        E::ArrayLengthMismatch(_) => LedgerError::ArrayLengthMismatch,
        E::InsufficientBalance(e) => LedgerError::InsufficientBalance {
            required: e.required,
            available: e.available,
        },
        E::OnlyX402Facilitator(_) => LedgerError::OnlyX402Facilitator,
        E::OwnableUnauthorizedAccount(e) => LedgerError::Unauthorized(e.account),
        E::PaymentAlreadySettled(e) => LedgerError::PaymentAlreadySettled(to_u64(e.requestId)),
        E::PaymentRequestNotFound(e) => LedgerError::PaymentRequestNotFound(to_u64(e.requestId)),
    };
    Some(err)
}

impl IPayrollLedger::PayeeInfo {
    /// Unknown payees come back as a zeroed struct.
    pub fn into_payee(self) -> Option<Payee> {
        (self.wallet != Address::ZERO).then(|| Payee {
            wallet: self.wallet,
            salary: self.salary,
            last_payment: to_u64(self.lastPayment),
            active: self.active,
        })
    }
}

impl IPayrollLedger::PaymentRequestInfo {
    pub fn into_request(self) -> Option<PaymentRequest> {
        (self.payee != Address::ZERO).then(|| PaymentRequest {
            request_id: to_u64(self.requestId),
            payee: self.payee,
            amount: self.amount,
            created_at: to_u64(self.createdAt),
            settlement_id: self.settlementId,
            settled: self.settled,
        })
    }
}

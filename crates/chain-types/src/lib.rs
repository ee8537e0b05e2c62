//! Wire-format data model shared by the resource-limits, iterator-cache,
//! apply-context, transaction-context and controller crates: actions,
//! transactions, blocks, receipts, table rows and resource-billing objects.

pub mod account;
pub mod action;
pub mod block;
pub mod digest;
pub mod resource;
pub mod table;
pub mod transaction;
pub mod wire;

pub use account::{
    AccountName,
    PermissionLevel,
};
pub use action::{
    Action,
    ActionReceipt,
    ActionTrace,
};
pub use block::{
    BlockHeader,
    BlockState,
    BlockStatus,
    PendingState,
};
pub use resource::{
    ElasticLimitParameters,
    ExponentialAverage,
    ResourceLimitsObject,
    ResourceUsageObject,
};
pub use table::{
    KeyValueObject,
    SecondaryIndexObject,
    SecondaryKey,
    TableIdObject,
};
pub use transaction::{
    SignedTransaction,
    TransactionReceipt,
    TransactionStatus,
};

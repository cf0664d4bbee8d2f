//! morphdrive-api-core: channel addressing, driver expressions and the host contract (engine-agnostic)

pub mod channel;
pub mod expression;
pub mod host;
pub mod ledger;
pub mod write_ops;

pub use channel::{ChannelRef, PathError, TransformChannel, TransformKind};
pub use expression::{Expression, TransformReading, TransformSpace, VarSource, VariableBinding};
pub use host::{Basis, PropertyOwner, RigHost, IDENTITY_BASIS};
pub use ledger::{LedgerRole, LedgerTerm, TermLedger, LEDGER_VERSION};
pub use write_ops::{ChannelWrite, WriteBatch};

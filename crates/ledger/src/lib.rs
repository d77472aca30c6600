//! Order and payment ledger.
//!
//! The ledger persists [`domain::Order`] and [`domain::Payment`] records and an
//! append-only status history. It never changes a status on its own: every
//! transition is requested by the saga coordinator as a conditional update
//! keyed on the expected prior status, and fails with
//! [`LedgerError::StatusConflict`] if another writer got there first.

pub mod error;
pub mod history;
pub mod memory;
pub mod page;
pub mod postgres;
pub mod store;

pub use error::{LedgerError, Result};
pub use history::{EntityKind, StatusChange};
pub use memory::InMemoryLedger;
pub use page::{Page, PageRequest};
pub use postgres::PostgresLedger;
pub use store::{Inserted, LedgerStore, Settlement};

//! rollcall-store: SQLite persistence for enrolled identities and
//! attendance records.

pub mod codec;
pub mod store;

pub use codec::CodecError;
pub use store::{AttendanceStore, StoreError, StoredAttendance};

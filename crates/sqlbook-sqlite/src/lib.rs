//! SQLite backend for sqlbook.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! [`SqliteConnection`] implements the blocking `Connection` trait from
//! `sqlbook-core` on top of the bundled libsqlite3. Pair it with
//! `BuiltinDialect::Sqlite`.
//!
//! ```rust,ignore
//! use sqlbook_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool`, integers | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text`, `Decimal`, `Json` | TEXT |
//! | `Bytes`, `Uuid` | BLOB |
//! | `Date` (days), `Time`, `Timestamp` (microseconds) | INTEGER |
//!
//! INTEGER columns read back as `Int` when they fit in 32 bits and as
//! `BigInt` otherwise.
//!
//! # Thread Safety
//!
//! The database handle sits behind a mutex, so a connection can be shared
//! between threads. A poisoned lock reports a `Disconnected` error.

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, SqliteTransaction};

use libsqlite3_sys as ffi;
use std::ffi::CStr;

/// The SQLite library version, e.g. `"3.46.0"`.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static, NUL-terminated string
    unsafe { CStr::from_ptr(ffi::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}

/// The SQLite library version number, e.g. `3046000`.
pub fn sqlite_version_number() -> i32 {
    // SAFETY: always safe to call
    unsafe { ffi::sqlite3_libversion_number() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_sqlite_3() {
        assert!(sqlite_version().starts_with('3'), "got {}", sqlite_version());
        assert!(sqlite_version_number() >= 3_000_000);
    }
}

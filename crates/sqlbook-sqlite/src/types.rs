//! Conversion between `Value` and SQLite storage classes.
//!
//! SQLite stores everything as INTEGER, REAL, TEXT, BLOB or NULL. Dates,
//! times and timestamps are stored as their integer encodings so they
//! compare and sort correctly inside the database.

use libsqlite3_sys as ffi;
use sqlbook_core::Value;
use std::ffi::{CStr, c_int};

/// Bind `value` to the 1-based parameter `index` of `stmt`.
///
/// Text and blobs are copied by SQLite (`SQLITE_TRANSIENT`), so the value
/// may be dropped as soon as this returns.
///
/// # Safety
///
/// `stmt` must be a valid, non-finalized prepared statement.
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: caller guarantees stmt is valid; every pointer passed below
    // outlives the call and SQLite copies the bytes.
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int(stmt, index, c_int::from(*b)),
            Value::TinyInt(v) => ffi::sqlite3_bind_int(stmt, index, c_int::from(*v)),
            Value::SmallInt(v) => ffi::sqlite3_bind_int(stmt, index, c_int::from(*v)),
            Value::Int(v) | Value::Date(v) => ffi::sqlite3_bind_int(stmt, index, *v),
            Value::BigInt(v) | Value::Time(v) | Value::Timestamp(v) | Value::TimestampTz(v) => {
                ffi::sqlite3_bind_int64(stmt, index, *v)
            }
            Value::Unsigned(v) => match i64::try_from(*v) {
                Ok(signed) => ffi::sqlite3_bind_int64(stmt, index, signed),
                // Beyond i64 range: keep the exact digits.
                Err(_) => bind_text(stmt, index, &v.to_string()),
            },
            Value::Float(v) => ffi::sqlite3_bind_double(stmt, index, f64::from(*v)),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Decimal(s) | Value::Text(s) => bind_text(stmt, index, s),
            Value::Json(j) => bind_text(stmt, index, &j.to_string()),
            Value::Bytes(b) => bind_blob(stmt, index, b),
            Value::Uuid(u) => bind_blob(stmt, index, u),
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, text: &str) -> c_int {
    let Ok(len) = c_int::try_from(text.len()) else {
        return ffi::SQLITE_TOOBIG;
    };
    // SAFETY: pointer and length describe `text`; SQLite copies the bytes.
    unsafe {
        ffi::sqlite3_bind_text(
            stmt,
            index,
            text.as_ptr().cast(),
            len,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

unsafe fn bind_blob(stmt: *mut ffi::sqlite3_stmt, index: c_int, bytes: &[u8]) -> c_int {
    let Ok(len) = c_int::try_from(bytes.len()) else {
        return ffi::SQLITE_TOOBIG;
    };
    // SAFETY: pointer and length describe `bytes`; SQLite copies them.
    unsafe {
        ffi::sqlite3_bind_blob(
            stmt,
            index,
            bytes.as_ptr().cast(),
            len,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

/// Read column `index` of the current row.
///
/// INTEGER becomes `Int` when it fits in 32 bits and `BigInt` otherwise.
///
/// # Safety
///
/// `stmt` must be valid and positioned on a row (last step returned
/// `SQLITE_ROW`).
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: caller guarantees stmt is on a row; the text and blob pointers
    // are copied before the next SQLite call on this statement.
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => {
                let v = ffi::sqlite3_column_int64(stmt, index);
                i32::try_from(v).map_or(Value::BigInt(v), Value::Int)
            }
            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() {
                    return Value::Null;
                }
                let bytes = std::slice::from_raw_parts(ptr, usize::try_from(len).unwrap_or(0));
                Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() || len <= 0 {
                    return Value::Bytes(Vec::new());
                }
                let bytes =
                    std::slice::from_raw_parts(ptr.cast::<u8>(), usize::try_from(len).unwrap_or(0));
                Value::Bytes(bytes.to_vec())
            }
            _ => Value::Null,
        }
    }
}

/// Name of result column `index`.
///
/// # Safety
///
/// `stmt` must be a valid prepared statement.
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller guarantees stmt is valid; the name is copied out.
    unsafe {
        let ptr = ffi::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }
}

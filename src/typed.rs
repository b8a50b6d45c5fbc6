//! Typed accessors over the string-valued node API.
//!
//! Values are stored in their `Display` form. A stored value that does not
//! parse as the requested type reads as the default; absent keys do too.
//! Store-level failures (I/O, lock, removed node) still surface as errors.

use crate::error::Result;
use crate::node::Preferences;
use std::path::{Path, PathBuf};
use std::str::FromStr;

impl Preferences {
    fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        Ok(self
            .get_opt(key)?
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(default))
    }

    /// `true`/`false` (case-insensitive); anything else reads as `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get_opt(key)? {
            Some(raw) if raw.eq_ignore_ascii_case("true") => true,
            Some(raw) if raw.eq_ignore_ascii_case("false") => false,
            _ => default,
        })
    }

    /// Store `value` as `true`/`false`.
    pub fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, if value { "true" } else { "false" })
    }

    /// Decimal `i32`; out-of-range or non-numeric values read as `default`.
    pub fn get_i32(&self, key: &str, default: i32) -> Result<i32> {
        self.get_parsed(key, default)
    }

    /// Store `value` in decimal.
    pub fn put_i32(&self, key: &str, value: i32) -> Result<()> {
        self.put(key, &value.to_string())
    }

    /// Decimal `i64`.
    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        self.get_parsed(key, default)
    }

    /// Store `value` in decimal.
    pub fn put_i64(&self, key: &str, value: i64) -> Result<()> {
        self.put(key, &value.to_string())
    }

    /// Floating-point value.
    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
        self.get_parsed(key, default)
    }

    /// Store `value` in its shortest round-tripping form.
    pub fn put_f64(&self, key: &str, value: f64) -> Result<()> {
        self.put(key, &value.to_string())
    }

    /// Same as [`get`](Self::get); here for symmetry with the typed getters.
    pub fn get_string(&self, key: &str, default: &str) -> Result<String> {
        self.get(key, default)
    }

    /// Same as [`put`](Self::put).
    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value)
    }

    /// File system path; an empty stored value reads as `default`.
    pub fn get_path(&self, key: &str, default: &Path) -> Result<PathBuf> {
        Ok(match self.get_opt(key)? {
            Some(raw) if !raw.is_empty() => PathBuf::from(raw),
            _ => default.to_path_buf(),
        })
    }

    /// Store `value`. Non-UTF-8 paths are stored lossily.
    pub fn put_path(&self, key: &str, value: &Path) -> Result<()> {
        self.put(key, &value.to_string_lossy())
    }
}

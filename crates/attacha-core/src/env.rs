//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `RuntimeConfig::from_env` and the
//! logging setup.
//!
//! ```ignore
//! use attacha_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("ATTACHA_NUM_WORKERS", 4);
//! let naming = env_get_bool("ATTACHA_TASK_NAMING", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as `T`, or return `default`
///
/// Unset and unparsable values both fall back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// "1", "true", "yes" and "on" (any case) are true; any other value is false.
/// Unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as `Some(T)` when set and parsable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as a string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a millisecond count as a `Duration`
#[inline]
pub fn env_get_duration_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key).map_or(default, Duration::from_millis)
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET: &str = "__ATTACHA_TEST_UNSET__";

    #[test]
    fn test_unset_returns_default() {
        assert_eq!(env_get::<usize>(UNSET, 42), 42);
        assert!(env_get_bool(UNSET, true));
        assert!(!env_get_bool(UNSET, false));
        assert!(env_get_opt::<usize>(UNSET).is_none());
        assert_eq!(env_get_str(UNSET, "hello"), "hello");
        assert_eq!(env_get_duration_ms(UNSET, Duration::from_millis(5)), Duration::from_millis(5));
        assert!(!env_is_set(UNSET));
    }

    #[test]
    fn test_parsed_values() {
        std::env::set_var("__ATTACHA_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<usize>("__ATTACHA_TEST_NUM__", 0), 123);
        assert_eq!(
            env_get_duration_ms("__ATTACHA_TEST_NUM__", Duration::ZERO),
            Duration::from_millis(123)
        );
        std::env::remove_var("__ATTACHA_TEST_NUM__");

        std::env::set_var("__ATTACHA_TEST_BAD__", "not_a_number");
        assert_eq!(env_get::<usize>("__ATTACHA_TEST_BAD__", 99), 99);
        std::env::remove_var("__ATTACHA_TEST_BAD__");
    }

    #[test]
    fn test_bool_variants() {
        let key = "__ATTACHA_TEST_BOOL__";
        for v in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(key, v);
            assert!(env_get_bool(key, false), "{v} should be true");
        }
        for v in ["0", "false", "garbage"] {
            std::env::set_var(key, v);
            assert!(!env_get_bool(key, true), "{v} should be false");
        }
        std::env::remove_var(key);
    }
}

/// Recognized `Config` keys (spec §3). Any other key is rejected by
/// `ControlAPI::set_config` with `QueueError::Validation`.
pub const MAX_RETRIES_KEY: &str = "max_retries";
pub const BACKOFF_BASE_KEY: &str = "backoff_base";

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_BACKOFF_BASE: i64 = 2;

pub fn is_recognized_key(key: &str) -> bool {
    matches!(key, MAX_RETRIES_KEY | BACKOFF_BASE_KEY)
}

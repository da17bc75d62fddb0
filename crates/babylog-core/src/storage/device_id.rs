// Device ID management.
// Format: "device_<epochMillis>_<random9>"

use chrono::{DateTime, Utc};
use rand::Rng;

use super::kv::KvStore;

pub const DEVICE_ID_KEY: &str = "babylog.device_id";
const DEVICE_ID_PREFIX: &str = "device_";
const SUFFIX_LEN: usize = 9;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Whether `id` matches `device_<digits>_<9 lowercase base-36 chars>`.
pub fn is_valid_device_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix(DEVICE_ID_PREFIX) else {
        return false;
    };
    let Some((millis, suffix)) = rest.split_once('_') else {
        return false;
    };
    !millis.is_empty()
        && millis.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b))
}

pub fn generate_device_id<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{DEVICE_ID_PREFIX}{}_{suffix}", now.timestamp_millis().max(0))
}

/// Get or create the device id stored under [`DEVICE_ID_KEY`].
///
/// A missing or malformed value is replaced. If the store cannot be read or
/// written, the generated id is still returned and only lives for this process.
pub fn get_or_create_device_id<S: KvStore>(store: &mut S, now: DateTime<Utc>) -> String {
    match store.get(DEVICE_ID_KEY) {
        Ok(Some(existing)) if is_valid_device_id(existing.trim()) => {
            return existing.trim().to_string();
        }
        Ok(Some(bad)) => tracing::warn!("Replacing malformed device id: {bad:?}"),
        Ok(None) => {}
        Err(e) => tracing::warn!("Could not read device id: {e}"),
    }

    let device_id = generate_device_id(now, &mut rand::thread_rng());
    if let Err(e) = store.set(DEVICE_ID_KEY, &device_id) {
        tracing::warn!("Device id {device_id} will not survive restart: {e}");
    }
    device_id
}

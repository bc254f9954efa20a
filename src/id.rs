use chrono::Utc;
use rand::Rng;

const SUFFIX_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// `<unix millis>-<9 random base36 chars>`.
///
/// Unique with overwhelming probability; the timestamp prefix is not an ordering
/// guarantee.
pub fn timestamped_id() -> String {
  let mut rng = rand::thread_rng();
  let suffix: String = (0..SUFFIX_LEN)
    .map(|_| SUFFIX_CHARS[rng.gen_range(0..SUFFIX_CHARS.len())] as char)
    .collect();
  format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

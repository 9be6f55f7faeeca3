/// Platform name constants to ensure consistency across the codebase.
/// Platform A is the structured listing source and the reference side of a
/// merge; Platform B exposes encrypted per-show seat layouts.

// User-facing platform names (used in CLI and record tagging)
pub const PLATFORM_A: &str = "platform_a";
pub const PLATFORM_B: &str = "platform_b";

// Seat status digits inside a decrypted seat-layout row
pub const SEAT_AVAILABLE: char = '1';
pub const SEAT_BOOKED: char = '2';

// Tuning defaults; all of these are overridable in config.toml because the
// observed deployments disagree on the exact values.
pub const DEFAULT_MAX_WORKERS: usize = 3;
pub const DEFAULT_SLEEP_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 2;
pub const DEFAULT_RATE_LIMIT_ESCALATION_MS: u64 = 2000;

pub const DEFAULT_SEAT_TOLERANCE: u32 = 5;
pub const DEFAULT_SIGNATURE_SIMILARITY: f64 = 0.4;
pub const DEFAULT_FUZZY_SIMILARITY: f64 = 0.5;

pub const DEFAULT_FALLBACK_CAPACITY: u32 = 400;
pub const DEFAULT_PROBE_OFFSET_RANGE: u32 = 7;

// Platform B reports UTC; shows are keyed in local wall-clock time (+05:30)
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

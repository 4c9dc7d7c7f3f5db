// =============================================================================
// Application identity
// =============================================================================

pub const APP_NAME: &str = "Engauge";
pub const APP_NAME_LOWER: &str = "engauge";
pub const APP_DOT_FOLDER: &str = ".engauge";

// =============================================================================
// Configuration file / environment variables
// =============================================================================

pub const CONFIG_FILE_NAME: &str = "engauge.json";
pub const ENV_CONFIG: &str = "ENGAUGE_CONFIG";
pub const ENV_LOG: &str = "ENGAUGE_LOG";
pub const ENV_ENVIRONMENT: &str = "ENGAUGE_ENV";
pub const ENV_HOST: &str = "ENGAUGE_HOST";
pub const ENV_PORT: &str = "ENGAUGE_PORT";
pub const ENV_DATA_DIR: &str = "ENGAUGE_DATA_DIR";
pub const ENV_TIMEZONE: &str = "ENGAUGE_TIMEZONE";
pub const ENV_SESSION_TTL_MINUTES: &str = "ENGAUGE_SESSION_TTL_MINUTES";
pub const ENV_API_KEY: &str = "ENGAUGE_API_KEY";
pub const ENV_INTERACTIONS_STORAGE: &str = "ENGAUGE_INTERACTIONS_STORAGE";
pub const ENV_STATS_HOURLY: &str = "ENGAUGE_STATS_HOURLY";
pub const ENV_STATS_DAILY: &str = "ENGAUGE_STATS_DAILY";
pub const ENV_STATS_WEEKLY: &str = "ENGAUGE_STATS_WEEKLY";
pub const ENV_STATS_MONTHLY: &str = "ENGAUGE_STATS_MONTHLY";
pub const ENV_STATS_QUARTERLY: &str = "ENGAUGE_STATS_QUARTERLY";
pub const ENV_STATS_YEARLY: &str = "ENGAUGE_STATS_YEARLY";

// =============================================================================
// Server defaults
// =============================================================================

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5390;
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_SESSION_TTL_MINUTES: u64 = 60;

// =============================================================================
// Ingest pipeline constants
// =============================================================================

/// Minimum batch size before the drain loop flushes early.
pub const MIN_BATCH_SIZE: usize = 10;
/// Maximum time the clock loop waits before forcing a flush.
pub const MAX_PROC_WAIT_SECS: u64 = 10;
/// Channel capacity between the ordering buffer and the batch worker.
pub const BATCH_CHANNEL_CAPACITY: usize = MIN_BATCH_SIZE * 2;
/// Delay the ordering buffer holds an interaction before releasing it.
pub const ORDERING_BUFFER_DELAY_SECS: i64 = 3;
/// Ordering buffer sweep tick period.
pub const ORDERING_BUFFER_SWEEP_SECS: u64 = 1;
/// Session cache sweep tick period.
pub const SESSION_SWEEP_SECS: u64 = 60;
/// Maximum accepted body size for `POST /api/interaction`.
pub const INTERACTION_BODY_LIMIT: usize = 2 * 1024;

// =============================================================================
// Shutdown
// =============================================================================

pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

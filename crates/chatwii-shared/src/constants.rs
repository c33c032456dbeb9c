/// Application name
pub const APP_NAME: &str = "Chatwii";

/// Separator between the two sorted user ids of a conversation key
pub const CONVERSATION_KEY_SEPARATOR: char = '_';

/// Characters the realtime backend forbids in path segments, plus the key separator
pub const FORBIDDEN_ID_CHARS: &[char] = &['/', '.', '#', '$', '[', ']', CONVERSATION_KEY_SEPARATOR];

/// Realtime tree roots
pub const MESSAGES_ROOT: &str = "messages";
pub const REACTIONS_ROOT: &str = "reactions";
pub const TYPING_ROOT: &str = "typing";
pub const PRESENCE_ROOT: &str = "presence";

/// Reserved path the realtime backend uses to report its own connectivity
pub const CONNECTED_PATH: &str = ".info/connected";

/// Text shown in place of a deleted message's content
pub const DELETED_MESSAGE_TEXT: &str = "This message has been deleted";

/// Nickname length bounds (characters)
pub const NICKNAME_MIN_LEN: usize = 3;
pub const NICKNAME_MAX_LEN: usize = 20;

/// Nicknames nobody may register
pub const RESERVED_NICKNAMES: &[&str] = &["admin", "administrator", "moderator", "chatwii", "system", "support"];

/// Maximum message length (characters, after trimming)
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Longest accepted reaction, in chars (covers ZWJ emoji sequences).
pub const MAX_REACTION_CHARS: usize = 8;

/// Daily image allowance for standard (non-VIP) users
pub const DAILY_PHOTO_LIMIT: u32 = 10;

/// Typing broadcast debounce window in milliseconds
pub const TYPING_DEBOUNCE_MS: u64 = 300;

/// A typing flag with no update for this long is considered stopped
pub const TYPING_STALE_MS: u64 = 5_000;

/// Time the sync coordinator waits for the message channel before falling back
pub const SYNC_SETUP_TIMEOUT_MS: u64 = 5_000;

/// Minimum spacing between manual reconnect checks
pub const RECONNECT_THROTTLE_MS: u64 = 5_000;

/// Retry policy defaults for connectivity errors
pub const RETRY_MAX_ATTEMPTS: u32 = 5;
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Deadlines for one-shot reads that must fail closed
pub const REPLY_FETCH_TIMEOUT_MS: u64 = 3_000;
pub const NICKNAME_CHECK_TIMEOUT_MS: u64 = 5_000;

/// Number of messages loaded when a conversation is opened
pub const CONVERSATION_PAGE_SIZE: u32 = 100;

/// Site setting that, when "true", blocks sign-in for everyone but admins
pub const MAINTENANCE_MODE_SETTING: &str = "maintenance_mode";

/// Send limiter: burst size, refill rate, and duplicate-text window
pub const SEND_BURST: u32 = 5;
pub const SEND_REFILL_PER_SEC: f64 = 1.0;
pub const DUPLICATE_WINDOW_MS: u64 = 3_000;

/// How often a session sweeps the send limiter, and how long a receiver
/// may sit idle before its bucket is dropped
pub const LIMITER_PURGE_INTERVAL_MS: u64 = 300_000;
pub const LIMITER_MAX_IDLE_MS: u64 = 600_000;

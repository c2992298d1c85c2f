//! Protocol constants and configuration defaults

/// Default Asterisk Manager Interface port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for reading from TCP stream (64KB)
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Buffer allocation size (64KB), used for both initial allocation and growth increments
pub const BUF_CHUNK: usize = 64 * 1024;

/// Maximum size of a single unterminated frame (8MB)
/// The largest legitimate AMI frames are `Command` outputs of a few hundred KB.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Maximum total buffer size (16MB) - safety limit to prevent runaway memory
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Protocol line and frame terminators
pub const LINE_TERMINATOR: &str = "\r\n";
pub const FRAME_TERMINATOR: &str = "\r\n\r\n";

/// First-line prefixes used to classify inbound frames (case-sensitive)
pub const EVENT_PREFIX: &str = "Event: ";
pub const RESPONSE_PREFIX: &str = "Response: ";

/// Banner sent by Asterisk right after the TCP handshake
pub const GREETING_PREFIX: &str = "Asterisk Call Manager";

/// `Response` value reported on success
pub const RESPONSE_SUCCESS: &str = "Success";

/// `Message` value Asterisk sends for an accepted login
pub const AUTH_ACCEPTED_MESSAGE: &str = "Authentication accepted";

/// Event name that terminates a `DBGet` exchange without a `*Complete` event
pub const DB_GET_RESPONSE_EVENT: &str = "DBGetResponse";

/// TCP dial and greeting timeout in milliseconds
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;

/// Delay between a failed generation and the next connection attempt
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1_000;

/// Action response timeout in milliseconds
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 60_000;

/// Keepalive ping period
pub const DEFAULT_PING_INTERVAL_MS: u64 = 5_000;

/// Keepalive ping deadline (must stay below the ping period)
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 3_000;

/// Maximum number of queued items per subscriber before dropping
pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;

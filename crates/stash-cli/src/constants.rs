//! Constants used throughout the CLI.

/// Exit codes for the CLI.
///
/// These follow common Unix conventions:
/// - 0: Success
/// - 1: General error
/// - 2: Misuse of shell command (clap usage errors)
/// - 3+: Application-specific errors
pub mod exit_codes {
    /// Key, backup or store not found.
    pub const NOT_FOUND: i32 = 3;

    /// Invalid user input or arguments.
    pub const INVALID_INPUT: i32 = 4;

    /// Wrong keystore passphrase.
    pub const AUTH_FAILED: i32 = 5;

    /// Backup checksum mismatch.
    pub const INTEGRITY_FAILED: i32 = 6;

    /// Write rejected by the storage quota.
    pub const QUOTA_EXCEEDED: i32 = 7;
}

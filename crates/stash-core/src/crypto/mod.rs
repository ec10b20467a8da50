//! Key material for the codec pipeline and the file keystore.
//!
//! - **DataKey**: random 256-bit key used by ChaCha20-Poly1305 item encryption
//! - **PassphraseSeal**: age/scrypt sealing of the file keystore
//!
//! The data key never lives in the item database; it is held by a
//! [`SecretStore`](crate::storage::SecretStore) implementation.

pub mod key;
pub mod seal;

pub use key::{DataKey, KEY_LENGTH};
pub use seal::{PassphraseSeal, MIN_PASSPHRASE_LENGTH};

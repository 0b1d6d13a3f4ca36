pub mod error;
pub mod hash;
pub mod key;
pub mod map;

pub use error::IdentityError;
pub use hash::hash_metadata;
pub use key::{
    keys_for_update, sanitize_key_path, IdentityKey, IdentityKind, KeyPathVariants, KEY_BASE_PATH,
};
pub use map::{IdentityMap, IdentityRecord, Resolution};

use sha2::{Digest, Sha256};
use tracing::warn;

/// Stable device id for this machine and profile.
///
/// Hashes the OS machine id together with the profile so two profiles on one
/// box register as separate devices. Falls back to a random id when the
/// machine id is unavailable.
pub fn derive_device_id(profile: &str) -> String {
    match machine_uid::get() {
        Ok(machine_id) => hash_device_id(&machine_id, profile),
        Err(e) => {
            warn!("Machine id unavailable ({}), using a random device id", e);
            uuid::Uuid::new_v4().simple().to_string()
        }
    }
}

fn hash_device_id(machine_id: &str, profile: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(machine_id.trim().as_bytes());
    hasher.update(b":");
    hasher.update(profile.as_bytes());
    hex::encode(hasher.finalize())
}

//! Caller verification and account lookup.
//!
//! An application id is derived from the bundle name with HMAC-SHA256
//! under a device secret, so the same bundle always maps to the same id on
//! one device and ids cannot be forged without the secret.

use std::collections::{HashMap, HashSet};

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rdbsync_ipc::CallingIdentity;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Uids per user in the uid space.
pub const UID_RANGE_PER_USER: i32 = 200_000;

/// Decides whether a caller may use a bundle's stores.
pub trait AccessChecker: Send + Sync {
    /// Application id of `bundle_name` for `caller`, `None` if the caller
    /// is not allowed to act for the bundle.
    fn app_id(&self, caller: &CallingIdentity, bundle_name: &str) -> Option<String>;

    /// Instance index of the caller's bundle; `0` for the main instance.
    fn instance_index(&self, caller: &CallingIdentity, bundle_name: &str) -> i32;

    /// Returns true if `caller` may use stores of `bundle_name`.
    fn check_access(&self, caller: &CallingIdentity, bundle_name: &str) -> bool {
        let has_app_id = self
            .app_id(caller, bundle_name)
            .is_some_and(|app_id| !app_id.is_empty());
        has_app_id && self.instance_index(caller, bundle_name) == 0
    }
}

/// [`AccessChecker`] deriving app ids from a device secret.
#[derive(Debug)]
pub struct SignedBundleChecker {
    secret: Vec<u8>,
    denied: RwLock<HashSet<String>>,
    instances: RwLock<HashMap<u32, i32>>,
}

impl SignedBundleChecker {
    /// Creates a checker allowing every bundle.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            denied: RwLock::new(HashSet::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Refuses every later request for `bundle_name`.
    pub fn deny(&self, bundle_name: impl Into<String>) {
        self.denied.write().insert(bundle_name.into());
    }

    /// Reports `index` as the instance index of callers holding `token_id`.
    pub fn set_instance_index(&self, token_id: u32, index: i32) {
        self.instances.write().insert(token_id, index);
    }

    fn sign(&self, bundle_name: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(bundle_name.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

impl AccessChecker for SignedBundleChecker {
    fn app_id(&self, _caller: &CallingIdentity, bundle_name: &str) -> Option<String> {
        if bundle_name.is_empty() || self.denied.read().contains(bundle_name) {
            return None;
        }
        self.sign(bundle_name)
    }

    fn instance_index(&self, caller: &CallingIdentity, _bundle_name: &str) -> i32 {
        self.instances
            .read()
            .get(&caller.token_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Maps callers to device accounts.
pub trait AccountDelegate: Send + Sync {
    /// User id owning `uid`.
    fn user_id(&self, uid: i32) -> String;

    /// Account currently logged in on the device.
    fn current_account(&self) -> String;
}

/// [`AccountDelegate`] with a fixed current account; users are derived
/// from the uid range.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    account: String,
}

impl StaticAccounts {
    /// Creates a delegate reporting `account` as logged in.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

impl AccountDelegate for StaticAccounts {
    fn user_id(&self, uid: i32) -> String {
        (uid / UID_RANGE_PER_USER).to_string()
    }

    fn current_account(&self) -> String {
        self.account.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> CallingIdentity {
        CallingIdentity::new(10, 20_010_042, 7)
    }

    #[test]
    fn app_id_is_stable_per_secret() {
        let checker = SignedBundleChecker::new(b"device-secret".to_vec());
        let a = checker.app_id(&caller(), "com.example.notes").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(checker.app_id(&caller(), "com.example.notes").unwrap(), a);
        assert_ne!(checker.app_id(&caller(), "com.example.mail").unwrap(), a);
        let other = SignedBundleChecker::new(b"other-secret".to_vec());
        assert_ne!(other.app_id(&caller(), "com.example.notes").unwrap(), a);
    }

    #[test]
    fn access_rules() {
        let checker = SignedBundleChecker::new(b"s".to_vec());
        assert!(checker.check_access(&caller(), "com.example.notes"));
        assert!(!checker.check_access(&caller(), ""));
        checker.deny("com.example.notes");
        assert!(!checker.check_access(&caller(), "com.example.notes"));
        checker.set_instance_index(7, 1);
        assert!(!checker.check_access(&caller(), "com.example.mail"));
    }

    #[test]
    fn user_from_uid() {
        let accounts = StaticAccounts::new("ohos-account");
        assert_eq!(accounts.user_id(20_010_042), "100");
        assert_eq!(accounts.user_id(1000), "0");
        assert_eq!(accounts.current_account(), "ohos-account");
    }
}

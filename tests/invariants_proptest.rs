//! Property-based checks for the quantified invariants of spec.md §8,
//! over a small alphabet of keys and value shapes.

use std::sync::Arc;

use ksafe::{InMemoryPreferenceBackend, InMemorySecureKeyStore, Vault, VaultConfig};
use proptest::prelude::*;

fn vault() -> Vault {
    let backend = Arc::new(InMemoryPreferenceBackend::new());
    let key_store = Arc::new(InMemorySecureKeyStore::new());
    Vault::new(VaultConfig::default(), backend, key_store).unwrap()
}

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[ -~]{0,32}"
}

proptest! {
    /// Invariant 1: a `putDirect` is immediately visible to `getDirect` for
    /// both unencrypted and encrypted raw forms.
    #[test]
    fn put_get_consistency_direct(key in key_strategy(), value in value_strategy(), encrypted in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let v = vault();
            v.put_direct(&key, value.clone(), encrypted);
            let got: String = v.get_direct(&key, "unset".to_string(), encrypted);
            prop_assert_eq!(got, value);
            Ok(())
        })?;
    }

    /// Invariant 2: a suspending `put` is durable before it returns, and a
    /// subsequent `get` always observes it.
    #[test]
    fn put_get_consistency_suspending(key in key_strategy(), value in value_strategy(), encrypted in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let v = vault();
            v.put(&key, value.clone(), encrypted).await.unwrap();
            let got: String = v.get(&key, "unset".to_string(), encrypted).await;
            prop_assert_eq!(got, value);
            Ok(())
        })?;
    }

    /// Invariant 3: a null value, stored under either API, round-trips as
    /// `None`, never degrading to the caller's default.
    #[test]
    fn null_round_trips_not_default(key in key_strategy(), encrypted in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let v = vault();
            v.put(&key, None::<String>, encrypted).await.unwrap();
            let got: Option<String> = v.get(&key, Some("default".to_string()), encrypted).await;
            prop_assert_eq!(got, None);
            Ok(())
        })?;
    }

    /// Invariant 4: writing a key under encryption never leaks into a
    /// concurrent unencrypted read of the same client key.
    #[test]
    fn encryption_isolation(key in key_strategy(), value in value_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let v = vault();
            v.put(&key, value, true).await.unwrap();
            let got: String = v.get(&key, "default".to_string(), false).await;
            prop_assert_eq!(got, "default".to_string());
            Ok(())
        })?;
    }

    /// Invariant 5: delete makes the key disappear, and a subsequent
    /// encrypted re-write under the same client key succeeds.
    #[test]
    fn delete_then_rewrite_succeeds(key in key_strategy(), v1 in value_strategy(), v2 in value_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let v = vault();
            v.put(&key, v1, true).await.unwrap();
            v.delete(&key).await.unwrap();
            let gone: String = v.get(&key, "default".to_string(), true).await;
            prop_assert_eq!(gone, "default".to_string());

            v.put(&key, v2.clone(), true).await.unwrap();
            let got: String = v.get(&key, "default".to_string(), true).await;
            prop_assert_eq!(got, v2);
            Ok(())
        })?;
    }
}

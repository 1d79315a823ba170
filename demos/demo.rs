//! Exercises the public `Vault` API end to end against a file-backed
//! preference store under a temporary directory.

use std::sync::Arc;

use ksafe::{
    FilePreferenceBackend, InMemorySecureKeyStore, MemoryPolicy, Vault, VaultConfig,
};

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join("ksafe-demo");
    std::fs::create_dir_all(&dir).expect("create demo dir");
    let backend = Arc::new(
        FilePreferenceBackend::open(dir.join("demo.json")).expect("open file backend"),
    );
    let key_store = Arc::new(InMemorySecureKeyStore::new());

    let config = VaultConfig {
        namespace: Some("demo".to_string()),
        memory_policy: MemoryPolicy::PlaintextInMemory,
        ..Default::default()
    };
    let vault = Vault::new(config, backend, key_store).expect("construct vault");

    vault.put_direct("visits", 1i32, false);
    let visits: i32 = vault.get_direct("visits", 0, false);
    println!("visits (direct, plaintext): {visits}");

    vault
        .put("api_token", "top-secret".to_string(), true)
        .await
        .expect("durable encrypted put");
    let token: String = vault.get("api_token", String::new(), true).await;
    println!("api_token (suspending, encrypted): {token}");

    vault.delete("api_token").await.expect("delete");
    let gone: String = vault.get("api_token", "<absent>".to_string(), true).await;
    println!("api_token after delete: {gone}");

    vault.clear_all().await.expect("clear_all");
    println!("cleared all keys");
}

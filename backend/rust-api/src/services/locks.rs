use anyhow::{anyhow, Context, Result};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::metrics::track_cache_operation;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Serialises work on one attempt: completion and review reconciliation
/// never overlap for the same attempt id.
#[derive(Clone)]
pub enum AttemptLocks {
    Local(LockTable),
    Redis {
        conn: ConnectionManager,
        ttl: Duration,
    },
}

pub enum AttemptLockGuard {
    Local {
        table: LockTable,
        attempt_id: String,
        guard: OwnedMutexGuard<()>,
    },
    Redis {
        conn: ConnectionManager,
        key: String,
        token: String,
    },
}

fn lock_key(attempt_id: &str) -> String {
    format!("lock:attempt:{}", attempt_id)
}

impl AttemptLocks {
    pub fn local() -> Self {
        AttemptLocks::Local(Arc::new(Mutex::new(HashMap::new())))
    }

    pub fn redis(conn: ConnectionManager, ttl: Duration) -> Self {
        AttemptLocks::Redis { conn, ttl }
    }

    pub async fn acquire(&self, attempt_id: &str) -> Result<AttemptLockGuard> {
        match self {
            AttemptLocks::Local(table) => {
                let entry = {
                    let mut locks = table.lock().unwrap_or_else(PoisonError::into_inner);
                    Arc::clone(locks.entry(attempt_id.to_string()).or_default())
                };
                let guard = entry.lock_owned().await;
                Ok(AttemptLockGuard::Local {
                    table: Arc::clone(table),
                    attempt_id: attempt_id.to_string(),
                    guard,
                })
            }
            AttemptLocks::Redis { conn, ttl } => {
                let key = lock_key(attempt_id);
                let token = Uuid::new_v4().to_string();
                let ttl_ms = ttl.as_millis() as u64;

                // Poll for about one lease length before giving up.
                retry_async_with_config(RetryConfig::polling(*ttl), || {
                    let mut conn = conn.clone();
                    let key = key.clone();
                    let token = token.clone();
                    async move {
                        track_cache_operation("set_nx", async {
                            let acquired: Option<String> = redis::cmd("SET")
                                .arg(&key)
                                .arg(&token)
                                .arg("NX")
                                .arg("PX")
                                .arg(ttl_ms)
                                .query_async(&mut conn)
                                .await
                                .context("Failed to set attempt lock")?;
                            acquired
                                .map(|_| ())
                                .ok_or_else(|| anyhow!("Attempt lock {} is held", key))
                        })
                        .await
                    }
                })
                .await?;

                tracing::debug!(attempt_id, "Acquired attempt lock in Redis");
                Ok(AttemptLockGuard::Redis {
                    conn: conn.clone(),
                    key,
                    token,
                })
            }
        }
    }
}

impl AttemptLockGuard {
    pub async fn release(self) -> Result<()> {
        match self {
            AttemptLockGuard::Local {
                table,
                attempt_id,
                guard,
            } => {
                drop(guard);
                let mut locks = table.lock().unwrap_or_else(PoisonError::into_inner);
                // Only the table itself still references an idle entry.
                if locks
                    .get(&attempt_id)
                    .is_some_and(|entry| Arc::strong_count(entry) == 1)
                {
                    locks.remove(&attempt_id);
                }
                Ok(())
            }
            AttemptLockGuard::Redis {
                mut conn,
                key,
                token,
            } => {
                let lua_script = r#"
                    if redis.call("GET", KEYS[1]) == ARGV[1] then
                        return redis.call("DEL", KEYS[1])
                    end
                    return 0
                "#;

                let released: i32 = redis::Script::new(lua_script)
                    .key(&key)
                    .arg(&token)
                    .invoke_async(&mut conn)
                    .await
                    .context("Failed to release attempt lock")?;
                if released == 0 {
                    tracing::warn!(key = %key, "Attempt lock expired before release");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn local_lock_serialises_same_attempt() {
        let locks = AttemptLocks::local();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let guard = locks.acquire("attempt-1").await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    guard.release().await.unwrap();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = AttemptLocks::local();
        let guard = locks.acquire("attempt-2").await.unwrap();
        guard.release().await.unwrap();

        match &locks {
            AttemptLocks::Local(table) => assert!(table.lock().unwrap().is_empty()),
            AttemptLocks::Redis { .. } => unreachable!(),
        }
    }
}

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per node id. Attach and detach of a node run one at a
/// time while different nodes proceed in parallel. Entries live as long as
/// the set.
#[derive(Default)]
pub struct NodeLockSet {
  locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl NodeLockSet {
  pub async fn lock(&self, node_id: &str) -> OwnedMutexGuard<()> {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      locks.entry(node_id.to_owned()).or_default().clone()
    };

    lock.lock_owned().await
  }
}

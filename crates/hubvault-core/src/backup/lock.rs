//! Per-owner advisory import locks.

use dashmap::DashSet;

/// Scope key used for files that are not scoped to a user.
pub const GLOBAL_SCOPE: &str = "*";

/// Set of owner scopes with an import in progress.
///
/// Acquisition never blocks: a second import for a held scope is refused.
/// The global scope covers every owner, so it is refused while any user
/// scope is held and a user scope is refused while it is held.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    held: DashSet<String>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `scope`; `None` if it is already held.
    pub fn try_acquire(&self, scope: &str) -> Option<OwnerLockGuard<'_>> {
        if !self.held.insert(scope.to_string()) {
            return None;
        }
        // Both sides insert before looking, so two conflicting callers can
        // both lose but never both win.
        let conflict = if scope == GLOBAL_SCOPE {
            self.held.iter().any(|held| held.key() != GLOBAL_SCOPE)
        } else {
            self.held.contains(GLOBAL_SCOPE)
        };
        if conflict {
            self.held.remove(scope);
            return None;
        }
        Some(OwnerLockGuard {
            locks: self,
            scope: scope.to_string(),
        })
    }

    pub fn is_held(&self, scope: &str) -> bool {
        self.held.contains(scope)
    }
}

/// Releases its scope when dropped.
#[derive(Debug)]
pub struct OwnerLockGuard<'a> {
    locks: &'a OwnerLocks,
    scope: String,
}

impl OwnerLockGuard<'_> {
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl Drop for OwnerLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.remove(&self.scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let locks = OwnerLocks::new();
        let guard = locks.try_acquire("user-1").unwrap();
        assert!(locks.try_acquire("user-1").is_none());
        assert!(locks.try_acquire("user-2").is_some());
        assert!(locks.is_held("user-1"));
        drop(guard);
        assert!(!locks.is_held("user-1"));
        assert!(locks.try_acquire("user-1").is_some());
    }

    #[test]
    fn global_scope_excludes_user_scopes() {
        let locks = OwnerLocks::new();

        let user = locks.try_acquire("user-1").unwrap();
        assert!(locks.try_acquire(GLOBAL_SCOPE).is_none());
        assert!(!locks.is_held(GLOBAL_SCOPE));
        assert!(locks.try_acquire("user-2").is_some());
        drop(user);

        let global = locks.try_acquire(GLOBAL_SCOPE).unwrap();
        assert_eq!(global.scope(), GLOBAL_SCOPE);
        assert!(locks.try_acquire("user-1").is_none());
        assert!(!locks.is_held("user-1"));
        assert!(locks.try_acquire(GLOBAL_SCOPE).is_none());
        drop(global);

        assert!(locks.try_acquire("user-1").is_some());
        assert!(locks.try_acquire(GLOBAL_SCOPE).is_some());
    }

    #[test]
    fn concurrent_global_and_user_never_both_hold() {
        for _ in 0..200 {
            let locks = OwnerLocks::new();
            let (global, user) = std::thread::scope(|s| {
                let global = s.spawn(|| locks.try_acquire(GLOBAL_SCOPE));
                let user = s.spawn(|| locks.try_acquire("user-1"));
                (global.join().unwrap(), user.join().unwrap())
            });
            assert!(global.is_none() || user.is_none());
            drop((global, user));
            assert!(locks.try_acquire(GLOBAL_SCOPE).is_some());
        }
    }
}

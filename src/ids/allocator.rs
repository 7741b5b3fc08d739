// ============================================================================
// File: packages/gridplane/src/ids/allocator.rs
// ----------------------------------------------------------------------------
// Identifier allocation: counter reservation, rendering and reservation of
// the final id on the placeholder row.
// ============================================================================

use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, warn};

use super::{IdFormats, ObjectType, TemplateContext, render_template};
use crate::error::{GridError, GridResult};
use crate::store::Database;

/// Upper bound on collision retries while reserving one identifier
pub const MAX_RESERVE_ATTEMPTS: usize = 64;

/// Mints unique object identifiers.
///
/// Generation is serialized inside the process by a mutex. Across processes
/// correctness rests on the storage transaction around the counter and on
/// the uniqueness check performed before an id is stamped.
#[derive(Debug)]
pub struct IdentifierAllocator {
    db: Arc<dyn Database>,
    formats: IdFormats,
    site: String,
    guard: Mutex<()>,
}

impl IdentifierAllocator {
    pub fn new(db: Arc<dyn Database>, formats: IdFormats) -> Self {
        Self {
            db,
            formats,
            site: String::new(),
            guard: Mutex::new(()),
        }
    }

    /// Default value for `$SITE` when the caller does not pass one
    pub fn with_site<S: Into<String>>(mut self, site: S) -> Self {
        self.site = site.into();
        self
    }

    /// Generate and reserve the next identifier of `object_type`
    ///
    /// # Arguments
    /// * `object_type` - Family of the object being created
    /// * `name` - Value for `$NAME` (user id, machine name, ...)
    /// * `site` - Value for `$SITE`; falls back to the allocator's site
    pub fn next_id(
        &self,
        object_type: ObjectType,
        name: Option<&str>,
        site: Option<&str>,
    ) -> GridResult<String> {
        let _serialized = self
            .guard
            .lock()
            .map_err(|e| GridError::system(format!("Identifier mutex poisoned: {e}")))?;

        let counter = self.reserve_counter(object_type)?;

        let ctx = TemplateContext {
            counter,
            object_type,
            name: name.unwrap_or(""),
            site: site.unwrap_or(&self.site),
            now: Utc::now(),
        };
        let candidate = render_template(self.formats.format_for(object_type), &ctx)?;
        if candidate.is_empty() {
            return Err(GridError::system(format!(
                "Failed to generate ID for object type {object_type:?}"
            )));
        }

        self.reserve(counter, candidate, object_type)
    }

    /// Make `candidate` unique and stamp it on the placeholder row `counter`.
    ///
    /// Each collision appends the counter value and checks again.
    pub fn reserve(
        &self,
        counter: u64,
        candidate: String,
        object_type: ObjectType,
    ) -> GridResult<String> {
        let suffix = counter.to_string();
        let mut object_id = candidate;

        for attempt in 0..MAX_RESERVE_ATTEMPTS {
            if !self.db.object_id_exists(object_type, &object_id)? {
                self.db
                    .assign_object_id(object_type, counter, &object_id)
                    .map_err(|e| GridError::system(format!("Cannot reserve object id: {e}")))?;
                debug!("Reserved {:?} id {} (attempt {})", object_type, object_id, attempt + 1);
                return Ok(object_id);
            }
            warn!("{:?} id {} already taken, extending", object_type, object_id);
            object_id.push_str(&suffix);
        }

        Err(GridError::system(format!(
            "Could not find a free {object_type:?} id after {MAX_RESERVE_ATTEMPTS} attempts"
        )))
    }

    fn reserve_counter(&self, object_type: ObjectType) -> GridResult<u64> {
        let txn = self.db.begin_transaction()?;
        match self.db.reserve_row(txn, object_type) {
            Ok(counter) => {
                self.db.commit(txn)?;
                Ok(counter)
            }
            Err(e) => {
                if let Err(rollback) = self.db.rollback(txn) {
                    warn!("Rollback of counter reservation failed: {}", rollback);
                }
                Err(GridError::system(format!(
                    "Cannot reserve {object_type:?} counter: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDatabase, UserRecord};

    fn allocator(formats: IdFormats) -> (Arc<MemoryDatabase>, IdentifierAllocator) {
        let db = Arc::new(MemoryDatabase::new());
        let alloc = IdentifierAllocator::new(db.clone(), formats);
        (db, alloc)
    }

    #[test]
    fn job_ids_follow_the_counter() {
        let (_db, alloc) = allocator(IdFormats::new());

        assert_eq!(alloc.next_id(ObjectType::Job, None, None).expect("id"), "J_1");
        assert_eq!(alloc.next_id(ObjectType::Job, None, None).expect("id"), "J_2");
        assert_eq!(
            alloc.next_id(ObjectType::AuthSystem, None, None).expect("id"),
            "AUTH_1"
        );
    }

    #[test]
    fn colliding_name_gets_counter_suffix() {
        let (db, alloc) = allocator(IdFormats::new());
        db.insert_user(UserRecord::new("alice", "x")).expect("seed");

        let id = alloc
            .next_id(ObjectType::User, Some("alice"), None)
            .expect("id");
        assert_eq!(id, "alice1");

        let id = alloc
            .next_id(ObjectType::User, Some("alice"), None)
            .expect("id");
        assert_eq!(id, "alice2");
    }

    #[test]
    fn constant_template_exhausts_retry_budget_without_looping_forever() {
        let (db, alloc) = allocator(IdFormats::new().with_format(ObjectType::Machine, "node"));

        // The next counter is 65: occupy "node", "node65", "node6565", ...
        let txn = db.begin_transaction().expect("begin");
        let keys: Vec<u64> = (0..MAX_RESERVE_ATTEMPTS)
            .map(|_| db.reserve_row(txn, ObjectType::Machine).expect("reserve"))
            .collect();
        db.commit(txn).expect("commit");
        let mut taken = String::from("node");
        for key in &keys {
            db.assign_object_id(ObjectType::Machine, *key, &taken)
                .expect("assign");
            taken.push_str(&(keys.len() as u64 + 1).to_string());
        }

        let err = alloc
            .next_id(ObjectType::Machine, None, None)
            .expect_err("every candidate is taken");
        assert!(matches!(err, GridError::System(_)));
    }

    #[test]
    fn unknown_placeholder_fails_generation() {
        let (_db, alloc) = allocator(IdFormats::new().with_format(ObjectType::Work, "W_$BOGUS"));
        assert!(matches!(
            alloc.next_id(ObjectType::Work, None, None),
            Err(GridError::System(_))
        ));
    }

    #[test]
    fn concurrent_callers_never_share_an_id() {
        // A constant template sends every caller after the first through the collision path.
        let (_db, alloc) = allocator(IdFormats::new().with_format(ObjectType::Job, "J"));
        let alloc = Arc::new(alloc);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || {
                    (0..8)
                        .map(|_| alloc.next_id(ObjectType::Job, None, None).expect("id"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread"))
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(total, 128);
    }
}

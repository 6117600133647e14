//! Process-wide tree class registry.
//!
//! Classes are registered once, before trees of that class are created or
//! opened, and looked up by id afterwards. Registration takes a write lock;
//! lookups share a read lock and hand out an `Arc`, so a handle keeps its
//! class alive without holding the lock.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::btree::HKEY_MAX;
use crate::btree::class::{Features, TreeClass};
use crate::error::BTreeError;

/// A class as stored in the registry.
pub struct RegisteredClass {
    id: u32,
    features: Features,
    ops: Box<dyn TreeClass>,
}

impl RegisteredClass {
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Features a tree of this class may enable.
    #[must_use]
    pub const fn features(&self) -> Features {
        self.features
    }

    #[must_use]
    pub fn ops(&self) -> &dyn TreeClass {
        self.ops.as_ref()
    }
}

impl std::fmt::Debug for RegisteredClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredClass")
            .field("id", &self.id)
            .field("features", &self.features)
            .field("hkey_size", &self.ops.hkey_size())
            .finish_non_exhaustive()
    }
}

type ClassTable = HashMap<u32, Arc<RegisteredClass>>;

fn registry() -> &'static RwLock<ClassTable> {
    static REGISTRY: OnceLock<RwLock<ClassTable>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a tree class under `id`.
///
/// `features` lists every feature a tree of this class may enable.
///
/// # Errors
///
/// - `InvalidArgument` if `id` is 0, the hashed key is larger than
///   [`HKEY_MAX`], or no key mode is usable (no hashed key, and neither
///   `UINT_KEY` nor `DIRECT_KEY` is supported)
/// - `AlreadyRegistered` if `id` is taken
pub fn register_class(
    id: u32,
    features: Features,
    class: impl TreeClass + 'static,
) -> Result<(), BTreeError> {
    if id == 0 {
        return Err(BTreeError::invalid("class id 0 is reserved"));
    }

    let hkey_size = class.hkey_size();
    if hkey_size > HKEY_MAX {
        return Err(BTreeError::invalid(format!(
            "hashed key of {hkey_size} bytes exceeds the {HKEY_MAX} byte limit"
        )));
    }
    if hkey_size == 0
        && !features.contains(Features::UINT_KEY)
        && !features.contains(Features::DIRECT_KEY)
    {
        return Err(BTreeError::invalid(format!(
            "class {id} has no hashed key and supports neither integer nor direct keys"
        )));
    }

    let mut table = registry().write().unwrap_or_else(PoisonError::into_inner);
    if table.contains_key(&id) {
        return Err(BTreeError::AlreadyRegistered(id));
    }
    table.insert(
        id,
        Arc::new(RegisteredClass {
            id,
            features,
            ops: Box::new(class),
        }),
    );
    drop(table);

    tracing::debug!("registered tree class {id} with features {:#x}", features.bits());
    Ok(())
}

/// Look up a registered class.
#[must_use]
pub fn lookup_class(id: u32) -> Option<Arc<RegisteredClass>> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Offset;
    use crate::btree::class::{ClassCtx, Record};
    use std::any::Any;

    struct NullClass {
        hkey_size: usize,
    }

    impl TreeClass for NullClass {
        fn hkey_size(&self) -> usize {
            self.hkey_size
        }

        fn rec_alloc(
            &self,
            _ctx: &mut ClassCtx<'_>,
            _key: &[u8],
            _value: Option<&[u8]>,
        ) -> Result<Offset, BTreeError> {
            Err(BTreeError::NoPermission)
        }

        fn rec_free(
            &self,
            _ctx: &mut ClassCtx<'_>,
            _rec: &Record,
            _args: Option<&mut dyn Any>,
        ) -> Result<(), BTreeError> {
            Ok(())
        }

        fn rec_fetch(
            &self,
            _ctx: &ClassCtx<'_>,
            _rec: &Record,
        ) -> Result<(Vec<u8>, Vec<u8>), BTreeError> {
            Ok((Vec::new(), Vec::new()))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        register_class(9001, Features::DYNAMIC_ROOT, NullClass { hkey_size: 8 })
            .expect("register class");
        let class = lookup_class(9001).expect("class is registered");
        assert_eq!(class.id(), 9001);
        assert_eq!(class.features(), Features::DYNAMIC_ROOT);
        assert_eq!(class.ops().hkey_size(), 8);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        register_class(9002, Features::UINT_KEY, NullClass { hkey_size: 0 })
            .expect("register class");
        assert!(matches!(
            register_class(9002, Features::UINT_KEY, NullClass { hkey_size: 0 }),
            Err(BTreeError::AlreadyRegistered(9002))
        ));
    }

    #[test]
    fn test_invalid_registrations() {
        assert!(matches!(
            register_class(0, Features::UINT_KEY, NullClass { hkey_size: 0 }),
            Err(BTreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            register_class(9003, Features::NONE, NullClass { hkey_size: HKEY_MAX + 1 }),
            Err(BTreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            register_class(9004, Features::DYNAMIC_ROOT, NullClass { hkey_size: 0 }),
            Err(BTreeError::InvalidArgument(_))
        ));
        assert!(lookup_class(9003).is_none());
        assert!(lookup_class(9004).is_none());
    }
}

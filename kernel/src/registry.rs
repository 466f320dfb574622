// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The type registry (C1) and instance registry (C2).

use std::collections::HashMap;
use std::sync::Mutex;

use wire::be::Reader;

use crate::action::KernelBox;
use crate::KernelId;

/// A stable 16-bit tag identifying a kernel's concrete type on the wire,
/// looked up in the [`TypeRegistry`] to find the decoder that reconstructs
/// it from bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
pub struct TypeId(u16);

impl TypeId {
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn into_raw(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// A decoder reconstructing a kernel's payload from bytes already stripped
/// of the frame header and base fields.
pub type Decoder = Box<dyn Fn(&mut Reader<'_>) -> Option<KernelBox> + Send + Sync>;

/// Errors registering a kernel type.
#[derive(Debug, thiserror::Error)]
pub enum TypeRegistryError {
    /// The same type-id was registered twice. This is the "Fatal" category
    /// from the error handling design: a double registration is a startup
    /// programming error, not a recoverable runtime condition, so callers
    /// are expected to `expect()` this at startup rather than retry.
    #[error("type id {0} is already registered")]
    DuplicateTypeId(TypeId),
}

/// Process-global, append-only map from [`TypeId`] to decoder.
///
/// Registration happens once at startup before any pipeline is started;
/// after that the registry is read-only and safe to share across threads
/// without locking (enforced by never exposing a mutating method once
/// wrapped in an `Arc`).
#[derive(Default)]
pub struct TypeRegistry {
    decoders: HashMap<TypeId, Decoder>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("registered", &self.decoders.len())
            .finish()
    }
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for `type_id`. Fails if `type_id` is already
    /// registered.
    pub fn register(
        &mut self,
        type_id: TypeId,
        decode: impl Fn(&mut Reader<'_>) -> Option<KernelBox> + Send + Sync + 'static,
    ) -> Result<(), TypeRegistryError> {
        if self.decoders.contains_key(&type_id) {
            return Err(TypeRegistryError::DuplicateTypeId(type_id));
        }
        self.decoders.insert(type_id, Box::new(decode));
        Ok(())
    }

    #[must_use]
    pub fn decode(&self, type_id: TypeId, r: &mut Reader<'_>) -> Option<KernelBox> {
        self.decoders.get(&type_id)?(r)
    }

    #[must_use]
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.decoders.contains_key(&type_id)
    }
}

/// Thread-safe map from [`KernelId`] to the live kernel it names, consulted
/// on every inbound kernel whose principal-id is non-zero so a reply can be
/// routed to the right `react()` call.
#[derive(Default)]
pub struct InstanceRegistry {
    inner: Mutex<HashMap<KernelId, KernelBox>>,
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.inner.lock().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("InstanceRegistry").field("len", &len).finish()
    }
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a live kernel under its id. Returns the previous occupant, if
    /// any — the caller (the CPU pipeline) treats a non-`None` return as an
    /// instance-registry invariant violation (two kernels sharing an id)
    /// and escalates via the terminate handler.
    pub fn insert(&self, id: KernelId, kernel: KernelBox) -> Option<KernelBox> {
        self.inner
            .lock()
            .expect("instance registry mutex poisoned")
            .insert(id, kernel)
    }

    #[must_use]
    pub fn remove(&self, id: KernelId) -> Option<KernelBox> {
        self.inner
            .lock()
            .expect("instance registry mutex poisoned")
            .remove(&id)
    }

    pub fn with_mut<R>(&self, id: KernelId, f: impl FnOnce(&mut KernelBox) -> R) -> Option<R> {
        let mut guard = self.inner.lock().expect("instance registry mutex poisoned");
        guard.get_mut(&id).map(f)
    }

    #[must_use]
    pub fn contains(&self, id: KernelId) -> bool {
        self.inner
            .lock()
            .expect("instance registry mutex poisoned")
            .contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("instance registry mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Kernel, KernelHeader};

    #[derive(Debug)]
    struct Noop(KernelHeader);
    impl Kernel for Noop {
        fn header(&self) -> &KernelHeader {
            &self.0
        }
        fn header_mut(&mut self) -> &mut KernelHeader {
            &mut self.0
        }
        fn write_payload(&self, _buf: &mut Vec<u8>) {}
    }

    #[test]
    fn register_then_decode() {
        let mut reg = TypeRegistry::new();
        let tid = TypeId::new(1);
        reg.register(tid, |_r| {
            Some(Box::new(Noop(KernelHeader::new(tid))) as KernelBox)
        })
        .unwrap();
        let mut r = Reader::new(&[]);
        let k = reg.decode(tid, &mut r).unwrap();
        assert_eq!(k.header().type_id, tid);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = TypeRegistry::new();
        let tid = TypeId::new(5);
        reg.register(tid, |_r| None).unwrap();
        let err = reg.register(tid, |_r| None).unwrap_err();
        assert!(matches!(err, TypeRegistryError::DuplicateTypeId(t) if t == tid));
    }

    #[test]
    fn instance_registry_insert_remove() {
        let reg = InstanceRegistry::new();
        let id = KernelId::from_raw(7);
        let k: KernelBox = Box::new(Noop(KernelHeader::new(TypeId::new(1))));
        assert!(reg.insert(id, k).is_none());
        assert!(reg.contains(id));
        assert!(reg.remove(id).is_some());
        assert!(!reg.contains(id));
    }

    #[test]
    fn double_insert_returns_previous_occupant() {
        let reg = InstanceRegistry::new();
        let id = KernelId::from_raw(1);
        let a: KernelBox = Box::new(Noop(KernelHeader::new(TypeId::new(1))));
        let b: KernelBox = Box::new(Noop(KernelHeader::new(TypeId::new(1))));
        assert!(reg.insert(id, a).is_none());
        assert!(reg.insert(id, b).is_some());
    }
}

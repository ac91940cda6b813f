use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::any;
use std::collections::HashMap;

/// Layout facts for a type, recorded the first time the type is registered
/// through a sized binding operation.
#[derive(Clone, Copy, Debug)]
pub struct TypeLayout {
    pub size: usize,
    pub align: usize,
    pub trivially_destructible: bool,
}

/// Per-type descriptor. Exactly one instance exists per process for every
/// distinct type, so descriptors can be compared and hashed by address.
pub struct TypeInfo {
    any_id: any::TypeId,
    name: &'static str,
    // Only filled by sized registrations; `dyn Trait` keys never have an
    // intrinsic layout (their slot is a fat pointer cell).
    layout: OnceCell<TypeLayout>,
}

/// Opaque, pointer-sized type identifier.
///
/// Obtained from [`type_id_of`] (sized types) or [`type_id_of_unsized`]
/// (trait-object keys). The same type always yields the same value, for the
/// lifetime of the process.
#[derive(Clone, Copy)]
pub struct TypeId(&'static TypeInfo);

impl TypeId {
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Layout of the bound type, if it was registered through a sized
    /// operation. Trait-object keys return `None`.
    pub fn layout(&self) -> Option<TypeLayout> {
        self.0.layout.get().copied()
    }

    pub fn size(&self) -> Option<usize> {
        self.layout().map(|l| l.size)
    }

    pub fn align(&self) -> Option<usize> {
        self.layout().map(|l| l.align)
    }

    pub fn is_trivially_destructible(&self) -> bool {
        self.layout().map(|l| l.trivially_destructible).unwrap_or(true)
    }

    pub(crate) fn any_id(&self) -> any::TypeId {
        self.0.any_id
    }

    /// The word fed to the semistatic map's multiply-shift hash.
    pub(crate) fn key_word(&self) -> usize {
        self.0 as *const TypeInfo as usize
    }
}

impl PartialEq for TypeId {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeId {}

impl std::hash::Hash for TypeId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.0 as *const TypeInfo).hash(state)
    }
}

impl std::fmt::Debug for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TypeId").field(&self.0.name).finish()
    }
}

static REGISTRY: Lazy<RwLock<HashMap<any::TypeId, &'static TypeInfo>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn intern<T: ?Sized + 'static>() -> &'static TypeInfo {
    let any_id = any::TypeId::of::<T>();
    if let Some(info) = REGISTRY.read().get(&any_id) {
        return info;
    }
    let mut registry = REGISTRY.write();
    registry.entry(any_id).or_insert_with(|| {
        Box::leak(Box::new(TypeInfo {
            any_id,
            name: any::type_name::<T>(),
            layout: OnceCell::new(),
        }))
    })
}

/// Identifier for a sized type. Also records the type's layout on first call.
pub fn type_id_of<T: 'static>() -> TypeId {
    let info = intern::<T>();
    let _ = info.layout.set(TypeLayout {
        size: std::mem::size_of::<T>(),
        align: std::mem::align_of::<T>(),
        trivially_destructible: !std::mem::needs_drop::<T>(),
    });
    TypeId(info)
}

/// Identifier for a possibly-unsized key such as `dyn Trait`.
pub fn type_id_of_unsized<T: ?Sized + 'static>() -> TypeId {
    TypeId(intern::<T>())
}

/// Looks a type up without registering it. Used by `get`-style lookups so an
/// unbound request does not pollute the registry.
pub(crate) fn probe_type_id<T: ?Sized + 'static>() -> Option<TypeId> {
    REGISTRY
        .read()
        .get(&any::TypeId::of::<T>())
        .map(|info| TypeId(*info))
}

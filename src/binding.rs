use crate::injector::InjectorStorage;
use crate::lazy_component::LazyEntry;
use crate::type_info::TypeId;
use std::any::Any;
use std::sync::Arc;

pub(crate) type NodeIndex = u32;

/// Constructs a binding's object and returns a pointer to its typed cell.
/// The node's hard dependencies are reachable through the node's edge range.
pub(crate) type CreateFn = unsafe fn(&InjectorStorage, NodeIndex) -> *const ();

/// A compressed interface node: constructs the implementation through the
/// adopted class create, then publishes the interface cell.
pub(crate) type CompressedFn = unsafe fn(&InjectorStorage, CreateFn, NodeIndex) -> *const ();

/// Multibinding element constructor. Elements are not graph nodes, so their
/// dependencies are resolved by type id rather than through edges.
pub(crate) type MultiCreateFn = unsafe fn(&InjectorStorage) -> *const ();

/// Builds the cached multibinding vector from the element cells.
pub(crate) type MakeVecFn = unsafe fn(&[*const ()]) -> ErasedVec;

/// One dependency of a binding. Deferred dependencies (Provider parameters)
/// join the requirement closure but add no construction-order edge; that is
/// what lets a provider break an otherwise cyclic graph.
#[derive(Clone, Copy, Debug)]
pub struct DepRequest {
    pub id: TypeId,
    pub deferred: bool,
}

impl DepRequest {
    pub fn hard(id: TypeId) -> Self {
        DepRequest { id, deferred: false }
    }

    pub fn deferred(id: TypeId) -> Self {
        DepRequest { id, deferred: true }
    }
}

/// Identity of a binding for deduplication: two entries with equal keys
/// produce the same injected object and collapse silently; unequal keys for
/// the same type are a fatal conflict.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct DedupKey(u8, usize, usize);

impl DedupKey {
    pub(crate) fn instance(raw: *const ()) -> Self {
        DedupKey(0, raw as usize, 0)
    }

    pub(crate) fn create(create: CreateFn) -> Self {
        DedupKey(1, create as usize, 0)
    }

    pub(crate) fn compressed(via: CompressedFn, class_id: TypeId) -> Self {
        DedupKey(2, via as usize, class_id.key_word())
    }

    pub(crate) fn multi_create(create: MultiCreateFn) -> Self {
        DedupKey(3, create as usize, 0)
    }
}

pub(crate) struct BindingEntry {
    pub type_id: TypeId,
    pub kind: EntryKind,
}

pub(crate) enum EntryKind {
    /// An already-constructed object owned by the component. The injector
    /// never destroys it; the shared keep-alive reference does.
    Instance {
        object: Arc<dyn Any + Send + Sync>,
        raw: *const (),
    },
    /// An object constructed on first use. `arena_bytes` covers the object
    /// slot (when arena-owned) plus the typed pointer cell.
    Construct {
        create: CreateFn,
        deps: Vec<DepRequest>,
        arena_bytes: usize,
    },
    /// Candidate for binding compression, paired with the interface's
    /// regular `Construct` entry. `type_id` is the interface.
    Compressed { class_id: TypeId, via: CompressedFn },
    MultiInstance {
        object: Arc<dyn Any + Send + Sync>,
        raw: *const (),
        make_vec: MakeVecFn,
    },
    MultiConstruct {
        create: MultiCreateFn,
        deps: Vec<DepRequest>,
        make_vec: MakeVecFn,
        arena_bytes: usize,
    },
    Lazy(LazyEntry),
    Replaced(LazyEntry),
    Replacement(LazyEntry),
    /// Marks `type_id` as part of the component's public signature; anything
    /// provided but never exposed is private and compressible.
    Expose,
}

/// A type-erased `Box<Vec<&'static T>>`, used to cache multibinding vectors
/// without naming `T` in the storage. The internal `'static` never escapes:
/// callers reborrow at the injector's lifetime.
pub(crate) struct ErasedVec {
    ptr: *mut (),
    drop_fn: unsafe fn(*mut ()),
}

impl ErasedVec {
    pub(crate) fn new<T: ?Sized + 'static>(v: Vec<&'static T>) -> Self {
        unsafe fn drop_vec<T: ?Sized + 'static>(ptr: *mut ()) {
            drop(Box::from_raw(ptr as *mut Vec<&'static T>));
        }
        ErasedVec {
            ptr: Box::into_raw(Box::new(v)) as *mut (),
            drop_fn: drop_vec::<T>,
        }
    }

    pub(crate) fn ptr(&self) -> *mut () {
        self.ptr
    }
}

impl Drop for ErasedVec {
    fn drop(&mut self) {
        unsafe { (self.drop_fn)(self.ptr) };
    }
}

/// Materializes a zero-sized closure out of thin air. Registration rejects
/// closures with captured state, so this is only ever instantiated for types
/// with no bytes to read.
pub(crate) unsafe fn conjure<F: Copy + 'static>() -> F {
    debug_assert_eq!(std::mem::size_of::<F>(), 0);
    std::ptr::NonNull::<F>::dangling().as_ptr().read()
}

pub(crate) fn is_stateless<F>() -> bool {
    std::mem::size_of::<F>() == 0
}

use crate::arena::FixedSizeAllocator;
use crate::binding::{ErasedVec, MakeVecFn, MultiCreateFn, NodeIndex};
use crate::component::Component;
use crate::normalize::{merge_extra, InstanceCell, MultiElemTemplate, NormalizedComponent};
use crate::semistatic_graph::{CreateKind, EdgeCursor, NodeState, SemistaticGraph};
use crate::type_info::{probe_type_id, TypeId};
use parking_lot::ReentrantMutex;
use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// The runtime engine: owns one dependency graph, one arena, and constructs
/// each provided type lazily, at most once.
///
/// `Injector` is a cheap clonable handle; clones share the same singletons.
/// Concurrent `get` calls are serialized by a re-entrant lock, so a
/// [`Provider`] used inside a constructor never deadlocks.
pub struct Injector {
    inner: Arc<InjectorInner>,
}

impl Clone for Injector {
    fn clone(&self) -> Self {
        Injector {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct InjectorInner {
    lock: ReentrantMutex<()>,
    storage: InjectorStorage,
}

// All interior mutation of the storage happens behind `lock`, every bound
// object is Send + Sync by the builder's bounds, and constructed objects are
// never moved or dropped before the last handle goes away.
unsafe impl Send for InjectorInner {}
unsafe impl Sync for InjectorInner {}

struct LiveElem {
    state: Cell<ElemState>,
}

#[derive(Clone, Copy)]
enum ElemState {
    Pending(MultiCreateFn),
    Ready(*const ()),
}

struct LiveMulti {
    elems: Vec<LiveElem>,
    make_vec: MakeVecFn,
    cache: RefCell<Option<ErasedVec>>,
}

/// Internal storage of an injector. Public only because generated
/// [`crate::Inject`] impls and dependency tuples fetch through it.
pub struct InjectorStorage {
    graph: SemistaticGraph,
    multis: Vec<LiveMulti>,
    multi_index: HashMap<TypeId, usize>,
    arena: FixedSizeAllocator,
    #[allow(dead_code)]
    extra_keep_alive: Vec<Arc<dyn Any + Send + Sync>>,
    #[allow(dead_code)]
    extra_cells: Vec<Box<InstanceCell>>,
    #[allow(dead_code)]
    normalized: Arc<NormalizedComponent>,
    weak_self: Weak<InjectorInner>,
}

impl Injector {
    /// Normalizes `component` and builds an injector from it. The component
    /// must have no unsatisfied requirements.
    pub fn new(component: Component) -> anyhow::Result<Injector> {
        let normalized = Arc::new(NormalizedComponent::new(component)?);
        Injector::from_parts(normalized, Component::empty())
    }

    /// Builds an injector from a shared normalized component plus extra
    /// bindings, typically request-scoped instances. The extra bindings may
    /// satisfy the normalized component's requirements; binding a type the
    /// base already binds differently is an error and leaves `normalized`
    /// untouched and reusable.
    pub fn with_normalized(
        normalized: &Arc<NormalizedComponent>,
        extra: Component,
    ) -> anyhow::Result<Injector> {
        Injector::from_parts(Arc::clone(normalized), extra)
    }

    fn from_parts(
        normalized: Arc<NormalizedComponent>,
        extra: Component,
    ) -> anyhow::Result<Injector> {
        let parts = merge_extra(&normalized, extra)?;
        let arena = FixedSizeAllocator::with_capacity(parts.total_arena_bytes);
        let multis: Vec<LiveMulti> = parts
            .multis
            .iter()
            .map(|template| LiveMulti {
                elems: template
                    .elems
                    .iter()
                    .map(|(elem, _)| LiveElem {
                        state: Cell::new(match elem {
                            MultiElemTemplate::Instance { cell } => ElemState::Ready(*cell),
                            MultiElemTemplate::Construct { create } => ElemState::Pending(*create),
                        }),
                    })
                    .collect(),
                make_vec: template.make_vec,
                cache: RefCell::new(None),
            })
            .collect();
        let multi_index = parts
            .multis
            .iter()
            .enumerate()
            .map(|(i, m)| (m.key, i))
            .collect();

        debug!(
            nodes = parts.nodes.len(),
            arena_bytes = parts.total_arena_bytes,
            "injector created"
        );

        let inner = Arc::new_cyclic(|weak| InjectorInner {
            lock: ReentrantMutex::new(()),
            storage: InjectorStorage {
                graph: SemistaticGraph {
                    map: parts.map,
                    nodes: parts.nodes,
                    edges: parts.edges,
                },
                multis,
                multi_index,
                arena,
                extra_keep_alive: parts.keep_alive,
                extra_cells: parts.instance_cells,
                normalized,
                weak_self: weak.clone(),
            },
        });
        Ok(Injector { inner })
    }

    /// Returns the singleton for `T`, constructing it (and transitively its
    /// dependencies, in dependency order) on first use. Repeated calls
    /// return the same object.
    ///
    /// Panics if `T` was never bound; that is the fatal-error path, use
    /// [`unsafe_get`](Injector::unsafe_get) to probe instead.
    pub fn get<T: ?Sized + 'static>(&self) -> &T {
        let _guard = self.inner.lock.lock();
        let storage = &self.inner.storage;
        let index = lookup_node::<T>(storage)
            .unwrap_or_else(|| missing_type_panic(type_name::<T>()));
        unsafe {
            let cell = storage.ensure(index);
            &**(cell as *const *const T)
        }
    }

    /// Escape hatch: like [`get`](Injector::get) but returns `None` for an
    /// unbound type instead of treating it as fatal.
    pub fn unsafe_get<T: ?Sized + 'static>(&self) -> Option<&T> {
        let _guard = self.inner.lock.lock();
        let storage = &self.inner.storage;
        let index = lookup_node::<T>(storage)?;
        unsafe {
            let cell = storage.ensure(index);
            Some(&**(cell as *const *const T))
        }
    }

    /// All multibound instances of `T`, in registration order, each
    /// constructed on first call. The returned slice is cached: later calls
    /// return the same vector.
    pub fn get_multibindings<T: ?Sized + 'static>(&self) -> &[&T] {
        let _guard = self.inner.lock.lock();
        let storage = &self.inner.storage;
        let Some(id) = probe_type_id::<T>() else {
            return &[];
        };
        let Some(&mi) = storage.multi_index.get(&id) else {
            return &[];
        };
        unsafe {
            let ptr = storage.ensure_multi_vec(mi);
            (*(ptr as *const Vec<&T>)).as_slice()
        }
    }

    /// Constructs every binding and every multibinding now. After this call
    /// the arena no longer allocates and `get` never runs user code.
    pub fn eagerly_inject_all(&self) {
        let _guard = self.inner.lock.lock();
        let storage = &self.inner.storage;
        for index in 0..storage.graph.nodes.len() {
            if matches!(
                storage.graph.node(index as NodeIndex).state.get(),
                NodeState::Pending(_)
            ) {
                unsafe {
                    storage.ensure(index as NodeIndex);
                }
            }
        }
        for mi in 0..storage.multis.len() {
            unsafe {
                storage.ensure_multi_vec(mi);
            }
        }
    }

    /// A deferred handle for `T`, usable from plain code the same way
    /// constructor `Provider` parameters are.
    pub fn provider<T: Clone + Send + Sync + 'static>(&self) -> Provider<T> {
        Provider {
            inner: Arc::downgrade(&self.inner),
            _marker: PhantomData,
        }
    }
}

fn lookup_node<T: ?Sized + 'static>(storage: &InjectorStorage) -> Option<NodeIndex> {
    let id = probe_type_id::<T>()?;
    storage.graph.node_index(id)
}

fn missing_type_panic(type_name: &str) -> ! {
    panic!("Fatal injection error: the type {type_name} was not provided by this injector");
}

impl InjectorStorage {
    /// Returns the typed cell of the node, constructing the object first if
    /// needed. This is the lazy-construction protocol: mark the node as in
    /// flight, run its create function (which recursively ensures the
    /// dependencies through the node's edges), then mark it terminal.
    pub(crate) unsafe fn ensure(&self, index: NodeIndex) -> *const () {
        let node = self.graph.node(index);
        match node.state.get() {
            NodeState::Ready(cell) => cell,
            NodeState::Creating => panic!(
                "Fatal injection error: construction cycle while constructing the type {}",
                node.key.name()
            ),
            NodeState::Missing => missing_type_panic(node.key.name()),
            NodeState::Pending(kind) => {
                node.state.set(NodeState::Creating);
                trace!(type_name = node.key.name(), "constructing");
                let cell = match kind {
                    CreateKind::Plain(create) => create(self, index),
                    CreateKind::Compressed { via, class } => via(self, class, index),
                };
                node.set_terminal(cell);
                cell
            }
        }
    }

    pub(crate) unsafe fn ensure_by_id(&self, id: TypeId) -> *const () {
        let index = self
            .graph
            .node_index(id)
            .unwrap_or_else(|| missing_type_panic(id.name()));
        self.ensure(index)
    }

    unsafe fn ensure_multi_vec(&self, mi: usize) -> *mut () {
        let multi = &self.multis[mi];
        if let Some(vec) = &*multi.cache.borrow() {
            return vec.ptr();
        }
        let mut cells = Vec::with_capacity(multi.elems.len());
        for elem in &multi.elems {
            let cell = match elem.state.get() {
                ElemState::Ready(cell) => cell,
                ElemState::Pending(create) => {
                    let cell = create(self);
                    elem.state.set(ElemState::Ready(cell));
                    cell
                }
            };
            cells.push(cell);
        }
        let vec = (multi.make_vec)(&cells);
        let ptr = vec.ptr();
        *multi.cache.borrow_mut() = Some(vec);
        ptr
    }

    pub(crate) fn edge_cursor(&self, index: NodeIndex) -> EdgeCursor<'_> {
        self.graph.edge_cursor(index)
    }

    pub(crate) unsafe fn arena_construct<T>(&self, value: T) -> *mut T {
        self.arena.construct(value)
    }

    pub(crate) unsafe fn alloc_cell<K: ?Sized>(&self, ptr: *const K) -> *const () {
        self.arena.construct::<*const K>(ptr) as *const ()
    }

    pub(crate) unsafe fn adopt_boxed<T: ?Sized + 'static>(&self, cell: *const ()) {
        self.arena.adopt_boxed::<T>(cell as *mut u8);
    }

    /// Fetches the next hard dependency as a cloned value. Generated
    /// [`crate::Inject`] impls and dependency tuples call this in
    /// declaration order.
    ///
    /// # Safety
    /// Injector-engine-only; the cursor must have an edge left and it must
    /// point at a node bound to `T`.
    #[doc(hidden)]
    pub unsafe fn fetch_value<T: Clone + 'static>(&self, edges: &mut EdgeCursor<'_>) -> T {
        let cell = self.ensure(edges.next());
        let ptr = *(cell as *const *const T);
        (*ptr).clone()
    }

    /// Fetches a dependency by type id instead of through an edge.
    ///
    /// # Safety
    /// Injector-engine-only; `T` must be provided by this injector.
    #[doc(hidden)]
    pub unsafe fn fetch_value_by_id<T: Clone + 'static>(&self) -> T {
        let id =
            probe_type_id::<T>().unwrap_or_else(|| missing_type_panic(type_name::<T>()));
        let cell = self.ensure_by_id(id);
        let ptr = *(cell as *const *const T);
        (*ptr).clone()
    }

    /// Builds a deferred handle for `T`; used for `Provider<T>` constructor
    /// parameters.
    #[doc(hidden)]
    pub fn make_provider<T>(&self) -> Provider<T> {
        Provider {
            inner: self.weak_self.clone(),
            _marker: PhantomData,
        }
    }
}

/// A lightweight handle that defers the lookup of `T` until [`get`] is
/// called. Declared as a constructor parameter it contributes a *deferred*
/// dependency: `T` must still be provided by the injector, but there is no
/// construction-order edge, which is how otherwise-cyclic object graphs are
/// assembled.
///
/// The handle holds a weak reference: it does not keep the injector alive,
/// and `get` after the injector is gone panics.
///
/// [`get`]: Provider::get
pub struct Provider<T> {
    inner: Weak<InjectorInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Provider {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Provider<T> {
    /// Constructs the singleton on first use and returns a clone of it. The
    /// underlying constructor still runs at most once per injector.
    pub fn get(&self) -> T {
        let inner = self
            .inner
            .upgrade()
            .expect("Provider::get called after its injector was dropped");
        let _guard = inner.lock.lock();
        unsafe { inner.storage.fetch_value_by_id::<T>() }
    }
}

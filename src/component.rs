use crate::arena::{cell_bytes_of, slot_bytes_of};
use crate::binding::{
    conjure, is_stateless, BindingEntry, CreateFn, DepRequest, EntryKind, MakeVecFn, NodeIndex,
};
use crate::errors::InjectError;
use crate::inject::{DepTuple, Inject};
use crate::injector::InjectorStorage;
use crate::lazy_component::LazyEntry;
use crate::type_info::{type_id_of, type_id_of_unsized};
use std::any::{type_name, Any};
use std::hash::Hash;
use std::sync::Arc;

/// Starting point of every binding set.
pub fn create_component() -> ComponentBuilder {
    ComponentBuilder::new()
}

/// A finished, not-yet-normalized set of bindings. Cheap to produce; all
/// structural checking happens when a [`crate::NormalizedComponent`] or
/// [`crate::Injector`] is built from it.
pub struct Component {
    pub(crate) entries: Vec<BindingEntry>,
    pub(crate) error: Option<InjectError>,
}

impl Component {
    pub(crate) fn empty() -> Self {
        Component {
            entries: Vec::new(),
            error: None,
        }
    }
}

impl From<ComponentBuilder> for Component {
    fn from(builder: ComponentBuilder) -> Self {
        builder.into_component()
    }
}

/// Fluent builder accumulating binding entries. Every operation consumes the
/// builder and returns it, so component functions read as one chain.
///
/// The first structural error poisons the builder: all later operations are
/// ignored and the error surfaces when the component is normalized.
#[derive(Default)]
pub struct ComponentBuilder {
    entries: Vec<BindingEntry>,
    error: Option<InjectError>,
}

impl ComponentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: BindingEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn poison(&mut self, error: InjectError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn check_stateless<F>(&mut self) -> bool {
        if is_stateless::<F>() {
            true
        } else {
            self.poison(InjectError::LambdaWithCaptures {
                type_name: type_name::<F>(),
            });
            false
        }
    }

    /// Binds the interface `I` to the implementation `C`. The upcast closure
    /// must be stateless; `|c| c` is enough, the unsizing coercion inside it
    /// is what proves `C` actually implements `I`.
    ///
    /// `C` itself still needs its own binding. When `C` is not exposed and
    /// nothing else depends on it, the two bindings are compressed into one
    /// node during normalization.
    pub fn bind<I, C, F>(mut self, _upcast: F) -> Self
    where
        I: ?Sized + 'static,
        C: Send + Sync + 'static,
        F: Fn(&C) -> &I + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        let interface = type_id_of_unsized::<I>();
        let class = type_id_of::<C>();
        if interface == class {
            self.poison(InjectError::InterfaceBindingToSelf {
                type_name: interface.name(),
            });
            return self;
        }
        self.push(BindingEntry {
            type_id: interface,
            kind: EntryKind::Construct {
                create: create_interface::<I, C, F>,
                deps: vec![DepRequest::hard(class)],
                arena_bytes: cell_bytes_of::<I>(),
            },
        });
        self.push(BindingEntry {
            type_id: interface,
            kind: EntryKind::Compressed {
                class_id: class,
                via: create_interface_compressed::<I, C, F>,
            },
        });
        self
    }

    /// Registers `C`'s own constructor, as described by its [`Inject`] impl
    /// (usually `#[derive(Inject)]`).
    pub fn register_constructor<C: Inject>(mut self) -> Self {
        if self.is_poisoned() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of::<C>(),
            kind: EntryKind::Construct {
                create: create_constructor::<C>,
                deps: C::dep_requests(),
                arena_bytes: slot_bytes_of::<C>() + cell_bytes_of::<C>(),
            },
        });
        self
    }

    /// Binds an already-constructed object. The component takes ownership;
    /// the injector hands out references to the one shared value and never
    /// runs a destructor for it.
    pub fn bind_instance<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        if self.is_poisoned() {
            return self;
        }
        let object = Arc::new(value);
        let raw = (&*object as *const T) as *const ();
        let object: Arc<dyn Any + Send + Sync> = object;
        self.push(BindingEntry {
            type_id: type_id_of::<T>(),
            kind: EntryKind::Instance { object, raw },
        });
        self
    }

    /// Registers a provider: a stateless closure whose tuple parameter lists
    /// the dependencies and whose return value becomes the binding for `R`.
    /// The result is moved into the injector's arena.
    pub fn register_provider<R, In, F>(mut self, _provider: F) -> Self
    where
        R: Send + Sync + 'static,
        In: DepTuple + 'static,
        F: Fn(In) -> R + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of::<R>(),
            kind: EntryKind::Construct {
                create: create_provider::<R, In, F>,
                deps: In::dep_requests(),
                arena_bytes: slot_bytes_of::<R>() + cell_bytes_of::<R>(),
            },
        });
        self
    }

    /// Provider returning heap-owned memory. The injector adopts the box and
    /// drops it at teardown; the arena only holds the pointer cell. This is
    /// the way to provide a `dyn Trait` binding directly.
    pub fn register_boxed_provider<R, In, F>(mut self, _provider: F) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
        In: DepTuple + 'static,
        F: Fn(In) -> Box<R> + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of_unsized::<R>(),
            kind: EntryKind::Construct {
                create: create_boxed_provider::<R, In, F>,
                deps: In::dep_requests(),
                arena_bytes: cell_bytes_of::<R>(),
            },
        });
        self
    }

    /// Adds `C` to the multibinding set of `I`. Unlike [`bind`], entries
    /// accumulate: each distinct registration contributes one element to
    /// `get_multibindings::<I>()`, in registration order.
    ///
    /// [`bind`]: ComponentBuilder::bind
    pub fn add_multibinding<I, C, F>(mut self, _upcast: F) -> Self
    where
        I: ?Sized + 'static,
        C: Send + Sync + 'static,
        F: Fn(&C) -> &I + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of_unsized::<I>(),
            kind: EntryKind::MultiConstruct {
                create: multi_create_interface::<I, C, F>,
                deps: vec![DepRequest::hard(type_id_of::<C>())],
                make_vec: make_vec_for::<I>(),
                arena_bytes: cell_bytes_of::<I>(),
            },
        });
        self
    }

    pub fn add_instance_multibinding<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        if self.is_poisoned() {
            return self;
        }
        let object = Arc::new(value);
        let raw = (&*object as *const T) as *const ();
        let object: Arc<dyn Any + Send + Sync> = object;
        self.push(BindingEntry {
            type_id: type_id_of::<T>(),
            kind: EntryKind::MultiInstance {
                object,
                raw,
                make_vec: make_vec_for::<T>(),
            },
        });
        self
    }

    pub fn add_multibinding_provider<R, In, F>(mut self, _provider: F) -> Self
    where
        R: Send + Sync + 'static,
        In: DepTuple + 'static,
        F: Fn(In) -> R + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of::<R>(),
            kind: EntryKind::MultiConstruct {
                create: multi_create_provider::<R, In, F>,
                deps: In::dep_requests(),
                make_vec: make_vec_for::<R>(),
                arena_bytes: slot_bytes_of::<R>() + cell_bytes_of::<R>(),
            },
        });
        self
    }

    /// Multibinding provider returning a box, typically `Box<dyn I>`; the
    /// element is registered under `R`'s key, so a trait-object return type
    /// lands in that trait's multibinding set.
    pub fn add_boxed_multibinding_provider<R, In, F>(mut self, _provider: F) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
        In: DepTuple + 'static,
        F: Fn(In) -> Box<R> + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of_unsized::<R>(),
            kind: EntryKind::MultiConstruct {
                create: multi_create_boxed_provider::<R, In, F>,
                deps: In::dep_requests(),
                make_vec: make_vec_for::<R>(),
                arena_bytes: cell_bytes_of::<R>(),
            },
        });
        self
    }

    /// Installs a sub-component lazily: the function runs during
    /// normalization, and installing the same function twice contributes its
    /// bindings once.
    pub fn install<F>(mut self, _component_fn: F) -> Self
    where
        F: Fn() -> Component + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of::<F>(),
            kind: EntryKind::Lazy(LazyEntry::no_args::<F>()),
        });
        self
    }

    /// Installs a parameterized sub-component. Two installs are the same
    /// entry when the function matches and the author's `PartialEq` on the
    /// argument tuple says the arguments match.
    pub fn install_with<F, A>(mut self, _component_fn: F, args: A) -> Self
    where
        F: Fn(A) -> Component + Copy + Send + Sync + 'static,
        A: Clone + PartialEq + Hash + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of::<F>(),
            kind: EntryKind::Lazy(LazyEntry::with_args::<F, A>(args)),
        });
        self
    }

    /// Starts a component replacement: wherever `component_fn` would be
    /// installed in this component (directly or through another install),
    /// the replacement named in the following `.with(...)` is used instead.
    pub fn replace<F>(mut self, _component_fn: F) -> ComponentReplacementBuilder
    where
        F: Fn() -> Component + Copy + Send + Sync + 'static,
    {
        let replaced = if self.is_poisoned() || !self.check_stateless::<F>() {
            None
        } else {
            Some(LazyEntry::no_args::<F>())
        };
        ComponentReplacementBuilder {
            builder: self,
            replaced,
        }
    }

    pub fn replace_with_args<F, A>(mut self, _component_fn: F, args: A) -> ComponentReplacementBuilder
    where
        F: Fn(A) -> Component + Copy + Send + Sync + 'static,
        A: Clone + PartialEq + Hash + Send + Sync + 'static,
    {
        let replaced = if self.is_poisoned() || !self.check_stateless::<F>() {
            None
        } else {
            Some(LazyEntry::with_args::<F, A>(args))
        };
        ComponentReplacementBuilder {
            builder: self,
            replaced,
        }
    }

    /// Marks `T` as part of this component's public signature. Once any type
    /// is exposed, the provided types that are not become private and
    /// eligible for binding compression.
    pub fn expose<T: ?Sized + 'static>(mut self) -> Self {
        if self.is_poisoned() {
            return self;
        }
        self.push(BindingEntry {
            type_id: type_id_of_unsized::<T>(),
            kind: EntryKind::Expose,
        });
        self
    }

    /// Splices another builder's entries after this one's.
    pub fn merge(mut self, mut other: ComponentBuilder) -> Self {
        self.entries.append(&mut other.entries);
        if self.error.is_none() {
            self.error = other.error;
        }
        self
    }

    pub fn into_component(self) -> Component {
        Component {
            entries: self.entries,
            error: self.error,
        }
    }
}

/// Second half of a [`ComponentBuilder::replace`] call.
pub struct ComponentReplacementBuilder {
    builder: ComponentBuilder,
    replaced: Option<LazyEntry>,
}

impl ComponentReplacementBuilder {
    pub fn with<G>(self, _component_fn: G) -> ComponentBuilder
    where
        G: Fn() -> Component + Copy + Send + Sync + 'static,
    {
        self.finish::<G>(|| LazyEntry::no_args::<G>())
    }

    pub fn with_args<G, B>(self, _component_fn: G, args: B) -> ComponentBuilder
    where
        G: Fn(B) -> Component + Copy + Send + Sync + 'static,
        B: Clone + PartialEq + Hash + Send + Sync + 'static,
    {
        self.finish::<G>(move || LazyEntry::with_args::<G, B>(args))
    }

    fn finish<G>(mut self, replacement: impl FnOnce() -> LazyEntry) -> ComponentBuilder
    where
        G: 'static,
    {
        if self.builder.is_poisoned() || !self.builder.check_stateless::<G>() {
            return self.builder;
        }
        let replaced = match self.replaced {
            Some(replaced) => replaced,
            None => return self.builder,
        };
        self.builder.push(BindingEntry {
            type_id: type_id_of::<ReplacedMarker>(),
            kind: EntryKind::Replaced(replaced),
        });
        self.builder.push(BindingEntry {
            type_id: type_id_of::<ReplacedMarker>(),
            kind: EntryKind::Replacement(replacement()),
        });
        self.builder
    }
}

// Placeholder key for replacement entries; their identity lives in the
// embedded LazyEntry, not in the entry's type id.
struct ReplacedMarker;

// --- per-binding create functions -----------------------------------------
//
// Each of these is monomorphized at registration and stored as a plain
// function pointer; stateless closures are re-materialized with `conjure`.
// They all return the binding's typed pointer cell.

unsafe fn create_constructor<C: Inject>(storage: &InjectorStorage, node: NodeIndex) -> *const () {
    let mut edges = storage.edge_cursor(node);
    let value = C::create(storage, &mut edges);
    let object = storage.arena_construct(value);
    storage.alloc_cell::<C>(object as *const C)
}

unsafe fn create_interface<I, C, F>(storage: &InjectorStorage, node: NodeIndex) -> *const ()
where
    I: ?Sized + 'static,
    C: Send + Sync + 'static,
    F: Fn(&C) -> &I + Copy + Send + Sync + 'static,
{
    let mut edges = storage.edge_cursor(node);
    let class_cell = storage.ensure(edges.next());
    let class_ptr = *(class_cell as *const *const C);
    let upcast = conjure::<F>();
    let fat: *const I = upcast(&*class_ptr);
    storage.alloc_cell::<I>(fat)
}

unsafe fn create_interface_compressed<I, C, F>(
    storage: &InjectorStorage,
    class_create: CreateFn,
    node: NodeIndex,
) -> *const ()
where
    I: ?Sized + 'static,
    C: Send + Sync + 'static,
    F: Fn(&C) -> &I + Copy + Send + Sync + 'static,
{
    // The interface node adopted the class's edges, so the class create can
    // resolve its dependencies through this node.
    let class_cell = class_create(storage, node);
    let class_ptr = *(class_cell as *const *const C);
    let upcast = conjure::<F>();
    let fat: *const I = upcast(&*class_ptr);
    storage.alloc_cell::<I>(fat)
}

unsafe fn create_provider<R, In, F>(storage: &InjectorStorage, node: NodeIndex) -> *const ()
where
    R: Send + Sync + 'static,
    In: DepTuple + 'static,
    F: Fn(In) -> R + Copy + Send + Sync + 'static,
{
    let mut edges = storage.edge_cursor(node);
    let deps = In::fetch(storage, &mut edges);
    let provider = conjure::<F>();
    let object = storage.arena_construct(provider(deps));
    storage.alloc_cell::<R>(object as *const R)
}

unsafe fn create_boxed_provider<R, In, F>(storage: &InjectorStorage, node: NodeIndex) -> *const ()
where
    R: ?Sized + Send + Sync + 'static,
    In: DepTuple + 'static,
    F: Fn(In) -> Box<R> + Copy + Send + Sync + 'static,
{
    let mut edges = storage.edge_cursor(node);
    let deps = In::fetch(storage, &mut edges);
    let provider = conjure::<F>();
    let fat: *const R = Box::into_raw(provider(deps));
    let cell = storage.alloc_cell::<R>(fat);
    storage.adopt_boxed::<R>(cell);
    cell
}

unsafe fn multi_create_interface<I, C, F>(storage: &InjectorStorage) -> *const ()
where
    I: ?Sized + 'static,
    C: Send + Sync + 'static,
    F: Fn(&C) -> &I + Copy + Send + Sync + 'static,
{
    let class_cell = storage.ensure_by_id(type_id_of::<C>());
    let class_ptr = *(class_cell as *const *const C);
    let upcast = conjure::<F>();
    let fat: *const I = upcast(&*class_ptr);
    storage.alloc_cell::<I>(fat)
}

unsafe fn multi_create_provider<R, In, F>(storage: &InjectorStorage) -> *const ()
where
    R: Send + Sync + 'static,
    In: DepTuple + 'static,
    F: Fn(In) -> R + Copy + Send + Sync + 'static,
{
    let deps = In::fetch_by_id(storage);
    let provider = conjure::<F>();
    let object = storage.arena_construct(provider(deps));
    storage.alloc_cell::<R>(object as *const R)
}

unsafe fn multi_create_boxed_provider<R, In, F>(storage: &InjectorStorage) -> *const ()
where
    R: ?Sized + Send + Sync + 'static,
    In: DepTuple + 'static,
    F: Fn(In) -> Box<R> + Copy + Send + Sync + 'static,
{
    let deps = In::fetch_by_id(storage);
    let provider = conjure::<F>();
    let fat: *const R = Box::into_raw(provider(deps));
    let cell = storage.alloc_cell::<R>(fat);
    storage.adopt_boxed::<R>(cell);
    cell
}

fn make_vec_for<T: ?Sized + 'static>() -> MakeVecFn {
    unsafe fn make_vec<T: ?Sized + 'static>(cells: &[*const ()]) -> crate::binding::ErasedVec {
        let v: Vec<&'static T> = cells
            .iter()
            .map(|&cell| &**(cell as *const *const T))
            .collect();
        crate::binding::ErasedVec::new::<T>(v)
    }
    make_vec::<T>
}

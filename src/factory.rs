use crate::arena::{cell_bytes_of, slot_bytes};
use crate::binding::{conjure, BindingEntry, EntryKind, NodeIndex};
use crate::component::ComponentBuilder;
use crate::inject::DepTuple;
use crate::injector::InjectorStorage;
use crate::type_info::{type_id_of_unsized, TypeId};

/// Assisted argument tuple of a factory: the parameters supplied by the
/// caller at invocation time rather than by the injector. Implemented for
/// tuples up to arity 8; the associated `Callable` is the `dyn Fn` key the
/// factory binds.
pub trait AssistedArgs<T>: Sized + Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    type Callable: ?Sized + 'static;

    fn callable_key() -> TypeId;

    fn factory_arena_bytes<In, F>() -> usize
    where
        In: DepTuple + Clone + Send + Sync + 'static,
        F: Fn(In, Self) -> T + Copy + Send + Sync + 'static;

    /// Builds the factory closure from the injected dependencies, moves it
    /// into the arena, and publishes it behind the `dyn Fn` cell.
    ///
    /// # Safety
    /// Injector-engine-only, like every binding create function.
    unsafe fn create_factory<In, F>(storage: &InjectorStorage, node: NodeIndex) -> *const ()
    where
        In: DepTuple + Clone + Send + Sync + 'static,
        F: Fn(In, Self) -> T + Copy + Send + Sync + 'static;
}

fn closure_slot_bytes<In, C>(_make: fn(In) -> C) -> usize {
    slot_bytes(std::mem::size_of::<C>(), std::mem::align_of::<C>())
}

macro_rules! impl_assisted_args {
    ($closure_fn:ident; $($A:ident $a:ident),*) => {
        fn $closure_fn<T, In, F, $($A),*>(injected: In) -> impl Fn($($A),*) -> T + Send + Sync + 'static
        where
            T: Send + Sync + 'static,
            In: DepTuple + Clone + Send + Sync + 'static,
            F: Fn(In, ($($A,)*)) -> T + Copy + Send + Sync + 'static,
            $($A: Clone + Send + Sync + 'static,)*
        {
            move |$($a: $A),*| {
                let factory = unsafe { conjure::<F>() };
                factory(injected.clone(), ($($a,)*))
            }
        }

        impl<T, $($A),*> AssistedArgs<T> for ($($A,)*)
        where
            T: Send + Sync + 'static,
            $($A: Clone + Send + Sync + 'static,)*
        {
            type Callable = dyn Fn($($A),*) -> T + Send + Sync;

            fn callable_key() -> TypeId {
                type_id_of_unsized::<Self::Callable>()
            }

            fn factory_arena_bytes<In, F>() -> usize
            where
                In: DepTuple + Clone + Send + Sync + 'static,
                F: Fn(In, Self) -> T + Copy + Send + Sync + 'static,
            {
                let make: fn(In) -> _ = $closure_fn::<T, In, F, $($A),*>;
                closure_slot_bytes(make) + cell_bytes_of::<Self::Callable>()
            }

            unsafe fn create_factory<In, F>(
                storage: &InjectorStorage,
                node: NodeIndex,
            ) -> *const ()
            where
                In: DepTuple + Clone + Send + Sync + 'static,
                F: Fn(In, Self) -> T + Copy + Send + Sync + 'static,
            {
                let mut edges = storage.edge_cursor(node);
                let injected = In::fetch(storage, &mut edges);
                let closure = $closure_fn::<T, In, F, $($A),*>(injected);
                let object = storage.arena_construct(closure);
                // Unsizing coercion to the fat callable pointer.
                let fat: *const (dyn Fn($($A),*) -> T + Send + Sync) = object;
                storage.alloc_cell::<Self::Callable>(fat)
            }
        }
    };
}

impl_assisted_args!(factory_closure_0;);
impl_assisted_args!(factory_closure_1; A1 a1);
impl_assisted_args!(factory_closure_2; A1 a1, A2 a2);
impl_assisted_args!(factory_closure_3; A1 a1, A2 a2, A3 a3);
impl_assisted_args!(factory_closure_4; A1 a1, A2 a2, A3 a3, A4 a4);
impl_assisted_args!(factory_closure_5; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_assisted_args!(factory_closure_6; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_assisted_args!(factory_closure_7; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_assisted_args!(factory_closure_8; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

impl ComponentBuilder {
    /// Registers an assisted factory for `T`.
    ///
    /// The stateless closure receives the injected dependency tuple and the
    /// caller-supplied (assisted) tuple, and returns `T` by value. The
    /// binding key is `dyn Fn(assisted...) -> T + Send + Sync`, so the
    /// factory is fetched and invoked like any other binding:
    ///
    /// ```
    /// use graft::{create_component, Injector};
    ///
    /// #[derive(Clone)]
    /// struct Scaler {
    ///     factor: f64,
    /// }
    ///
    /// let component = create_component()
    ///     .register_factory(|(): (), (factor,): (f64,)| Scaler { factor })
    ///     .into_component();
    /// let injector = Injector::new(component).unwrap();
    /// let factory = injector.get::<dyn Fn(f64) -> Scaler + Send + Sync>();
    /// assert_eq!(factory(2.5).factor, 2.5);
    /// ```
    pub fn register_factory<T, In, Args, F>(mut self, _factory: F) -> Self
    where
        T: Send + Sync + 'static,
        In: DepTuple + Clone + Send + Sync + 'static,
        Args: AssistedArgs<T>,
        F: Fn(In, Args) -> T + Copy + Send + Sync + 'static,
    {
        if self.is_poisoned() || !self.check_stateless::<F>() {
            return self;
        }
        self.push(BindingEntry {
            type_id: Args::callable_key(),
            kind: EntryKind::Construct {
                create: Args::create_factory::<In, F>,
                deps: In::dep_requests(),
                arena_bytes: Args::factory_arena_bytes::<In, F>(),
            },
        });
        self
    }
}

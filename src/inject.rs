use crate::binding::DepRequest;
use crate::injector::InjectorStorage;
use crate::semistatic_graph::EdgeCursor;
use crate::type_info::type_id_of;

/// A type constructible by the injector. Usually generated with
/// `#[derive(Inject)]`; hand-written impls are fine as long as `create`
/// fetches hard dependencies in exactly the order `dep_requests` lists them.
pub trait Inject: Sized + Send + Sync + 'static {
    fn dep_requests() -> Vec<DepRequest>;

    /// Fetches the dependencies and builds the value.
    ///
    /// # Safety
    /// Only the injector engine may call this: `edges` must be positioned at
    /// this binding's first hard dependency and every edge must point at a
    /// constructible node.
    unsafe fn create(storage: &InjectorStorage, edges: &mut EdgeCursor<'_>) -> Self;
}

/// A tuple of dependencies for provider and factory closures. Every element
/// is fetched from the injector as a cloned value.
pub trait DepTuple: Sized {
    fn dep_requests() -> Vec<DepRequest>;

    /// # Safety
    /// Same contract as [`Inject::create`].
    unsafe fn fetch(storage: &InjectorStorage, edges: &mut EdgeCursor<'_>) -> Self;

    /// Fetch by type-id lookup instead of edges. Multibinding elements are
    /// not graph nodes, so their creates resolve dependencies this way.
    ///
    /// # Safety
    /// Every element type must be provided by the injector.
    unsafe fn fetch_by_id(storage: &InjectorStorage) -> Self;
}

impl DepTuple for () {
    fn dep_requests() -> Vec<DepRequest> {
        vec![]
    }

    unsafe fn fetch(_: &InjectorStorage, _: &mut EdgeCursor<'_>) -> Self {}

    unsafe fn fetch_by_id(_: &InjectorStorage) -> Self {}
}

impl<Arg1: Clone + Send + Sync + 'static> DepTuple for (Arg1,) {
    fn dep_requests() -> Vec<DepRequest> {
        vec![DepRequest::hard(type_id_of::<Arg1>())]
    }

    unsafe fn fetch(storage: &InjectorStorage, edges: &mut EdgeCursor<'_>) -> Self {
        (storage.fetch_value::<Arg1>(edges),)
    }

    unsafe fn fetch_by_id(storage: &InjectorStorage) -> Self {
        (storage.fetch_value_by_id::<Arg1>(),)
    }
}

macro_rules! build_dep_tuple {
    ($($tuple_type:ident),*) => {
        impl<$($tuple_type: Clone + Send + Sync + 'static),*> DepTuple for ($($tuple_type),*) {
            fn dep_requests() -> Vec<DepRequest> {
                vec![$( DepRequest::hard(type_id_of::<$tuple_type>()) ),*]
            }

            unsafe fn fetch(storage: &InjectorStorage, edges: &mut EdgeCursor<'_>) -> Self {
                ($( storage.fetch_value::<$tuple_type>(edges) ),*)
            }

            unsafe fn fetch_by_id(storage: &InjectorStorage) -> Self {
                ($( storage.fetch_value_by_id::<$tuple_type>() ),*)
            }
        }
    }
}

build_dep_tuple!(Arg1, Arg2);
build_dep_tuple!(Arg1, Arg2, Arg3);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9, Arg10);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9, Arg10, Arg11);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9, Arg10, Arg11, Arg12);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9, Arg10, Arg11, Arg12, Arg13);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9, Arg10, Arg11, Arg12, Arg13, Arg14);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9, Arg10, Arg11, Arg12, Arg13, Arg14, Arg15);
build_dep_tuple!(Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, Arg7, Arg8, Arg9, Arg10, Arg11, Arg12, Arg13, Arg14, Arg15, Arg16);

use dyn_clone::DynClone;
use graft::{create_component, Inject, Injector, Provider, Tagged};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn resolve_simple_values() {
    #[derive(Inject, Clone)]
    struct A {
        x: u32,
    }
    #[derive(Inject, Clone)]
    struct B {
        a: A,
    }
    #[derive(Inject, Clone)]
    struct C {
        b: B,
    }

    let injector = Injector::new(
        create_component()
            .bind_instance(1u32)
            .register_constructor::<A>()
            .register_constructor::<B>()
            .register_constructor::<C>()
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<C>().b.a.x, 1);
}

#[test]
fn registration_order_does_not_matter() {
    #[derive(Inject, Clone)]
    struct A {
        x: u32,
    }
    #[derive(Inject, Clone)]
    struct B {
        a: A,
    }

    let injector = Injector::new(
        create_component()
            .register_constructor::<B>()
            .register_constructor::<A>()
            .bind_instance(3u32)
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<B>().a.x, 3);
}

#[test]
fn interface_binding_returns_the_implementation() {
    trait Writer: Send + Sync {
        fn id(&self) -> &'static str;
    }

    #[derive(Clone)]
    struct StdoutWriter;

    impl Writer for StdoutWriter {
        fn id(&self) -> &'static str {
            "stdout"
        }
    }

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| {
                CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                StdoutWriter
            })
            .bind::<dyn Writer, StdoutWriter, _>(|w| w)
            .into_component(),
    )
    .unwrap();

    let writer = injector.get::<dyn Writer>();
    assert_eq!(writer.id(), "stdout");
    let again = injector.get::<dyn Writer>();
    assert_eq!(again.id(), "stdout");
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
}

#[test]
fn providers_run_exactly_once() {
    #[derive(Clone)]
    struct X {
        n: u64,
    }

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| {
                CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                X { n: 11 }
            })
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<X>().n, 11);
    assert_eq!(injector.get::<X>().n, 11);
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
}

#[test]
fn get_returns_the_same_object_identity() {
    #[derive(Clone)]
    struct X;

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| X)
            .into_component(),
    )
    .unwrap();

    let first = injector.get::<X>() as *const X;
    let second = injector.get::<X>() as *const X;
    assert_eq!(first, second);
}

#[test]
fn provider_dependencies_are_fetched_as_values() {
    #[derive(Clone)]
    struct Config {
        base: u32,
    }
    #[derive(Clone)]
    struct Doubled(u32);
    #[derive(Clone)]
    struct Summed(u32);

    let injector = Injector::new(
        create_component()
            .bind_instance(Config { base: 20 })
            .register_provider(|(config,): (Config,)| Doubled(config.base * 2))
            .register_provider(|(config, doubled): (Config, Doubled)| {
                Summed(config.base + doubled.0)
            })
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<Summed>().0, 60);
}

#[test]
fn boxed_provider_binds_a_trait_object() {
    trait Codec: Send + Sync {
        fn tag(&self) -> u8;
    }

    struct Lz4;
    impl Codec for Lz4 {
        fn tag(&self) -> u8 {
            4
        }
    }

    let injector = Injector::new(
        create_component()
            .register_boxed_provider(|(): ()| -> Box<dyn Codec + Send + Sync> { Box::new(Lz4) })
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<dyn Codec + Send + Sync>().tag(), 4);
}

#[test]
fn tagged_bindings_coexist_with_the_plain_type() {
    struct Primary;

    let injector = Injector::new(
        create_component()
            .bind_instance(7u32)
            .bind_instance(Tagged::<u32, Primary>::new(9))
            .into_component(),
    )
    .unwrap();

    assert_eq!(*injector.get::<u32>(), 7);
    assert_eq!(**injector.get::<Tagged<u32, Primary>>(), 9);
}

#[test]
fn provider_parameter_breaks_a_dependency_cycle() {
    #[derive(Inject, Clone)]
    struct Chicken {
        tag: u32,
        egg: Provider<Egg>,
    }
    #[derive(Inject, Clone)]
    struct Egg {
        chicken: Chicken,
    }

    let injector = Injector::new(
        create_component()
            .bind_instance(5u32)
            .register_constructor::<Chicken>()
            .register_constructor::<Egg>()
            .into_component(),
    )
    .unwrap();

    let egg = injector.get::<Egg>();
    assert_eq!(egg.chicken.tag, 5);
    // The deferred handle resolves to the one singleton.
    assert_eq!(egg.chicken.egg.get().chicken.tag, 5);
}

#[test]
fn provider_get_during_injection_is_fine() {
    #[derive(Inject, Clone)]
    struct Inner {
        n: u32,
    }
    #[derive(Inject, Clone)]
    struct Holder {
        inner: Provider<Inner>,
    }
    #[derive(Clone)]
    struct Computed(u32);

    let injector = Injector::new(
        create_component()
            .bind_instance(21u32)
            .register_constructor::<Inner>()
            .register_constructor::<Holder>()
            .register_provider(|(holder,): (Holder,)| Computed(holder.inner.get().n * 2))
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<Computed>().0, 42);
}

#[test]
fn injector_provider_handle_from_outside() {
    #[derive(Clone, PartialEq, Debug)]
    struct X(u32);

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| X(3))
            .into_component(),
    )
    .unwrap();

    let provider = injector.provider::<X>();
    assert_eq!(provider.get(), X(3));
    drop(injector);
}

#[test]
#[should_panic(expected = "Provider::get called after its injector was dropped")]
fn provider_after_injector_drop_panics() {
    #[derive(Clone)]
    struct X;

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| X)
            .into_component(),
    )
    .unwrap();
    let provider = injector.provider::<X>();
    drop(injector);
    provider.get();
}

#[test]
fn unsafe_get_probes_without_aborting() {
    #[derive(Clone)]
    struct Bound;
    #[derive(Clone)]
    struct Unbound;

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| Bound)
            .into_component(),
    )
    .unwrap();

    assert!(injector.unsafe_get::<Bound>().is_some());
    assert!(injector.unsafe_get::<Unbound>().is_none());
}

#[test]
#[should_panic(expected = "was not provided by this injector")]
fn get_of_an_unbound_type_is_fatal() {
    #[derive(Clone)]
    struct Missing;

    let injector = Injector::new(create_component().into_component()).unwrap();
    injector.get::<Missing>();
}

#[test]
fn eager_injection_constructs_everything_up_front() {
    #[derive(Clone)]
    struct A;
    #[derive(Clone)]
    struct B;

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| {
                CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                A
            })
            .register_provider(|(): ()| {
                CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                B
            })
            .into_component(),
    )
    .unwrap();

    injector.eagerly_inject_all();
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 2);
    injector.get::<A>();
    injector.get::<B>();
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 2);
}

#[test]
fn derive_supports_defaults() {
    fn answer() -> u64 {
        42
    }

    #[derive(Inject, Clone)]
    struct WithDefaults {
        x: u32,
        #[inject(default)]
        y: u32,
        #[inject(default = answer)]
        z: u64,
    }

    let injector = Injector::new(
        create_component()
            .bind_instance(1u32)
            .register_constructor::<WithDefaults>()
            .into_component(),
    )
    .unwrap();

    let value = injector.get::<WithDefaults>();
    assert_eq!(value.x, 1);
    assert_eq!(value.y, 0);
    assert_eq!(value.z, 42);
}

#[test]
fn derive_supports_generics_and_unit_structs() {
    #[derive(Inject, Clone)]
    struct Holder<T> {
        x: T,
    }
    #[derive(Inject, Clone)]
    struct Unit;

    let injector = Injector::new(
        create_component()
            .bind_instance(1u32)
            .bind_instance(2u64)
            .register_constructor::<Holder<u32>>()
            .register_constructor::<Holder<u64>>()
            .register_constructor::<Unit>()
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<Holder<u32>>().x, 1);
    assert_eq!(injector.get::<Holder<u64>>().x, 2);
    injector.get::<Unit>();
}

#[test]
fn clonable_boxed_trait_objects_inject_like_values() {
    trait Algo: DynClone + Send + Sync {
        fn id(&self) -> u32;
    }
    dyn_clone::clone_trait_object!(Algo);

    #[derive(Clone)]
    struct Fast;
    impl Algo for Fast {
        fn id(&self) -> u32 {
            1
        }
    }

    #[derive(Inject, Clone)]
    struct Engine {
        algo: Box<dyn Algo>,
    }

    let injector = Injector::new(
        create_component()
            .bind_instance(Box::new(Fast) as Box<dyn Algo>)
            .register_constructor::<Engine>()
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<Engine>().algo.id(), 1);
}

#[test]
fn merged_builders_behave_like_one() {
    #[derive(Inject, Clone)]
    struct A {
        x: u32,
    }
    #[derive(Inject, Clone)]
    struct B {
        a: A,
        y: u64,
    }

    let first = create_component()
        .register_constructor::<B>()
        .register_constructor::<A>();
    let second = create_component().bind_instance(1u32).bind_instance(2u64);

    let injector = Injector::new(first.merge(second).into_component()).unwrap();
    let b = injector.get::<B>();
    assert_eq!(b.a.x, 1);
    assert_eq!(b.y, 2);
}

#[test]
fn concurrent_gets_share_one_singleton() {
    #[derive(Clone)]
    struct X(u64);

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| {
                CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                X(7)
            })
            .into_component(),
    )
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let injector = injector.clone();
            std::thread::spawn(move || injector.get::<X>().0)
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 7);
    }
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
}

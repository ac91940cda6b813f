use graft::{create_component, Injector};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn assisted_factories_mix_caller_and_injected_arguments() {
    #[derive(Clone)]
    struct Scaler {
        factor: f64,
    }

    impl Scaler {
        fn scale(&self, x: f64) -> f64 {
            self.factor * x
        }
    }

    let injector = Injector::new(
        create_component()
            .register_factory(|(): (), (factor,): (f64,)| Scaler { factor })
            .into_component(),
    )
    .unwrap();

    let factory = injector.get::<dyn Fn(f64) -> Scaler + Send + Sync>();
    let scaled = factory(12.1).scale(3.0);
    assert!((scaled - 36.3).abs() < 1e-9);
}

#[test]
fn factories_capture_injected_dependencies() {
    #[derive(Clone)]
    struct Prefix(&'static str);
    #[derive(Clone)]
    struct Message(String);

    let injector = Injector::new(
        create_component()
            .bind_instance(Prefix("log: "))
            .register_factory(|(prefix,): (Prefix,), (body,): (String,)| {
                Message(format!("{}{}", prefix.0, body))
            })
            .into_component(),
    )
    .unwrap();

    let factory = injector.get::<dyn Fn(String) -> Message + Send + Sync>();
    assert_eq!(factory("hello".to_string()).0, "log: hello");
    assert_eq!(factory("again".to_string()).0, "log: again");
}

#[test]
fn factory_objects_are_singletons_too() {
    #[derive(Clone)]
    struct Widget {
        id: u32,
    }

    static FACTORY_BUILDS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Clone)]
    struct Seed(u32);

    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| {
                FACTORY_BUILDS.fetch_add(1, Ordering::SeqCst);
                Seed(100)
            })
            .register_factory(|(seed,): (Seed,), (offset,): (u32,)| Widget {
                id: seed.0 + offset,
            })
            .into_component(),
    )
    .unwrap();

    let factory = injector.get::<dyn Fn(u32) -> Widget + Send + Sync>();
    assert_eq!(factory(1).id, 101);
    assert_eq!(factory(2).id, 102);
    let factory_again = injector.get::<dyn Fn(u32) -> Widget + Send + Sync>();
    assert_eq!(factory_again(3).id, 103);
    // The injected dependency was fetched when the factory was built, once.
    assert_eq!(FACTORY_BUILDS.load(Ordering::SeqCst), 1);
}

#[test]
fn factories_with_several_assisted_arguments_forward_in_order() {
    #[derive(Clone, PartialEq, Debug)]
    struct Rect {
        w: u32,
        h: u32,
        label: &'static str,
    }

    let injector = Injector::new(
        create_component()
            .register_factory(
                |(): (), (w, h, label): (u32, u32, &'static str)| Rect { w, h, label },
            )
            .into_component(),
    )
    .unwrap();

    let factory = injector.get::<dyn Fn(u32, u32, &'static str) -> Rect + Send + Sync>();
    assert_eq!(
        factory(3, 4, "box"),
        Rect {
            w: 3,
            h: 4,
            label: "box"
        }
    );
}

#[test]
fn zero_argument_factories_are_plain_makers() {
    #[derive(Clone)]
    struct Token(u32);

    #[derive(Clone)]
    struct Counter(u32);

    let injector = Injector::new(
        create_component()
            .bind_instance(Counter(41))
            .register_factory(|(counter,): (Counter,), (): ()| Token(counter.0 + 1))
            .into_component(),
    )
    .unwrap();

    let factory = injector.get::<dyn Fn() -> Token + Send + Sync>();
    assert_eq!(factory().0, 42);
    assert_eq!(factory().0, 42);
}

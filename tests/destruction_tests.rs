use graft::{create_component, Injector};
use parking_lot::Mutex;

static DROP_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

// The tracked types are shared between tests, so the tests serialize on
// this lock to keep the log readable.
static TEST_LOCK: Mutex<()> = Mutex::new(());

fn drained_log() -> Vec<&'static str> {
    std::mem::take(&mut *DROP_LOG.lock())
}

// The tracked types are deliberately dependency-free so the construction
// order is exactly the order of the `get` calls.
macro_rules! tracked {
    ($name:ident, $label:literal) => {
        struct $name;
        impl Drop for $name {
            fn drop(&mut self) {
                DROP_LOG.lock().push($label);
            }
        }
    };
}

tracked!(First, "first");
tracked!(Second, "second");
tracked!(Third, "third");
tracked!(External, "external");
tracked!(Boxed, "boxed");

#[test]
fn destruction_runs_in_reverse_construction_order() {
    let _serial = TEST_LOCK.lock();
    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| First)
            .register_provider(|(): ()| Second)
            .register_provider(|(): ()| Third)
            .into_component(),
    )
    .unwrap();

    drained_log();
    injector.get::<First>();
    injector.get::<Second>();
    injector.get::<Third>();
    drop(injector);

    assert_eq!(drained_log(), vec!["third", "second", "first"]);
}

#[test]
fn unconstructed_bindings_are_never_destroyed() {
    let _serial = TEST_LOCK.lock();
    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| First)
            .register_provider(|(): ()| Second)
            .into_component(),
    )
    .unwrap();

    drained_log();
    injector.get::<Second>();
    drop(injector);

    assert_eq!(drained_log(), vec!["second"]);
}

#[test]
fn instance_bindings_outlive_the_destroy_list() {
    let _serial = TEST_LOCK.lock();
    let injector = Injector::new(
        create_component()
            .bind_instance(External)
            .register_provider(|(): ()| First)
            .into_component(),
    )
    .unwrap();

    drained_log();
    injector.get::<External>();
    injector.get::<First>();
    drop(injector);

    // The arena-owned object is destroyed through the LIFO list; the
    // instance is dropped later, with the component's keep-alive storage.
    assert_eq!(drained_log(), vec!["first", "external"]);
}

#[test]
fn adopted_boxes_from_boxed_providers_are_dropped() {
    let _serial = TEST_LOCK.lock();
    trait Resource: Send + Sync {
        fn touch(&self) {}
    }
    impl Resource for Boxed {}

    let injector = Injector::new(
        create_component()
            .register_boxed_provider(|(): ()| -> Box<dyn Resource> { Box::new(Boxed) })
            .into_component(),
    )
    .unwrap();

    drained_log();
    injector.get::<dyn Resource>().touch();
    drop(injector);

    assert_eq!(drained_log(), vec!["boxed"]);
}

#[test]
fn eagerly_injected_objects_destroy_in_reverse_registration_order() {
    let _serial = TEST_LOCK.lock();
    let injector = Injector::new(
        create_component()
            .register_provider(|(): ()| Second)
            .register_provider(|(): ()| First)
            .into_component(),
    )
    .unwrap();

    drained_log();
    injector.eagerly_inject_all();
    drop(injector);

    // Eager injection walks the graph in normalization order, which is
    // registration order here.
    assert_eq!(drained_log(), vec!["first", "second"]);
}

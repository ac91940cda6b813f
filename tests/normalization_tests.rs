use graft::{
    create_component, Component, Inject, InjectError, Injector, NormalizedComponent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn conflicting_bindings_for_one_type_are_fatal() {
    #[derive(Clone)]
    struct X(#[allow(dead_code)] u32);

    let result = Injector::new(
        create_component()
            .register_provider(|(): ()| X(0))
            .register_provider(|(): ()| X(1))
            .into_component(),
    );

    let err = result.err().unwrap().to_string();
    assert!(err.contains("provided more than once, with different bindings"));
    assert!(err.contains("X"));
}

#[test]
fn identical_duplicate_bindings_collapse_silently() {
    #[derive(Clone)]
    struct X(u32);

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    let provider = |(): ()| {
        CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
        X(9)
    };

    let injector = Injector::new(
        create_component()
            .register_provider(provider)
            .register_provider(provider)
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<X>().0, 9);
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_dependencies_are_reported_with_names() {
    #[derive(Clone)]
    struct MissingDep;
    #[derive(Inject, Clone)]
    struct NeedsIt {
        dep: MissingDep,
    }

    let result = Injector::new(
        create_component()
            .register_constructor::<NeedsIt>()
            .into_component(),
    );

    let err = result.err().unwrap().to_string();
    assert!(err.contains("MissingDep"));
}

#[test]
fn dependency_cycles_are_rejected() {
    #[derive(Inject, Clone)]
    struct A {
        b: Box<B>,
    }
    #[derive(Inject, Clone)]
    struct B {
        a: A,
    }
    #[derive(Inject, Clone)]
    struct Bystander;

    impl graft::inject::Inject for Box<B> {
        fn dep_requests() -> Vec<graft::DepRequest> {
            vec![graft::DepRequest::hard(graft::type_id_of::<B>())]
        }
        unsafe fn create(
            storage: &graft::InjectorStorage,
            edges: &mut graft::EdgeCursor<'_>,
        ) -> Self {
            Box::new(storage.fetch_value::<B>(edges))
        }
    }

    let result = Injector::new(
        create_component()
            .register_constructor::<A>()
            .register_constructor::<B>()
            .register_constructor::<Box<B>>()
            .register_constructor::<Bystander>()
            .into_component(),
    );

    let err = result.err().unwrap().to_string();
    assert!(err.contains("cycle"));
    assert!(err.contains("A"));
    assert!(!err.contains("Bystander"));
}

#[test]
fn self_loops_are_rejected() {
    // A provider whose dependency tuple names its own result type.
    #[derive(Clone)]
    struct Direct(#[allow(dead_code)] u32);

    let result = Injector::new(
        create_component()
            .register_provider(|(prev,): (Direct,)| Direct(prev.0 + 1))
            .into_component(),
    );
    let err = result.err().unwrap();
    match err.downcast_ref::<InjectError>() {
        Some(InjectError::SelfLoop { type_name }) => assert!(type_name.contains("Direct")),
        other => panic!("expected a self-loop error, got {other:?}"),
    }
}

#[test]
fn binding_an_interface_to_itself_is_rejected() {
    #[derive(Clone)]
    struct C;

    let result = Injector::new(
        create_component()
            .bind::<C, C, _>(|c| c)
            .register_provider(|(): ()| C)
            .into_component(),
    );
    let err = result.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<InjectError>(),
        Some(InjectError::InterfaceBindingToSelf { .. })
    ));
}

#[test]
fn capturing_closures_are_rejected() {
    #[derive(Clone)]
    struct X(#[allow(dead_code)] u32);

    let captured = 5u32;
    let result = Injector::new(
        create_component()
            .register_provider(move |(): ()| X(captured))
            .into_component(),
    );

    let err = result.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<InjectError>(),
        Some(InjectError::LambdaWithCaptures { .. })
    ));
    assert!(err.to_string().contains("captures state"));
}

#[test]
fn the_first_error_wins_and_poisons_the_builder() {
    #[derive(Clone)]
    struct X(#[allow(dead_code)] u32);

    let captured = 1u32;
    let result = Injector::new(
        create_component()
            .register_provider(move |(): ()| X(captured))
            // A later, different mistake; the recorded error stays the first.
            .bind::<X, X, _>(|x| x)
            .into_component(),
    );

    assert!(matches!(
        result.err().unwrap().downcast_ref::<InjectError>(),
        Some(InjectError::LambdaWithCaptures { .. })
    ));
}

#[test]
fn normalized_components_report_requirements_and_provisions() {
    #[derive(Clone)]
    struct Db;
    #[derive(Inject, Clone)]
    struct Repo {
        db: Db,
    }

    let normalized = NormalizedComponent::new(
        create_component()
            .register_constructor::<Repo>()
            .into_component(),
    )
    .unwrap();

    let requirements: Vec<&str> = normalized.requirements().iter().map(|t| t.name()).collect();
    let provides: Vec<&str> = normalized.provides().iter().map(|t| t.name()).collect();
    assert_eq!(requirements.len(), 1);
    assert!(requirements[0].contains("Db"));
    assert_eq!(provides.len(), 1);
    assert!(provides[0].contains("Repo"));

    // An injector cannot be built until the requirement is satisfied...
    let normalized = Arc::new(normalized);
    let unsatisfied = Injector::with_normalized(&normalized, create_component().into_component());
    let err = unsatisfied.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<InjectError>(),
        Some(InjectError::InjectorWithRequirements { .. })
    ));

    // ...and the extra component can satisfy it.
    let injector = Injector::with_normalized(
        &normalized,
        create_component().bind_instance(Db).into_component(),
    )
    .unwrap();
    let _repo = injector.get::<Repo>();
}

#[test]
fn extra_component_conflicts_leave_the_normalized_component_usable() {
    #[derive(Clone)]
    struct Conflicted(u32);

    fn parent() -> Component {
        create_component()
            .register_provider(|(): ()| Conflicted(1))
            .into_component()
    }

    let normalized = Arc::new(NormalizedComponent::new(parent()).unwrap());

    let conflicting = create_component()
        .register_provider(|(): ()| Conflicted(2))
        .into_component();
    let result = Injector::with_normalized(&normalized, conflicting);
    let err = result.err().unwrap().to_string();
    assert!(err.contains("provided more than once, with different bindings"));
    assert!(err.contains("Conflicted"));

    // The failure is per-injector: the normalized component still works.
    let injector =
        Injector::with_normalized(&normalized, create_component().into_component()).unwrap();
    assert_eq!(injector.get::<Conflicted>().0, 1);
}

#[test]
fn installs_are_deduplicated() {
    #[derive(Clone)]
    struct X(u32);

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    fn x_component() -> Component {
        create_component()
            .register_provider(|(): ()| {
                CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
                X(3)
            })
            .into_component()
    }

    let injector = Injector::new(
        create_component()
            .install(x_component)
            .install(x_component)
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<X>().0, 3);
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
    // Exactly one binding for X survived normalization.
    let normalized = NormalizedComponent::new(
        create_component()
            .install(x_component)
            .install(x_component)
            .into_component(),
    )
    .unwrap();
    assert_eq!(normalized.provides().len(), 1);
}

#[test]
fn parameterized_installs_deduplicate_by_argument_equality() {
    #[derive(Clone)]
    struct Named(&'static str);

    fn named_component(args: (&'static str,)) -> Component {
        create_component()
            .add_instance_multibinding(Named(args.0))
            .into_component()
    }

    let injector = Injector::new(
        create_component()
            .install_with(named_component, ("a",))
            .install_with(named_component, ("a",))
            .install_with(named_component, ("b",))
            .into_component(),
    )
    .unwrap();

    let named = injector.get_multibindings::<Named>();
    let names: Vec<&str> = named.iter().map(|n| n.0).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn nested_installs_are_expanded_and_deduplicated() {
    #[derive(Clone)]
    struct Leaf(u32);

    fn leaf_component() -> Component {
        create_component()
            .register_provider(|(): ()| Leaf(1))
            .into_component()
    }

    fn middle_component() -> Component {
        create_component().install(leaf_component).into_component()
    }

    let injector = Injector::new(
        create_component()
            .install(middle_component)
            .install(leaf_component)
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<Leaf>().0, 1);
}

#[test]
fn replacement_applies_regardless_of_call_order() {
    #[derive(Clone)]
    struct X(u32);

    fn real_component() -> Component {
        create_component()
            .register_provider(|(): ()| X(1))
            .into_component()
    }

    fn fake_component() -> Component {
        create_component()
            .register_provider(|(): ()| X(2))
            .into_component()
    }

    let builders: Vec<Component> = vec![
        create_component()
            .replace(real_component)
            .with(fake_component)
            .install(real_component)
            .install(fake_component)
            .into_component(),
        create_component()
            .install(real_component)
            .replace(real_component)
            .with(fake_component)
            .install(fake_component)
            .into_component(),
        create_component()
            .install(real_component)
            .install(fake_component)
            .replace(real_component)
            .with(fake_component)
            .into_component(),
    ];

    for component in builders {
        let injector = Injector::new(component).unwrap();
        assert_eq!(injector.get::<X>().0, 2);
    }
}

#[test]
fn double_replacement_with_different_targets_is_rejected() {
    #[derive(Clone)]
    struct X(#[allow(dead_code)] u32);

    fn real_component() -> Component {
        create_component()
            .register_provider(|(): ()| X(1))
            .into_component()
    }
    fn fake_a() -> Component {
        create_component()
            .register_provider(|(): ()| X(2))
            .into_component()
    }
    fn fake_b() -> Component {
        create_component()
            .register_provider(|(): ()| X(3))
            .into_component()
    }

    let result = Injector::new(
        create_component()
            .replace(real_component)
            .with(fake_a)
            .replace(real_component)
            .with(fake_b)
            .install(real_component)
            .into_component(),
    );

    assert!(matches!(
        result.err().unwrap().downcast_ref::<InjectError>(),
        Some(InjectError::DoubleReplacement { .. })
    ));
}

#[test]
fn replacing_a_component_with_itself_is_rejected() {
    #[derive(Clone)]
    struct X(#[allow(dead_code)] u32);

    fn real_component() -> Component {
        create_component()
            .register_provider(|(): ()| X(1))
            .into_component()
    }

    let result = Injector::new(
        create_component()
            .replace(real_component)
            .with(real_component)
            .install(real_component)
            .into_component(),
    );

    assert!(matches!(
        result.err().unwrap().downcast_ref::<InjectError>(),
        Some(InjectError::ComponentReplacementInItself { .. })
    ));
}

#[test]
fn extra_components_can_depend_on_the_base() {
    #[derive(Clone)]
    struct Base(u32);
    #[derive(Clone)]
    struct PerRequest(u32);

    fn base_component() -> Component {
        create_component()
            .register_provider(|(): ()| Base(10))
            .into_component()
    }

    let normalized = Arc::new(NormalizedComponent::new(base_component()).unwrap());

    let injector = Injector::with_normalized(
        &normalized,
        create_component()
            .register_provider(|(base,): (Base,)| PerRequest(base.0 + 1))
            .into_component(),
    )
    .unwrap();

    assert_eq!(injector.get::<PerRequest>().0, 11);
}

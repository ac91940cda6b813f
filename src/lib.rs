//! Graft is a component-based dependency injection library: binding sets are
//! assembled with a fluent builder, checked for missing, duplicated, and
//! cyclic dependencies when the component is normalized, and materialized by
//! an injector that constructs each object lazily, exactly once.
//!
//! ```
//! use graft::{create_component, Inject, Injector};
//!
//! #[derive(Inject, Clone)]
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! let component = create_component()
//!     .bind_instance("hello".to_string())
//!     .register_constructor::<Greeter>()
//!     .into_component();
//!
//! let injector = Injector::new(component).unwrap();
//! assert_eq!(injector.get::<Greeter>().greeting, "hello");
//! ```
//!
//! Components compose through [`ComponentBuilder::install`], which expands
//! sub-components during normalization and deduplicates repeated installs.
//! A [`NormalizedComponent`] is immutable, can be shared behind an `Arc`,
//! and combined with per-injector extra bindings via
//! [`Injector::with_normalized`].

mod arena;
mod binding;
pub mod component;
pub mod errors;
pub mod factory;
pub mod inject;
pub mod injector;
mod lazy_component;
pub mod normalize;
mod semistatic_graph;
mod semistatic_map;
pub mod tags;
pub mod type_info;

pub use binding::DepRequest;
pub use component::{create_component, Component, ComponentBuilder, ComponentReplacementBuilder};
pub use errors::InjectError;
pub use factory::AssistedArgs;
pub use inject::{DepTuple, Inject};
pub use injector::{Injector, InjectorStorage, Provider};
pub use normalize::NormalizedComponent;
pub use semistatic_graph::EdgeCursor;
pub use tags::Tagged;
pub use type_info::{type_id_of, type_id_of_unsized, TypeId};

pub use graft_macros::Inject;

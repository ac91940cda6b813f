use thiserror::Error;

/// Structural errors detected while composing components.
///
/// The first error poisons the builder: later builder calls are ignored and
/// normalization reports the recorded error. Fatal runtime conditions (asking
/// an injector for a type it does not hold, or a construction cycle reached
/// through `Provider::get`) are not represented here; those panic with a
/// message naming the offending type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InjectError {
    #[error("the type {type_name} was provided more than once, with different bindings")]
    TypeAlreadyBound { type_name: &'static str },

    #[error("{details}")]
    NoBindingFound { details: String },

    #[error("dependency cycle (one or more) found: {type_names}")]
    DependencyCycle { type_names: String },

    #[error("the type {type_name} depends on itself")]
    SelfLoop { type_name: &'static str },

    #[error("cannot bind the interface {type_name} to itself")]
    InterfaceBindingToSelf { type_name: &'static str },

    #[error("cannot create an injector, these requirements are unsatisfied: {type_names}")]
    InjectorWithRequirements { type_names: String },

    #[error("the closure {type_name} captures state; only empty closures can be registered")]
    LambdaWithCaptures { type_name: &'static str },

    #[error("the component {type_name} is used as its own replacement")]
    ComponentReplacementInItself { type_name: &'static str },

    #[error("the component {type_name} was replaced twice, with different replacements")]
    DoubleReplacement { type_name: &'static str },
}

pub(crate) fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let mut result = String::new();
    for (i, name) in names.enumerate() {
        if i > 0 {
            result.push_str(", ");
        }
        result.push_str(name);
    }
    result
}

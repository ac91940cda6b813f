use crate::binding::conjure;
use crate::component::Component;
use std::any::{self, Any};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Erased argument tuple of a parameterized sub-component. Equality and
/// hashing delegate to the author's own `PartialEq`/`Hash` impls; the
/// framework never invents an equality relation for user arguments.
pub(crate) trait LazyArgs: Send + Sync {
    fn eq_args(&self, other: &dyn LazyArgs) -> bool;
    fn hash_args(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
    fn clone_args(&self) -> Box<dyn LazyArgs>;
}

pub(crate) struct ArgsHolder<A>(pub A);

impl<A> LazyArgs for ArgsHolder<A>
where
    A: Clone + PartialEq + Hash + Send + Sync + 'static,
{
    fn eq_args(&self, other: &dyn LazyArgs) -> bool {
        other
            .as_any()
            .downcast_ref::<ArgsHolder<A>>()
            .map_or(false, |o| o.0 == self.0)
    }

    fn hash_args(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_args(&self) -> Box<dyn LazyArgs> {
        Box::new(ArgsHolder(self.0.clone()))
    }
}

#[derive(Clone, Copy)]
pub(crate) enum LazyInvoke {
    NoArgs(fn() -> Component),
    WithArgs(fn(&dyn LazyArgs) -> Component),
}

/// A deferred sub-component reference: the component function is not invoked
/// until normalization, so repeated installs can be deduplicated first.
/// Identity is the function's closure type plus the argument tuple.
pub(crate) struct LazyEntry {
    pub fun_type: any::TypeId,
    pub fun_name: &'static str,
    invoke: LazyInvoke,
    args: Option<Box<dyn LazyArgs>>,
}

fn call_no_args<F>() -> Component
where
    F: Fn() -> Component + Copy + 'static,
{
    let f = unsafe { conjure::<F>() };
    f()
}

fn call_with_args<F, A>(args: &dyn LazyArgs) -> Component
where
    F: Fn(A) -> Component + Copy + 'static,
    A: Clone + PartialEq + Hash + Send + Sync + 'static,
{
    let f = unsafe { conjure::<F>() };
    let args = args
        .as_any()
        .downcast_ref::<ArgsHolder<A>>()
        .expect("lazy component argument type mismatch")
        .0
        .clone();
    f(args)
}

impl LazyEntry {
    pub(crate) fn no_args<F>() -> Self
    where
        F: Fn() -> Component + Copy + Send + Sync + 'static,
    {
        LazyEntry {
            fun_type: any::TypeId::of::<F>(),
            fun_name: any::type_name::<F>(),
            invoke: LazyInvoke::NoArgs(call_no_args::<F>),
            args: None,
        }
    }

    pub(crate) fn with_args<F, A>(args: A) -> Self
    where
        F: Fn(A) -> Component + Copy + Send + Sync + 'static,
        A: Clone + PartialEq + Hash + Send + Sync + 'static,
    {
        LazyEntry {
            fun_type: any::TypeId::of::<F>(),
            fun_name: any::type_name::<F>(),
            invoke: LazyInvoke::WithArgs(call_with_args::<F, A>),
            args: Some(Box::new(ArgsHolder(args))),
        }
    }

    pub(crate) fn invoke(&self) -> Component {
        match self.invoke {
            LazyInvoke::NoArgs(f) => f(),
            LazyInvoke::WithArgs(f) => f(
                self.args
                    .as_deref()
                    .expect("parameterized lazy component without arguments"),
            ),
        }
    }

    pub(crate) fn key(&self) -> LazyKey {
        LazyKey {
            fun_type: self.fun_type,
            fun_name: self.fun_name,
            args: self.args.as_ref().map(|a| a.clone_args()),
        }
    }
}

impl Clone for LazyEntry {
    fn clone(&self) -> Self {
        LazyEntry {
            fun_type: self.fun_type,
            fun_name: self.fun_name,
            invoke: self.invoke,
            args: self.args.as_ref().map(|a| a.clone_args()),
        }
    }
}

/// Hashable identity of a lazy component entry.
pub(crate) struct LazyKey {
    fun_type: any::TypeId,
    pub fun_name: &'static str,
    args: Option<Box<dyn LazyArgs>>,
}

impl Clone for LazyKey {
    fn clone(&self) -> Self {
        LazyKey {
            fun_type: self.fun_type,
            fun_name: self.fun_name,
            args: self.args.as_ref().map(|a| a.clone_args()),
        }
    }
}

impl PartialEq for LazyKey {
    fn eq(&self, other: &Self) -> bool {
        if self.fun_type != other.fun_type {
            return false;
        }
        match (&self.args, &other.args) {
            (None, None) => true,
            (Some(a), Some(b)) => a.eq_args(b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for LazyKey {}

impl Hash for LazyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fun_type.hash(state);
        if let Some(args) = &self.args {
            args.hash_args().hash(state);
        }
    }
}

use std::marker::PhantomData;

/// An annotated value: `Tagged<T, Tag>` is a distinct binding key from `T`,
/// so the same underlying type can be bound several times in one component
/// under different zero-sized tags.
///
/// ```
/// use graft::{create_component, Injector, Tagged};
///
/// struct Primary;
/// struct Fallback;
///
/// let component = create_component()
///     .bind_instance(Tagged::<&'static str, Primary>::new("db-main"))
///     .bind_instance(Tagged::<&'static str, Fallback>::new("db-replica"))
///     .into_component();
/// let injector = Injector::new(component).unwrap();
/// assert_eq!(**injector.get::<Tagged<&'static str, Primary>>(), "db-main");
/// ```
pub struct Tagged<T, Tag> {
    x: T,
    _phantom: PhantomData<fn() -> Tag>,
}

impl<T> Tagged<T, ()> {
    pub fn pure(x: T) -> Self {
        Tagged::new(x)
    }
}

impl<T, Tag> Tagged<T, Tag> {
    pub fn new(x: T) -> Self {
        Self {
            x,
            _phantom: PhantomData,
        }
    }

    /// Rebinds the value under another tag.
    pub fn retag<NewTag>(self) -> Tagged<T, NewTag> {
        Tagged::new(self.x)
    }

    pub fn untag(self) -> T {
        self.x
    }
}

impl<T: Clone, Tag> Clone for Tagged<T, Tag> {
    fn clone(&self) -> Self {
        Tagged::new(self.x.clone())
    }
}

impl<T, Tag> std::ops::Deref for Tagged<T, Tag> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.x
    }
}

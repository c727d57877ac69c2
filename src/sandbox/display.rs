//! Scoped suspension of immediate figure rendering
//!
//! While a [`DisplaySuspension`] is alive, `show` on the wrapped namespace is
//! a no-op so plots stay addressable as open figures. Dropping the guard puts
//! the previous render mode back, whichever way the scope is left.

use std::ops::{Deref, DerefMut};

use super::namespace::{Namespace, RenderMode};

pub struct DisplaySuspension<'a> {
    namespace: &'a mut Namespace,
    previous: RenderMode,
}

impl<'a> DisplaySuspension<'a> {
    pub fn engage(namespace: &'a mut Namespace) -> Self {
        let previous = namespace.set_render_mode(RenderMode::Suspended);
        Self {
            namespace,
            previous,
        }
    }
}

impl Deref for DisplaySuspension<'_> {
    type Target = Namespace;

    fn deref(&self) -> &Namespace {
        self.namespace
    }
}

impl DerefMut for DisplaySuspension<'_> {
    fn deref_mut(&mut self) -> &mut Namespace {
        self.namespace
    }
}

impl Drop for DisplaySuspension<'_> {
    fn drop(&mut self) {
        self.namespace.set_render_mode(self.previous);
    }
}

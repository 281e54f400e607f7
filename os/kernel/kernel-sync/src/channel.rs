use core::fmt;

/// Identity a sleeper waits on and a waker signals.
///
/// Usually derived from the address of the object guarding the condition,
/// so two unrelated conditions never share a channel by accident.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Channel(usize);

impl Channel {
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Channel named by the address of `value`.
    #[must_use]
    pub fn of<T: ?Sized>(value: &T) -> Self {
        Self(core::ptr::from_ref(value).cast::<()>() as usize)
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({:#x})", self.0)
    }
}

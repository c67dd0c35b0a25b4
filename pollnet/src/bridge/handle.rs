use crate::utils::Handle;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) Handle);

        impl $name {
            /// Packs the handle into a non-zero integer for foreign callers.
            pub fn into_raw(self) -> u64 {
                self.0.into_raw()
            }

            /// Rebuilds a handle from [`into_raw`](Self::into_raw) output.
            ///
            /// Returns `None` for `0`. Any other value is accepted; whether it
            /// still refers to a live object is checked when it is used.
            pub fn from_raw(raw: u64) -> Option<Self> {
                Handle::from_raw(raw).map(Self)
            }
        }
    };
}

handle_type!(
    /// Caller reference to a connection owned by a [`Bridge`](crate::Bridge).
    ConnectionHandle
);

handle_type!(
    /// Caller reference to a listener owned by a [`Bridge`](crate::Bridge).
    ListenerHandle
);

handle_type!(
    /// Caller reference to a pending timer, used to cancel it.
    TimerHandle
);

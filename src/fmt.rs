//! Internal logging macros.
//!
//! Each macro forwards to `defmt`, `log` or `esp-println`, depending on which
//! features are enabled, and compiles to nothing when none of them is. Format
//! strings must stick to `{}` / `{:?}` so that both backends accept them.

#![allow(unused_macros)]

macro_rules! log_event {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);
            #[cfg(feature = "esp32-log")]
            ::esp_println::println!($s $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($($t:tt)*) => { log_event!(trace, $($t)*) };
}

macro_rules! debug {
    ($($t:tt)*) => { log_event!(debug, $($t)*) };
}

macro_rules! info {
    ($($t:tt)*) => { log_event!(info, $($t)*) };
}

macro_rules! warn {
    ($($t:tt)*) => { log_event!(warn, $($t)*) };
}

macro_rules! error {
    ($($t:tt)*) => { log_event!(error, $($t)*) };
}

/// Wraps any `Debug` value so it can be handed to every logging backend,
/// including `defmt`, which otherwise needs a `Format` impl.
pub(crate) struct Dbg<'a, T: ?Sized>(pub &'a T);

impl<T: core::fmt::Debug + ?Sized> core::fmt::Debug for Dbg<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(feature = "defmt")]
impl<T: core::fmt::Debug + ?Sized> defmt::Format for Dbg<'_, T> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", defmt::Debug2Format(self.0))
    }
}

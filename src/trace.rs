//! Logging macros.
//!
//! Thin shims over the `tracing` macros so engine code can log with bare
//! `trace!`/`debug!`/`warn!` invocations. Keeping the indirection in one
//! module means the backend can be swapped without touching call sites.

#![allow(unused_macros)]

macro_rules! trace {
    ($($arg:tt)+) => {
        tracing::trace!($($arg)+)
    }
}

macro_rules! debug {
    ($($arg:tt)+) => {
        tracing::debug!($($arg)+)
    }
}

macro_rules! info {
    ($($arg:tt)+) => {
        tracing::info!($($arg)+)
    }
}

macro_rules! warn {
    ($($arg:tt)+) => {
        tracing::warn!($($arg)+)
    }
}

macro_rules! error {
    ($($arg:tt)+) => {
        tracing::error!($($arg)+)
    }
}

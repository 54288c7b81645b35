// SPDX-License-Identifier: Apache-2.0

/// Deferred task queue errors.
///
/// The timer contracts themselves never fail at runtime, misconfiguration is
/// rejected when the crate using them is built.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The task is already queued, the post was coalesced with it.
    Busy,
    /// No task is registered under this id.
    NoTask,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => f.write_str("task already posted"),
            Self::NoTask => f.write_str("no task registered"),
        }
    }
}

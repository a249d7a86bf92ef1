//! The interface every liveness signal implements.

/// A source of liveness, asked once per polling cycle.
///
/// `check_cycle` reports whether there was activity since the previous
/// call and starts a new interval. Checks that are not enabled are never
/// asked, and a monitor with no enabled check never runs its idle action.
pub trait Check: Send {
    /// Short name used in logs and traces.
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Liveness of the interval that ends now.
    fn check_cycle(&mut self) -> bool;
}

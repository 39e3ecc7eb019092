//! Grace notice delivery.
//!
//! - `LogGraceNotifier` - Writes notices to the log (no email configured)
//! - `ResendGraceNotifier` - Sends email through Resend

mod log_notifier;
mod resend_notifier;

pub use log_notifier::LogGraceNotifier;
pub use resend_notifier::ResendGraceNotifier;

// Paydesk Infrastructure - Mail Adapter
// Implements: EmailSender

mod compose;
mod log_sender;
mod smtp;

pub use compose::ComposedEmail;
pub use log_sender::LogEmailSender;
pub use smtp::{SmtpConfig, SmtpEmailSender, TlsMode};

use log::error;

/// Surfaces a failure to the user in a way they have to acknowledge.
///
/// The UI shell supplies the real implementation (a modal alert); the core
/// only decides when one is due.
pub trait Notifier: Send + Sync {
    fn alert(&self, title: &str, message: &str);
}

/// Fallback used when no UI is attached: the alert goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, title: &str, message: &str) {
        error!("{title}: {message}");
    }
}

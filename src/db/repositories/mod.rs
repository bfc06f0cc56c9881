pub(crate) mod accounts;
pub(crate) mod documents;
pub(crate) mod realtime;

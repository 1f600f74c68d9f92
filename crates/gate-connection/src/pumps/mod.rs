pub(crate) mod event_loop;
pub(crate) mod session;

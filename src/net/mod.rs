//! Nonblocking socket wrappers. Registration with the reactor happens
//! through `evloop::Loop::register_io`/`set_interest` directly on the
//! raw fd, not through a generic `Evented` trait — there's only ever
//! one watcher implementation per loop.

pub mod tcp;
pub mod udp;

//! The multiplexing core: session and stream state machines, flow control,
//! shutdown coordination, and the driver task that owns the transport.

pub(crate) mod cell;
pub(crate) mod closed;
pub(crate) mod command;
pub(crate) mod conn;
pub(crate) mod driver;
pub(crate) mod flow;
pub(crate) mod stream;
pub(crate) mod stream_map;
pub(crate) mod stream_queue;

pub mod conf;
pub mod event;
pub mod handle;
pub mod role;
pub mod shutdown;

pub(crate) mod heartbeat;
pub(crate) mod read;
pub(crate) mod write;

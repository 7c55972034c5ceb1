// IPC module - Message channel between the supervisor and its workers

pub mod protocol;

pub use protocol::{
    decode_supervisor_message, decode_worker_message, encode_line, SupervisorMessage,
    WorkerMessage, HEARTBEAT_INTERVAL_ENV, WORKER_ID_ENV,
};

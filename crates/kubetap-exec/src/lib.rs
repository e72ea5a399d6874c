//! Interactive exec sessions for kubetap
//!
//! Frames are one channel byte followed by the payload. A session negotiates
//! a shell from an ordered list of candidates and then pumps stdin, resize
//! and output frames over one socket.

mod codec;
mod kube_exec;
mod session;
mod transport;

pub use codec::{ExecChannelCodec, ExecChannelMessage};
pub use kube_exec::KubeExecTransport;
pub use session::{
    CloseCallback, ExecError, ExecErrorCallback, ExecHandlers, ExecOptions, ExecSession, ExecState,
    OutputCallback, ShellAttempt, ShellCommand,
};
pub use transport::{ExecSocket, ExecTransport, FrameSink, FrameStream};

// Re-export types used in our public API
pub use kubetap_types::{ExecChannel, LogTarget, TerminalSize};
